//! synda: synthetic data pipeline engine.
//!
//! Runs YAML-defined pipelines of text transformation steps over a CSV
//! input. Every node produced along the way is stored in SQLite with its
//! lineage, step outputs are cached by content, and runs can be retried
//! after a failure or resumed after an interruption.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod io;
pub mod llm;
pub mod model;
pub mod pipeline;
pub mod steps;
pub mod storage;

pub use error::{ConfigError, InputError, LlmError, OutputError};
pub use model::{Node, Provider, Run, RunStatus, Step, StepStatus};
pub use pipeline::{Pipeline, PipelineError, PipelineOutcome};
