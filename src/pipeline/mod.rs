//! Pipeline execution.
//!
//! # Architecture
//!
//! - **Executor contract** ([`Executor`], [`execute_and_update_step`]): one
//!   step attempt, including status transitions, caching and lineage
//! - **Controller** ([`Pipeline`]): creates runs and walks their steps in
//!   order for fresh runs, retries and resumes
//! - **Interrupt** ([`Interrupt`]): operator stop requests, honoured between
//!   batches and between steps
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use synda::config::PipelineDefinition;
//! use synda::llm::HttpModelProvider;
//! use synda::pipeline::{Pipeline, PipelineOutcome};
//!
//! let definition = PipelineDefinition::from_yaml_file(Path::new("pipeline.yaml"))?;
//! let pipeline = Pipeline::new(db, cache, Arc::new(HttpModelProvider::new()?));
//!
//! match pipeline.execute(&definition).await? {
//!     PipelineOutcome::Finished { run_id, nodes } => println!("run {run_id}: {} nodes", nodes.len()),
//!     PipelineOutcome::Interrupted { run_id } => pipeline.stop(run_id).await?,
//! }
//! ```

mod controller;
mod executor;
mod interrupt;

pub use controller::{Pipeline, PipelineError, PipelineOutcome};
pub use executor::{execute_and_update_step, Executor, ExecutorError, StepContext};
pub use interrupt::Interrupt;
