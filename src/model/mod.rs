//! Records tracked by the pipeline engine.
//!
//! - [`Node`]: a unit of text plus its ablation flag, metadata and lineage map
//! - [`Run`]: one execution attempt of a pipeline definition
//! - [`Step`]: one configured stage of a run, linked to nodes as input or output
//! - [`Provider`]: stored credentials for a model provider

mod node;
mod provider;
mod run;
mod step;

pub use node::{Ancestors, Node, NodeStatus, SOURCE_LINEAGE_KEY};
pub use provider::Provider;
pub use run::{Run, RunStatus};
pub use step::{NewStep, RelationshipType, Step, StepStatus};

/// Error returned when a persisted status string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} status '{value}'")]
pub struct UnknownStatus {
    pub kind: &'static str,
    pub value: String,
}
