//! Executor contract.
//!
//! Every step algorithm implements [`Executor::execute`]. The wrapper
//! [`execute_and_update_step`] owns everything around it: status
//! transitions, the step output cache, lineage persistence and the
//! filtering of ablated nodes out of the forward flow.

use async_trait::async_trait;
use thiserror::Error;

use crate::cache::{CacheError, CacheKey, StepCache};
use crate::error::{ConfigError, LlmError};
use crate::llm::ModelProvider;
use crate::model::{Node, Provider, Step, StepStatus};
use crate::storage::{Database, DatabaseError};

use super::interrupt::Interrupt;

/// Errors raised while running one step.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Model provider error: {0}")]
    Llm(#[from] LlmError),

    #[error("Step configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Template error: {0}")]
    Template(String),

    /// The operator asked to stop. The step stays `running` and can be resumed.
    #[error("Step interrupted by operator")]
    Interrupted,

    #[error("Step failed: {0}")]
    Failed(String),
}

/// Everything an executor may touch while running a step.
pub struct StepContext<'a> {
    pub db: &'a Database,
    pub step: &'a Step,
    pub models: &'a dyn ModelProvider,
    pub interrupt: &'a Interrupt,
}

impl<'a> StepContext<'a> {
    /// Persists `output` right away and folds `input`, so a crash later in
    /// the step keeps this pair.
    pub async fn save_during_execution(
        &self,
        input: &Node,
        output: &mut Node,
    ) -> Result<(), ExecutorError> {
        self.db
            .save_during_execution(self.step, input, output)
            .await?;
        Ok(())
    }

    pub fn check_interrupt(&self) -> Result<(), ExecutorError> {
        self.interrupt.check()
    }

    /// Stored credentials for `provider`.
    pub async fn credentials(&self, provider: &str) -> Result<Provider, ExecutorError> {
        self.db
            .get_provider(provider)
            .await?
            .ok_or_else(|| LlmError::MissingCredentials(provider.to_string()).into())
    }
}

/// A step algorithm.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Produces the step's output nodes.
    ///
    /// `processed` holds the outputs of an interrupted earlier attempt of the
    /// same step. They must appear unchanged in the result.
    async fn execute(
        &self,
        ctx: &StepContext<'_>,
        pending: Vec<Node>,
        processed: Vec<Node>,
    ) -> Result<Vec<Node>, ExecutorError>;
}

/// Runs one step attempt and returns the nodes handed to the next step.
///
/// Any failure other than an interruption leaves the step `errored` before
/// the error is returned. Run status is left to the caller.
pub async fn execute_and_update_step(
    ctx: &StepContext<'_>,
    cache: &StepCache,
    executor: &dyn Executor,
    pending: Vec<Node>,
    processed: Vec<Node>,
    restarted: bool,
) -> Result<Vec<Node>, ExecutorError> {
    let step = ctx.step;

    match run_attempt(ctx, cache, executor, pending, processed, restarted).await {
        Ok(forwarded) => Ok(forwarded),
        Err(ExecutorError::Interrupted) => {
            tracing::info!(step_id = step.id, step = %step.name, "Step interrupted");
            Err(ExecutorError::Interrupted)
        }
        Err(err) => {
            tracing::error!(step_id = step.id, step = %step.name, error = %err, "Step failed");
            if let Err(status_err) = ctx.db.set_step_status(step.id, StepStatus::Errored).await {
                tracing::error!(
                    step_id = step.id,
                    error = %status_err,
                    "Failed to mark step as errored"
                );
            }
            Err(err)
        }
    }
}

async fn run_attempt(
    ctx: &StepContext<'_>,
    cache: &StepCache,
    executor: &dyn Executor,
    pending: Vec<Node>,
    processed: Vec<Node>,
    restarted: bool,
) -> Result<Vec<Node>, ExecutorError> {
    let step = ctx.step;
    ctx.check_interrupt()?;

    ctx.db.set_step_running(step.id, &pending, restarted).await?;
    tracing::info!(
        step_id = step.id,
        step = %step.name,
        pending = pending.len(),
        processed = processed.len(),
        restarted,
        "Step running"
    );

    let mut outputs = if restarted {
        let mut outputs = executor.execute(ctx, pending.clone(), processed).await?;
        // Earlier outputs come first; restore input order.
        outputs.sort_by_key(|node| node.parent_node_id);
        outputs
    } else {
        let key = CacheKey::new(step.id, &step.config, &pending);
        match cache.get(&key).await? {
            Some(cached) => {
                tracing::debug!(step_id = step.id, key = %key.key, "Step cache hit");
                cached.into_iter().map(|c| c.into_node()).collect()
            }
            None => {
                tracing::debug!(step_id = step.id, key = %key.key, "Step cache miss");
                let outputs = executor.execute(ctx, pending.clone(), processed).await?;
                cache.set(&key, &outputs).await?;
                outputs
            }
        }
    };

    ctx.db
        .create_with_lineage(step, &pending, &mut outputs)
        .await?;
    ctx.db.set_step_completed(step.id).await?;

    let total = outputs.len();
    let forwarded: Vec<Node> = outputs.into_iter().filter(|n| !n.ablated).collect();
    tracing::info!(
        step_id = step.id,
        step = %step.name,
        outputs = total,
        forwarded = forwarded.len(),
        "Step completed"
    );
    Ok(forwarded)
}
