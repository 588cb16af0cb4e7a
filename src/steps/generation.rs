//! Model-backed text generation.

use async_trait::async_trait;

use crate::config::GenerationParameters;
use crate::llm::CompletionRequest;
use crate::model::Node;
use crate::pipeline::{Executor, ExecutorError, StepContext};

use super::save_batch;
use super::template::render_prompts;

/// Produces one generated node per input node.
///
/// Inputs are sent in batches of `batch_size` concurrent requests. Every
/// answer is saved as soon as its batch returns, so an interrupted or failed
/// step keeps the answers it already received.
pub struct GenerationExecutor {
    params: GenerationParameters,
}

impl GenerationExecutor {
    pub fn new(params: GenerationParameters) -> Self {
        Self { params }
    }
}

#[async_trait]
impl Executor for GenerationExecutor {
    async fn execute(
        &self,
        ctx: &StepContext<'_>,
        pending: Vec<Node>,
        processed: Vec<Node>,
    ) -> Result<Vec<Node>, ExecutorError> {
        let mut result = processed;
        if pending.is_empty() {
            return Ok(result);
        }

        let credentials = ctx.credentials(&self.params.provider).await?;
        let batch_count = pending.len().div_ceil(self.params.batch_size.max(1));

        for (index, batch) in pending.chunks(self.params.batch_size.max(1)).enumerate() {
            if index > 0 {
                ctx.check_interrupt()?;
            }

            let prompts = render_prompts(
                ctx.db,
                &self.params.template,
                batch,
                &self.params.instruction_sets,
            )
            .await?;

            let requests = prompts
                .into_iter()
                .map(|prompt| {
                    CompletionRequest::new(credentials.clone(), &self.params.model, prompt)
                        .with_temperature(self.params.temperature)
                })
                .collect();

            let answers = ctx.models.complete_batch(requests).await;
            let outputs = batch
                .iter()
                .zip(answers)
                .map(|(input, answer)| answer.map(|text| Node::derived_from(input, text)))
                .collect();

            save_batch(ctx, batch, outputs, &mut result).await?;
            tracing::debug!(
                step_id = ctx.step.id,
                batch = index + 1,
                batches = batch_count,
                "Generation batch saved"
            );
        }

        Ok(result)
    }
}
