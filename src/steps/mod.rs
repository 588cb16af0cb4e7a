//! Step algorithms.
//!
//! Each [`StepKind`] variant maps to exactly one executor:
//!
//! | type/method | executor |
//! |---|---|
//! | `split/chunk` | [`ChunkExecutor`] |
//! | `split/separator` | [`SeparatorExecutor`] |
//! | `generation/llm` | [`GenerationExecutor`] |
//! | `ablation/llm-judge-binary` | [`LlmJudgeBinaryExecutor`] |
//! | `clean/deduplicate-tf-idf` | [`TfIdfDeduplicator`] |
//! | `clean/deduplicate-embed` | [`EmbedDeduplicator`] |
//! | `metadata/word-position` | [`WordPositionExecutor`] |

mod ablation;
mod clean;
mod generation;
mod metadata;
mod split;
pub mod template;

pub use ablation::{check_consensus, parse_judge_answer, LlmJudgeBinaryExecutor};
pub use clean::{EmbedDeduplicator, TfIdfDeduplicator};
pub use generation::GenerationExecutor;
pub use metadata::WordPositionExecutor;
pub use split::{chunk_text, split_on_separator, ChunkExecutor, SeparatorExecutor};

use crate::config::{StepConfig, StepKind};
use crate::model::Node;
use crate::pipeline::{Executor, ExecutorError, StepContext};

/// Builds the executor for a step configuration.
pub fn build_executor(config: &StepConfig) -> Box<dyn Executor> {
    match &config.kind {
        StepKind::Chunk(p) => Box::new(ChunkExecutor::new(p.clone())),
        StepKind::Separator(p) => Box::new(SeparatorExecutor::new(p.clone())),
        StepKind::Generation(p) => Box::new(GenerationExecutor::new(p.clone())),
        StepKind::LlmJudgeBinary(p) => Box::new(LlmJudgeBinaryExecutor::new(p.clone())),
        StepKind::DeduplicateTfIdf(p) => Box::new(TfIdfDeduplicator::new(p.clone())),
        StepKind::DeduplicateEmbed(p) => Box::new(EmbedDeduplicator::new(p.clone())),
        StepKind::WordPosition(p) => Box::new(WordPositionExecutor::new(p.clone())),
    }
}

/// Saves the successful outputs of one batch, then reports its first failure.
///
/// `results` pairs up with `inputs` by position.
pub(crate) async fn save_batch<E>(
    ctx: &StepContext<'_>,
    inputs: &[Node],
    results: Vec<Result<Node, E>>,
    saved: &mut Vec<Node>,
) -> Result<(), ExecutorError>
where
    E: Into<ExecutorError> + Send,
{
    let mut first_error = None;
    for (input, result) in inputs.iter().zip(results) {
        match result {
            Ok(mut output) => {
                ctx.save_during_execution(input, &mut output).await?;
                saved.push(output);
            }
            Err(err) => {
                if first_error.is_none() {
                    first_error = Some(err.into());
                }
            }
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
