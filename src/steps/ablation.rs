//! Binary model-judge ablation.
//!
//! Each node is judged once per criterion. The YES/NO answers are combined
//! by the configured consensus policy; a node failing consensus is copied
//! forward with `ablated = true`.

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::json;

use crate::config::{AblationParameters, Consensus};
use crate::error::LlmError;
use crate::llm::CompletionRequest;
use crate::model::Node;
use crate::pipeline::{Executor, ExecutorError, StepContext};

use super::save_batch;
use super::template::render_prompts;

/// Combines per-criterion answers. No answers never reaches consensus.
pub fn check_consensus(consensus: Consensus, answers: &[bool]) -> bool {
    let total = answers.len();
    if total == 0 {
        return false;
    }
    let positive = answers.iter().filter(|a| **a).count();
    match consensus {
        Consensus::All => positive == total,
        Consensus::Any => positive > 0,
        Consensus::Majority => positive * 2 > total,
    }
}

/// Reads a judge answer. `None` when it is neither YES nor NO.
///
/// Accepts a JSON object `{"answer": ...}`, optionally wrapped in prose or a
/// code fence, or a bare word. French `OUI`/`NON` are accepted.
pub fn parse_judge_answer(text: &str) -> Option<bool> {
    let trimmed = text.trim();

    let answer = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => {
            let value: serde_json::Value = serde_json::from_str(&trimmed[start..=end]).ok()?;
            value.get("answer")?.as_str()?.to_string()
        }
        _ => trimmed.trim_matches(|c: char| !c.is_alphabetic()).to_string(),
    };

    match answer.trim().to_uppercase().as_str() {
        "YES" | "OUI" => Some(true),
        "NO" | "NON" => Some(false),
        _ => None,
    }
}

fn judge_prompt(criterion: &str, candidate: &str) -> String {
    format!(
        "You are an expert judge evaluating synthetic text data against a criterion.\n\
         Answer YES when the criterion is fulfilled and NO when it is not.\n\
         Reply with a JSON object of the form {{\"answer\": \"YES\"}} or {{\"answer\": \"NO\"}}.\n\
         ------\n\
         criterion: Is the candidate written in English?\n\
         candidate: The harbour was quiet before the storm.\n\
         {{\"answer\": \"YES\"}}\n\
         ------\n\
         criterion: Does the candidate contain more than ten words?\n\
         candidate: Birds sing.\n\
         {{\"answer\": \"NO\"}}\n\
         ------\n\
         criterion: {}\n\
         candidate: {}\n",
        criterion, candidate
    )
}

fn answer_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "answer": { "type": "string", "enum": ["YES", "NO"] }
        },
        "required": ["answer"]
    })
}

pub struct LlmJudgeBinaryExecutor {
    params: AblationParameters,
}

impl LlmJudgeBinaryExecutor {
    pub fn new(params: AblationParameters) -> Self {
        Self { params }
    }
}

#[async_trait]
impl Executor for LlmJudgeBinaryExecutor {
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
        let criteria_count = self.params.criteria.len();

        for (index, batch) in pending.chunks(self.params.batch_size.max(1)).enumerate() {
            if index > 0 {
                ctx.check_interrupt()?;
            }

            // criteria[c] rendered for every node of the batch
            let mut rendered = Vec::with_capacity(criteria_count);
            for criterion in &self.params.criteria {
                rendered.push(render_prompts(ctx.db, criterion, batch, &Default::default()).await?);
            }

            // One task per node; a node's criteria are asked one after another,
            // so at most `batch_size` calls are in flight.
            let outputs = join_all(batch.iter().enumerate().map(|(n, node)| {
                let requests: Vec<CompletionRequest> = rendered
                    .iter()
                    .map(|criterion| {
                        CompletionRequest::new(
                            credentials.clone(),
                            &self.params.model,
                            judge_prompt(&criterion[n], &node.value),
                        )
                        .with_response_schema(answer_schema())
                        .with_temperature(self.params.temperature)
                    })
                    .collect();

                async move {
                    let mut answers = Vec::with_capacity(requests.len());
                    for request in requests {
                        let answer = ctx.models.complete(request).await;
                        let failed = answer.is_err();
                        answers.push(answer);
                        if failed {
                            break;
                        }
                    }
                    self.judge(ctx, node, answers)
                }
            }))
            .await;

            save_batch(ctx, batch, outputs, &mut result).await?;
        }

        Ok(result)
    }
}

impl LlmJudgeBinaryExecutor {
    fn judge(
        &self,
        ctx: &StepContext<'_>,
        node: &Node,
        answers: Vec<Result<String, LlmError>>,
    ) -> Result<Node, ExecutorError> {
        let mut votes = Vec::with_capacity(answers.len());
        for (criterion, answer) in self.params.criteria.iter().zip(answers) {
            let text = answer?;
            let vote = parse_judge_answer(&text).unwrap_or_else(|| {
                tracing::warn!(
                    step_id = ctx.step.id,
                    criterion = %criterion,
                    answer = %text,
                    "Malformed judge answer, counting it as NO"
                );
                false
            });
            votes.push(vote);
        }

        let ablated = !check_consensus(self.params.consensus, &votes);
        tracing::debug!(
            step_id = ctx.step.id,
            node_id = node.id,
            votes = ?votes,
            ablated,
            "Node judged"
        );
        Ok(Node::derived_from(node, node.value.clone())
            .with_ablated(ablated)
            .with_metadata(node.metadata.clone()))
    }
}
