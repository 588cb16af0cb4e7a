//! Metadata extraction.

use async_trait::async_trait;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::config::WordPositionParameters;
use crate::model::Node;
use crate::pipeline::{Executor, ExecutorError, StepContext};

use super::template::render_prompts;

/// Case-insensitive regex for `pattern` with accents folded to ASCII.
///
/// Returns `None` when nothing searchable is left after folding.
pub fn folded_pattern(pattern: &str) -> Result<Option<Regex>, regex::Error> {
    let folded: String = pattern
        .to_lowercase()
        .nfkd()
        .filter(char::is_ascii)
        .collect();
    if folded.is_empty() {
        return Ok(None);
    }
    Regex::new(&format!("(?i){}", regex::escape(&folded))).map(Some)
}

/// Records where each labelled pattern first occurs in a node's text.
///
/// Entries are `{label, start, end, value}` with character offsets and are
/// appended to any metadata the node already carries.
pub struct WordPositionExecutor {
    params: WordPositionParameters,
}

impl WordPositionExecutor {
    pub fn new(params: WordPositionParameters) -> Self {
        Self { params }
    }
}

#[async_trait]
impl Executor for WordPositionExecutor {
    async fn execute(
        &self,
        ctx: &StepContext<'_>,
        pending: Vec<Node>,
        processed: Vec<Node>,
    ) -> Result<Vec<Node>, ExecutorError> {
        // label -> rendered pattern per pending node
        let mut rendered = Vec::with_capacity(self.params.matches.len());
        for (label, pattern) in &self.params.matches {
            let patterns = render_prompts(ctx.db, pattern, &pending, &Default::default()).await?;
            rendered.push((label, patterns));
        }

        let mut result = processed;
        for (index, node) in pending.iter().enumerate() {
            let mut metadata = node.metadata.clone();

            for (label, patterns) in &rendered {
                let regex = folded_pattern(&patterns[index]).map_err(|e| {
                    ExecutorError::Failed(format!("pattern for '{}': {}", label, e))
                })?;
                let Some(found) = regex.and_then(|r| r.find(&node.value)) else {
                    continue;
                };

                let start = node.value[..found.start()].chars().count();
                let end = start + found.as_str().chars().count();
                metadata.push(serde_json::json!({
                    "label": label,
                    "start": start,
                    "end": end,
                    "value": found.as_str(),
                }));
            }

            result.push(Node::derived_from(node, node.value.clone()).with_metadata(metadata));
        }

        tracing::debug!(step_id = ctx.step.id, nodes = pending.len(), "Word positions extracted");
        Ok(result)
    }
}
