//! Splitters: one input node becomes several shorter nodes.

use async_trait::async_trait;

use crate::config::{ChunkParameters, SeparatorParameters};
use crate::model::Node;
use crate::pipeline::{Executor, ExecutorError, StepContext};

/// Cuts text into consecutive pieces of `size` characters.
pub fn chunk_text(text: &str, size: usize) -> Vec<String> {
    if size == 0 {
        return Vec::new();
    }
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(size).map(|c| c.iter().collect()).collect()
}

/// Splits text on `separator`, skipping empty pieces.
pub fn split_on_separator(text: &str, separator: &str, keep_separator: bool) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut start = 0;

    while let Some(offset) = text[start..].find(separator) {
        let pos = start + offset;
        let end = if keep_separator {
            pos + separator.len()
        } else {
            pos
        };
        if end > start {
            pieces.push(text[start..end].to_string());
        }
        start = pos + separator.len();
    }
    if start < text.len() {
        pieces.push(text[start..].to_string());
    }
    pieces
}

pub struct ChunkExecutor {
    params: ChunkParameters,
}

impl ChunkExecutor {
    pub fn new(params: ChunkParameters) -> Self {
        Self { params }
    }
}

#[async_trait]
impl Executor for ChunkExecutor {
    async fn execute(
        &self,
        _ctx: &StepContext<'_>,
        pending: Vec<Node>,
        processed: Vec<Node>,
    ) -> Result<Vec<Node>, ExecutorError> {
        let mut result = processed;
        for node in &pending {
            result.extend(
                chunk_text(&node.value, self.params.size)
                    .into_iter()
                    .map(|chunk| Node::derived_from(node, chunk)),
            );
        }
        Ok(result)
    }
}

pub struct SeparatorExecutor {
    params: SeparatorParameters,
}

impl SeparatorExecutor {
    pub fn new(params: SeparatorParameters) -> Self {
        Self { params }
    }
}

#[async_trait]
impl Executor for SeparatorExecutor {
    async fn execute(
        &self,
        _ctx: &StepContext<'_>,
        pending: Vec<Node>,
        processed: Vec<Node>,
    ) -> Result<Vec<Node>, ExecutorError> {
        let mut result = processed;
        for node in &pending {
            result.extend(
                split_on_separator(
                    &node.value,
                    &self.params.separator,
                    self.params.keep_separator,
                )
                .into_iter()
                .map(|piece| Node::derived_from(node, piece)),
            );
        }
        Ok(result)
    }
}
