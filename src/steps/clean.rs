//! Deduplication.
//!
//! Deduplicators never drop nodes. Every input yields one output copy, and
//! copies judged duplicates are marked ablated so they stay auditable while
//! leaving the forward flow.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use ndarray::{Array1, Array2, Axis};
use unicode_normalization::UnicodeNormalization;

use crate::config::{DedupStrategy, EmbedParameters, Keep, TfIdfParameters};
use crate::model::Node;
use crate::pipeline::{Executor, ExecutorError, StepContext};

/// Indices of exact duplicates under the `keep` policy.
pub fn exact_duplicates(values: &[&str], keep: Keep) -> HashSet<usize> {
    let mut seen = HashSet::new();
    let mut duplicates = HashSet::new();

    let mut visit = |index: usize| {
        if !seen.insert(values[index]) {
            duplicates.insert(index);
        }
    };
    match keep {
        Keep::First => (0..values.len()).for_each(&mut visit),
        Keep::Last => (0..values.len()).rev().for_each(&mut visit),
    }
    duplicates
}

/// Lowercased, accent-stripped tokens of at least two characters.
fn tokenize(text: &str) -> Vec<String> {
    let folded: String = text
        .nfkd()
        .filter(|c| !unicode_normalization::char::is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase();
    folded
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| t.chars().count() >= 2)
        .map(str::to_string)
        .collect()
}

/// L2-normalized TF-IDF rows with smoothed idf.
pub fn tfidf_matrix(values: &[&str]) -> Array2<f64> {
    let documents: Vec<Vec<String>> = values.iter().map(|v| tokenize(v)).collect();

    let mut vocabulary: HashMap<&str, usize> = HashMap::new();
    for token in documents.iter().flatten() {
        let next = vocabulary.len();
        vocabulary.entry(token.as_str()).or_insert(next);
    }

    let n = documents.len();
    let mut matrix = Array2::<f64>::zeros((n, vocabulary.len()));
    for (row, tokens) in documents.iter().enumerate() {
        for token in tokens {
            matrix[[row, vocabulary[token.as_str()]]] += 1.0;
        }
    }

    let document_frequency = matrix.mapv(|tf| if tf > 0.0 { 1.0 } else { 0.0 }).sum_axis(Axis(0));
    let idf = document_frequency.mapv(|df| ((1.0 + n as f64) / (1.0 + df)).ln() + 1.0);
    matrix *= &idf;

    for mut row in matrix.rows_mut() {
        let norm = row.dot(&row).sqrt();
        if norm > 0.0 {
            row /= norm;
        }
    }
    matrix
}

/// Indices ablated by pairwise similarity above `threshold`.
///
/// Walks the nodes in order; within each similar pair the earlier node is
/// kept under `Keep::First` and the later one under `Keep::Last`.
fn similar_duplicates(similarity: &Array2<f64>, threshold: f64, keep: Keep) -> HashSet<usize> {
    let n = similarity.nrows();
    let mut removed = HashSet::new();

    for i in 0..n {
        if removed.contains(&i) {
            continue;
        }
        for j in (i + 1)..n {
            if removed.contains(&j) || similarity[[i, j]] <= threshold {
                continue;
            }
            match keep {
                Keep::First => {
                    removed.insert(j);
                }
                Keep::Last => {
                    removed.insert(i);
                    break;
                }
            }
        }
    }
    removed
}

fn copy_with_flags(pending: &[Node], ablated: &HashSet<usize>) -> Vec<Node> {
    pending
        .iter()
        .enumerate()
        .map(|(index, node)| {
            Node::derived_from(node, node.value.clone())
                .with_ablated(ablated.contains(&index))
                .with_metadata(node.metadata.clone())
        })
        .collect()
}

pub struct TfIdfDeduplicator {
    params: TfIdfParameters,
}

impl TfIdfDeduplicator {
    pub fn new(params: TfIdfParameters) -> Self {
        Self { params }
    }
}

#[async_trait]
impl Executor for TfIdfDeduplicator {
    async fn execute(
        &self,
        ctx: &StepContext<'_>,
        pending: Vec<Node>,
        processed: Vec<Node>,
    ) -> Result<Vec<Node>, ExecutorError> {
        let values: Vec<&str> = pending.iter().map(|n| n.value.as_str()).collect();

        let duplicates = match self.params.strategy {
            DedupStrategy::Exact => exact_duplicates(&values, self.params.keep),
            DedupStrategy::Fuzzy => {
                let matrix = tfidf_matrix(&values);
                let similarity = matrix.dot(&matrix.t());
                similar_duplicates(&similarity, self.params.similarity_threshold, self.params.keep)
            }
        };
        tracing::debug!(
            step_id = ctx.step.id,
            nodes = pending.len(),
            duplicates = duplicates.len(),
            "Deduplicated"
        );

        let mut result = processed;
        result.extend(copy_with_flags(&pending, &duplicates));
        Ok(result)
    }
}

fn cosine(a: &Array1<f64>, b: &Array1<f64>) -> f64 {
    let norms = a.dot(a).sqrt() * b.dot(b).sqrt();
    if norms == 0.0 {
        0.0
    } else {
        a.dot(b) / norms
    }
}

pub struct EmbedDeduplicator {
    params: EmbedParameters,
}

impl EmbedDeduplicator {
    pub fn new(params: EmbedParameters) -> Self {
        Self { params }
    }
}

#[async_trait]
impl Executor for EmbedDeduplicator {
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
        let texts: Vec<String> = pending.iter().map(|n| n.value.clone()).collect();
        let embeddings: Vec<Array1<f64>> = ctx
            .models
            .embed(&credentials, &self.params.model, &texts)
            .await?
            .into_iter()
            .map(Array1::from)
            .collect();
        if embeddings.len() != pending.len() {
            return Err(ExecutorError::Failed(format!(
                "expected {} embeddings, got {}",
                pending.len(),
                embeddings.len()
            )));
        }

        let mut kept: Vec<usize> = Vec::new();
        let mut duplicates = HashSet::new();
        for (index, embedding) in embeddings.iter().enumerate() {
            let similar = kept
                .iter()
                .any(|k| cosine(&embeddings[*k], embedding) > self.params.similarity_threshold);
            if similar {
                duplicates.insert(index);
            } else {
                kept.push(index);
            }
        }
        tracing::debug!(
            step_id = ctx.step.id,
            nodes = pending.len(),
            duplicates = duplicates.len(),
            "Deduplicated by embedding"
        );

        result.extend(copy_with_flags(&pending, &duplicates));
        Ok(result)
    }
}
