//! Typed step definitions.
//!
//! A step is written in YAML as `{type, method, name?, parameters}`. The
//! `(type, method)` pair selects exactly one [`StepKind`] variant whose
//! parameter struct is deserialized and validated when the file is loaded.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_batch_size() -> usize {
    1
}

fn default_true() -> bool {
    true
}

/// Parameters of `split/chunk`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChunkParameters {
    /// Chunk length in characters.
    #[serde(default = "ChunkParameters::default_size")]
    pub size: usize,
}

impl ChunkParameters {
    const MAX_SIZE: usize = 10_000;

    fn default_size() -> usize {
        500
    }
}

/// Parameters of `split/separator`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeparatorParameters {
    #[serde(default = "SeparatorParameters::default_separator")]
    pub separator: String,
    /// Keep the separator at the end of each chunk.
    #[serde(default = "default_true")]
    pub keep_separator: bool,
}

impl SeparatorParameters {
    fn default_separator() -> String {
        ".".to_string()
    }
}

/// Parameters of `generation/llm`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenerationParameters {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub template: String,
    /// Category to candidate instructions; one is drawn per category for `{instructions}`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub instruction_sets: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

/// How per-criterion judgments combine into one keep/ablate decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Consensus {
    All,
    Any,
    Majority,
}

/// Parameters of `ablation/llm-judge-binary`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AblationParameters {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub consensus: Consensus,
    pub criteria: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DedupStrategy {
    #[default]
    Exact,
    Fuzzy,
}

/// Which occurrence of a duplicate group survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Keep {
    #[default]
    First,
    Last,
}

/// Parameters of `clean/deduplicate-tf-idf`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TfIdfParameters {
    #[serde(default)]
    pub strategy: DedupStrategy,
    #[serde(default = "TfIdfParameters::default_threshold")]
    pub similarity_threshold: f64,
    #[serde(default)]
    pub keep: Keep,
}

impl TfIdfParameters {
    fn default_threshold() -> f64 {
        0.9
    }
}

/// Parameters of `clean/deduplicate-embed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmbedParameters {
    pub provider: String,
    pub model: String,
    #[serde(default = "EmbedParameters::default_threshold")]
    pub similarity_threshold: f64,
}

impl EmbedParameters {
    fn default_threshold() -> f64 {
        0.7
    }
}

/// Parameters of `metadata/word-position`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WordPositionParameters {
    /// Label to pattern template.
    pub matches: BTreeMap<String, String>,
}

/// Every step kind the engine can run.
#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
    Chunk(ChunkParameters),
    Separator(SeparatorParameters),
    Generation(GenerationParameters),
    LlmJudgeBinary(AblationParameters),
    DeduplicateTfIdf(TfIdfParameters),
    DeduplicateEmbed(EmbedParameters),
    WordPosition(WordPositionParameters),
}

impl StepKind {
    /// Parses the parameters for a `(type, method)` pair.
    pub fn from_parts(
        step_type: &str,
        method: &str,
        parameters: serde_json::Value,
    ) -> Result<Self, ConfigError> {
        let parameters = match parameters {
            serde_json::Value::Null => serde_json::Value::Object(Default::default()),
            other => other,
        };

        let kind = match (step_type, method) {
            ("split", "chunk") => StepKind::Chunk(serde_json::from_value(parameters)?),
            ("split", "separator") => StepKind::Separator(serde_json::from_value(parameters)?),
            ("generation", "llm") => StepKind::Generation(serde_json::from_value(parameters)?),
            ("ablation", "llm-judge-binary") => {
                StepKind::LlmJudgeBinary(serde_json::from_value(parameters)?)
            }
            ("clean", "deduplicate-tf-idf") => {
                StepKind::DeduplicateTfIdf(serde_json::from_value(parameters)?)
            }
            ("clean", "deduplicate-embed") => {
                StepKind::DeduplicateEmbed(serde_json::from_value(parameters)?)
            }
            ("metadata", "word-position") => {
                StepKind::WordPosition(serde_json::from_value(parameters)?)
            }
            _ => {
                return Err(ConfigError::UnknownStep {
                    step_type: step_type.to_string(),
                    method: method.to_string(),
                })
            }
        };
        Ok(kind)
    }

    pub fn step_type(&self) -> &'static str {
        match self {
            StepKind::Chunk(_) | StepKind::Separator(_) => "split",
            StepKind::Generation(_) => "generation",
            StepKind::LlmJudgeBinary(_) => "ablation",
            StepKind::DeduplicateTfIdf(_) | StepKind::DeduplicateEmbed(_) => "clean",
            StepKind::WordPosition(_) => "metadata",
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            StepKind::Chunk(_) => "chunk",
            StepKind::Separator(_) => "separator",
            StepKind::Generation(_) => "llm",
            StepKind::LlmJudgeBinary(_) => "llm-judge-binary",
            StepKind::DeduplicateTfIdf(_) => "deduplicate-tf-idf",
            StepKind::DeduplicateEmbed(_) => "deduplicate-embed",
            StepKind::WordPosition(_) => "word-position",
        }
    }

    /// Parameters as stored in the step snapshot.
    pub fn parameters(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            StepKind::Chunk(p) => serde_json::to_value(p),
            StepKind::Separator(p) => serde_json::to_value(p),
            StepKind::Generation(p) => serde_json::to_value(p),
            StepKind::LlmJudgeBinary(p) => serde_json::to_value(p),
            StepKind::DeduplicateTfIdf(p) => serde_json::to_value(p),
            StepKind::DeduplicateEmbed(p) => serde_json::to_value(p),
            StepKind::WordPosition(p) => serde_json::to_value(p),
        }
    }

    /// Provider whose credentials this step needs, if any.
    pub fn provider(&self) -> Option<&str> {
        match self {
            StepKind::Generation(p) => Some(&p.provider),
            StepKind::LlmJudgeBinary(p) => Some(&p.provider),
            StepKind::DeduplicateEmbed(p) => Some(&p.provider),
            _ => None,
        }
    }

    /// Templates rendered against node lineage by this step.
    pub fn templates(&self) -> Vec<&str> {
        match self {
            StepKind::Generation(p) => vec![p.template.as_str()],
            StepKind::LlmJudgeBinary(p) => p.criteria.iter().map(String::as_str).collect(),
            StepKind::WordPosition(p) => p.matches.values().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// Checks parameter ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |message: String| Err(ConfigError::ValidationFailed(message));

        match self {
            StepKind::Chunk(p) => {
                if p.size == 0 || p.size >= ChunkParameters::MAX_SIZE {
                    return fail(format!(
                        "chunk size must be between 1 and {}, got {}",
                        ChunkParameters::MAX_SIZE - 1,
                        p.size
                    ));
                }
            }
            StepKind::Separator(p) => {
                if p.separator.is_empty() {
                    return fail("separator cannot be empty".to_string());
                }
            }
            StepKind::Generation(p) => {
                if p.template.trim().is_empty() {
                    return fail("generation template cannot be empty".to_string());
                }
                validate_model_call(&p.model, p.temperature, p.batch_size)?;
                if let Some((category, _)) = p.instruction_sets.iter().find(|(_, v)| v.is_empty()) {
                    return fail(format!("instruction set '{}' is empty", category));
                }
            }
            StepKind::LlmJudgeBinary(p) => {
                if p.criteria.is_empty() {
                    return fail("ablation needs at least one criterion".to_string());
                }
                validate_model_call(&p.model, p.temperature, p.batch_size)?;
            }
            StepKind::DeduplicateTfIdf(p) => validate_threshold(p.similarity_threshold)?,
            StepKind::DeduplicateEmbed(p) => {
                if p.model.is_empty() {
                    return fail("embedding model cannot be empty".to_string());
                }
                validate_threshold(p.similarity_threshold)?;
            }
            StepKind::WordPosition(p) => {
                if p.matches.is_empty() {
                    return fail("word-position needs at least one match".to_string());
                }
            }
        }
        Ok(())
    }
}

fn validate_model_call(
    model: &str,
    temperature: Option<f64>,
    batch_size: usize,
) -> Result<(), ConfigError> {
    if model.is_empty() {
        return Err(ConfigError::ValidationFailed(
            "model cannot be empty".to_string(),
        ));
    }
    if let Some(t) = temperature {
        if !(0.0..=2.0).contains(&t) {
            return Err(ConfigError::ValidationFailed(format!(
                "temperature must be between 0.0 and 2.0, got {}",
                t
            )));
        }
    }
    if batch_size == 0 {
        return Err(ConfigError::ValidationFailed(
            "batch_size must be greater than 0".to_string(),
        ));
    }
    Ok(())
}

fn validate_threshold(threshold: f64) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(ConfigError::ValidationFailed(format!(
            "similarity_threshold must be between 0.0 and 1.0, got {}",
            threshold
        )));
    }
    Ok(())
}

/// On-disk shape of a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStep {
    #[serde(rename = "type")]
    step_type: String,
    method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default)]
    parameters: serde_json::Value,
}

/// A named, typed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawStep", into = "RawStep")]
pub struct StepConfig {
    /// Lineage key. Defaults to `{type}_{method}`.
    pub name: String,
    pub kind: StepKind,
}

impl StepConfig {
    pub fn new(kind: StepKind) -> Self {
        let name = format!("{}_{}", kind.step_type(), kind.method());
        Self { name, kind }
    }

    pub fn named(name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Restores a step from its persisted snapshot.
    pub fn from_snapshot(snapshot: &serde_json::Value) -> Result<Self, ConfigError> {
        let step: StepConfig = serde_json::from_value(snapshot.clone())?;
        step.kind.validate()?;
        Ok(step)
    }

    pub fn snapshot(&self) -> Result<serde_json::Value, ConfigError> {
        Ok(serde_json::to_value(self)?)
    }
}

impl TryFrom<RawStep> for StepConfig {
    type Error = ConfigError;

    fn try_from(raw: RawStep) -> Result<Self, Self::Error> {
        let kind = StepKind::from_parts(&raw.step_type, &raw.method, raw.parameters).map_err(
            |err| match err {
                ConfigError::Json(e) => ConfigError::ValidationFailed(format!(
                    "step '{}/{}': {}",
                    raw.step_type, raw.method, e
                )),
                other => other,
            },
        )?;
        Ok(match raw.name {
            Some(name) => StepConfig::named(name, kind),
            None => StepConfig::new(kind),
        })
    }
}

impl From<StepConfig> for RawStep {
    fn from(step: StepConfig) -> Self {
        RawStep {
            step_type: step.kind.step_type().to_string(),
            method: step.kind.method().to_string(),
            name: Some(step.name),
            // Parameter structs hold only strings, numbers and maps.
            parameters: step.kind.parameters().unwrap_or(serde_json::Value::Null),
        }
    }
}
