//! Pipeline definition file.
//!
//! ```yaml
//! input:
//!   type: csv
//!   properties:
//!     path: tests/data/source.csv
//!     target_column: content
//!     separator: ";"
//! pipeline:
//!   - type: split
//!     method: chunk
//!     parameters:
//!       size: 500
//!   - type: generation
//!     method: llm
//!     parameters:
//!       template: "Ask a question about: {split_chunk}"
//! output:
//!   type: csv
//!   properties:
//!     path: output.csv
//!     columns: [value, ablated]
//! ```

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::model::SOURCE_LINEAGE_KEY;
use crate::steps::template::{template_variables, INSTRUCTIONS_VARIABLE};

use super::steps::{StepConfig, StepKind};

fn default_csv_separator() -> String {
    ";".to_string()
}

fn default_columns() -> Vec<OutputColumn> {
    vec![OutputColumn::Value]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CsvInputProperties {
    pub path: PathBuf,
    pub target_column: String,
    #[serde(default = "default_csv_separator")]
    pub separator: String,
    /// Only the first `limit` rows are loaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// Source of the initial nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "properties", rename_all = "lowercase")]
pub enum InputConfig {
    Csv(CsvInputProperties),
}

/// Node attribute written as an output column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputColumn {
    Value,
    Ablated,
    Metadata,
}

impl OutputColumn {
    pub fn header(&self) -> &'static str {
        match self {
            OutputColumn::Value => "value",
            OutputColumn::Ablated => "ablated",
            OutputColumn::Metadata => "metadata",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CsvOutputProperties {
    pub path: PathBuf,
    #[serde(default = "default_csv_separator")]
    pub separator: String,
    #[serde(default = "default_columns")]
    pub columns: Vec<OutputColumn>,
    #[serde(default)]
    pub overwrite: bool,
}

/// Destination of the final nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "properties", rename_all = "lowercase")]
pub enum OutputConfig {
    Csv(CsvOutputProperties),
}

/// A validated pipeline file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineDefinition {
    pub input: InputConfig,
    pub pipeline: Vec<StepConfig>,
    pub output: OutputConfig,
}

impl PipelineDefinition {
    /// Reads, parses and fully validates a pipeline file, including the
    /// input and output paths.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let definition = Self::from_yaml_str(&content)?;
        definition.check_paths()?;
        Ok(definition)
    }

    /// Parses and validates a pipeline definition without touching the filesystem.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let definition: PipelineDefinition = serde_yaml::from_str(content)?;
        definition.validate()?;
        Ok(definition)
    }

    /// Restores the definition stored with a run.
    pub fn from_snapshot(snapshot: &serde_json::Value) -> Result<Self, ConfigError> {
        let definition: PipelineDefinition = serde_json::from_value(snapshot.clone())?;
        definition.validate()?;
        Ok(definition)
    }

    pub fn snapshot(&self) -> Result<serde_json::Value, ConfigError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Structural validation: parameters, names and template references.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.input {
            InputConfig::Csv(p) => {
                validate_separator(&p.separator)?;
                if p.target_column.is_empty() {
                    return Err(ConfigError::ValidationFailed(
                        "target_column cannot be empty".to_string(),
                    ));
                }
            }
        }

        match &self.output {
            OutputConfig::Csv(p) => {
                validate_separator(&p.separator)?;
                if p.columns.is_empty() {
                    return Err(ConfigError::ValidationFailed(
                        "output needs at least one column".to_string(),
                    ));
                }
            }
        }

        let mut known: HashSet<&str> = HashSet::from([SOURCE_LINEAGE_KEY]);
        for step in &self.pipeline {
            step.kind.validate().map_err(|e| match e {
                ConfigError::ValidationFailed(msg) => {
                    ConfigError::ValidationFailed(format!("step '{}': {}", step.name, msg))
                }
                other => other,
            })?;

            if step.name.is_empty() {
                return Err(ConfigError::ValidationFailed(
                    "step name cannot be empty".to_string(),
                ));
            }
            if step.name == SOURCE_LINEAGE_KEY || step.name == INSTRUCTIONS_VARIABLE {
                return Err(ConfigError::ValidationFailed(format!(
                    "step name '{}' is reserved",
                    step.name
                )));
            }

            let allows_instructions = matches!(step.kind, StepKind::Generation(_));
            for template in step.kind.templates() {
                for variable in template_variables(template) {
                    let resolvable = known.contains(variable.as_str())
                        || (allows_instructions && variable == INSTRUCTIONS_VARIABLE);
                    if !resolvable {
                        return Err(ConfigError::ValidationFailed(format!(
                            "step '{}': template variable '{{{}}}' does not name an earlier step",
                            step.name, variable
                        )));
                    }
                }
            }

            if !known.insert(step.name.as_str()) {
                return Err(ConfigError::ValidationFailed(format!(
                    "duplicate step name '{}'",
                    step.name
                )));
            }
        }

        Ok(())
    }

    /// Filesystem checks only meaningful for a fresh run.
    pub fn check_paths(&self) -> Result<(), ConfigError> {
        match &self.input {
            InputConfig::Csv(p) => {
                if !p.path.is_file() {
                    return Err(ConfigError::ValidationFailed(format!(
                        "source file does not exist: {}",
                        p.path.display()
                    )));
                }
            }
        }
        match &self.output {
            OutputConfig::Csv(p) => {
                if p.path.exists() && !p.overwrite {
                    return Err(ConfigError::ValidationFailed(format!(
                        "output file already exists: {}",
                        p.path.display()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Providers that must have stored credentials.
    pub fn required_providers(&self) -> BTreeSet<&str> {
        self.pipeline
            .iter()
            .filter_map(|step| step.kind.provider())
            .collect()
    }
}

fn validate_separator(separator: &str) -> Result<(), ConfigError> {
    if separator.len() != 1 || !separator.is_ascii() {
        return Err(ConfigError::ValidationFailed(format!(
            "CSV separator must be a single ASCII character, got '{}'",
            separator
        )));
    }
    Ok(())
}
