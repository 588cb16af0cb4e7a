//! Error types for synda operations.
//!
//! Subsystems with a storage or execution core keep their own error enums
//! next to the code (`DatabaseError`, `CacheError`, `ExecutorError`,
//! `PipelineError`). This module holds the errors shared by the outer
//! collaborators:
//! - Model provider calls
//! - Configuration loading and validation
//! - Input loading and output saving

use thiserror::Error;

/// Errors that can occur while talking to a model provider.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("No credentials configured for provider '{0}'")]
    MissingCredentials(String),

    #[error("Unknown provider '{0}': register an API URL with `synda provider update`")]
    UnknownProvider(String),

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse provider response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while loading settings or a pipeline definition.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// The pipeline definition is structurally invalid.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// A step references a `type`/`method` pair that does not exist.
    #[error("Unknown step '{step_type}' with method '{method}'")]
    UnknownStep { step_type: String, method: String },

    /// Steps reference providers that have no stored credentials.
    #[error("Missing provider(s): {0}")]
    MissingProvider(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur while loading input records.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("Source file does not exist: {0}")]
    MissingFile(String),

    #[error("Target column '{column}' not found. Available columns: {available}")]
    MissingColumn { column: String, available: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] crate::storage::DatabaseError),
}

/// Errors that can occur while saving final records.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Output file already exists: {0}")]
    AlreadyExists(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_error_messages() {
        let err = LlmError::ApiError {
            code: 503,
            message: "overloaded".to_string(),
        };
        assert_eq!(err.to_string(), "API error (503): overloaded");

        let err = LlmError::MissingCredentials("mistral".to_string());
        assert!(err.to_string().contains("mistral"));
    }

    #[test]
    fn test_config_error_unknown_step() {
        let err = ConfigError::UnknownStep {
            step_type: "split".to_string(),
            method: "sentence".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Unknown step 'split' with method 'sentence'"
        );
    }

    #[test]
    fn test_input_error_missing_column() {
        let err = InputError::MissingColumn {
            column: "text".to_string(),
            available: "id, body".to_string(),
        };
        assert!(err.to_string().contains("'text'"));
        assert!(err.to_string().contains("id, body"));
    }
}
