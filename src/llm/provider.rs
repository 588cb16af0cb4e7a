use async_trait::async_trait;
use futures::future::join_all;

use crate::error::LlmError;
use crate::model::Provider;

/// One prompt sent to a model.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub provider: Provider,
    pub model: String,
    pub prompt: String,
    /// JSON schema the answer must follow. Requests a JSON object response.
    pub response_schema: Option<serde_json::Value>,
    pub temperature: Option<f64>,
}

impl CompletionRequest {
    pub fn new(provider: Provider, model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            prompt: prompt.into(),
            response_schema: None,
            temperature: None,
        }
    }

    pub fn with_response_schema(mut self, schema: serde_json::Value) -> Self {
        self.response_schema = Some(schema);
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f64>) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Trait for model providers used by step executors.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Returns the text of the first completion choice.
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError>;

    /// Runs all requests concurrently.
    ///
    /// Results are returned in request order and each request fails on its
    /// own: one error does not cancel the others.
    async fn complete_batch(
        &self,
        requests: Vec<CompletionRequest>,
    ) -> Vec<Result<String, LlmError>> {
        join_all(requests.into_iter().map(|request| self.complete(request))).await
    }

    /// Embeds each input, returning vectors in input order.
    async fn embed(
        &self,
        provider: &Provider,
        model: &str,
        inputs: &[String],
    ) -> Result<Vec<Vec<f64>>, LlmError>;
}
