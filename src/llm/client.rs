//! OpenAI-compatible HTTP client.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::provider::{CompletionRequest, ModelProvider};
use crate::error::LlmError;
use crate::model::Provider;

/// Default request timeout.
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Base URLs of providers that need no `api_url`.
const KNOWN_PROVIDERS: &[(&str, &str)] = &[
    ("openai", "https://api.openai.com/v1"),
    ("mistral", "https://api.mistral.ai/v1"),
    ("openrouter", "https://openrouter.ai/api/v1"),
    ("groq", "https://api.groq.com/openai/v1"),
    ("ollama", "http://localhost:11434/v1"),
];

/// Resolves the API base URL for a stored provider.
pub fn base_url_for(provider: &Provider) -> Result<String, LlmError> {
    if let Some(url) = provider.api_url.as_deref().filter(|u| !u.is_empty()) {
        return Ok(url.trim_end_matches('/').to_string());
    }
    KNOWN_PROVIDERS
        .iter()
        .find(|(name, _)| *name == provider.name)
        .map(|(_, url)| url.to_string())
        .ok_or_else(|| LlmError::UnknownProvider(provider.name.clone()))
}

/// Retry schedule for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for each further attempt.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Client for OpenAI-compatible chat and embedding endpoints.
pub struct HttpModelProvider {
    http_client: Client,
    retry: RetryPolicy,
}

impl HttpModelProvider {
    pub fn new() -> Result<Self, LlmError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| LlmError::RequestFailed(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http_client,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Execute a single POST (no retry logic).
    async fn post_json<B, R>(&self, url: &str, api_key: &str, body: &B) -> Result<R, LlmError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let http_response = self
            .http_client
            .post(url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", api_key))
            .json(body)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = http_response.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            let error_text = http_response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());

            let message = serde_json::from_str::<ApiErrorResponse>(&error_text)
                .map(|e| e.error.message)
                .unwrap_or(error_text);

            if status_code == 429 {
                return Err(LlmError::RateLimited(message));
            }
            return Err(LlmError::ApiError {
                code: status_code,
                message,
            });
        }

        http_response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(format!("Failed to parse API response: {}", e)))
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> LlmError {
    if err.is_timeout() {
        LlmError::RequestFailed(format!("timeout: {}", err))
    } else if err.is_connect() {
        LlmError::RequestFailed(format!("connection error: {}", err))
    } else {
        LlmError::RequestFailed(err.to_string())
    }
}

/// Check if an error is transient and should be retried.
fn is_transient_error(error: &LlmError) -> bool {
    match error {
        LlmError::RequestFailed(msg) => {
            msg.contains("timeout") || msg.contains("connection") || msg.contains("temporarily")
        }
        LlmError::RateLimited(_) => true,
        LlmError::ApiError { code, .. } => *code >= 500 || *code == 429,
        _ => false,
    }
}

/// Runs `operation` with exponential backoff on transient errors.
async fn with_retry<T, F, Fut>(policy: RetryPolicy, operation: F) -> Result<T, LlmError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut last_error = None;

    for attempt in 0..policy.max_attempts.max(1) {
        if attempt > 0 {
            let delay = policy.base_delay * (1 << (attempt - 1));
            tokio::time::sleep(delay).await;
            tracing::debug!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "Retrying provider request after transient failure"
            );
        }

        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if is_transient_error(&err) => {
                tracing::warn!(
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts,
                    error = %err,
                    "Transient provider error, will retry"
                );
                last_error = Some(err);
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_error.unwrap_or_else(|| {
        LlmError::RequestFailed("Max retries exceeded with no error captured".to_string())
    }))
}

#[async_trait]
impl ModelProvider for HttpModelProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", base_url_for(&request.provider)?);
        let body = ChatRequest {
            model: request.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: request.prompt.clone(),
            }],
            temperature: request.temperature,
            response_format: request.response_schema.as_ref().map(|_| ResponseFormat {
                format_type: "json_object",
            }),
        };

        let response: ChatResponse = with_retry(self.retry, || {
            self.post_json(&url, &request.provider.api_key, &body)
        })
        .await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::ParseError("No content in provider response".to_string()))
    }

    async fn embed(
        &self,
        provider: &Provider,
        model: &str,
        inputs: &[String],
    ) -> Result<Vec<Vec<f64>>, LlmError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/embeddings", base_url_for(provider)?);
        let body = EmbeddingRequest { model, input: inputs };

        let mut response: EmbeddingResponse =
            with_retry(self.retry, || self.post_json(&url, &provider.api_key, &body)).await?;

        if response.data.len() != inputs.len() {
            return Err(LlmError::ParseError(format!(
                "expected {} embeddings, got {}",
                inputs.len(),
                response.data.len()
            )));
        }
        response.data.sort_by_key(|d| d.index);
        Ok(response.data.into_iter().map(|d| d.embedding).collect())
    }
}
