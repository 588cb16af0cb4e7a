//! Model provider integration.
//!
//! Steps talk to language models through the [`ModelProvider`] trait. The
//! production implementation, [`HttpModelProvider`], speaks the
//! OpenAI-compatible chat completion and embedding APIs and resolves the
//! base URL from the stored [`Provider`](crate::model::Provider) record.
//!
//! ```ignore
//! use synda::llm::{CompletionRequest, HttpModelProvider, ModelProvider};
//!
//! let client = HttpModelProvider::new()?;
//! let provider = db.get_provider("openai").await?.ok_or(...)?;
//! let answer = client
//!     .complete(CompletionRequest::new(provider, "gpt-4o-mini", "Say hi"))
//!     .await?;
//! ```
//!
//! Transient failures (timeouts, connection errors, HTTP 429 and 5xx) are
//! retried with exponential backoff before the error reaches the step.

mod client;
mod provider;

pub use client::{base_url_for, HttpModelProvider, RetryPolicy};
pub use provider::{CompletionRequest, ModelProvider};
