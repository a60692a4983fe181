//! Capability interfaces for paid external providers (LLM completion and
//! text embedding) and their shared error taxonomy.
//!
//! Concrete HTTP clients live outside this crate; the funnel only depends
//! on these traits so every stage can be driven by test doubles.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::ScenarioId;

/// Failure of an external provider call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    /// Call did not finish inside its time budget.
    #[error("Provider timed out after {0:?}")]
    Timeout(Duration),

    /// Network/transport failure before a response arrived.
    #[error("Transport failure: {0}")]
    Transport(String),

    /// Non-2xx response.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Provider throttled the request.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Response arrived but could not be interpreted.
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// Provider is not configured (missing key, endpoint, etc.).
    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Whether trying the same or another provider may succeed.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Transport(_) | Self::RateLimited(_) => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            Self::Malformed(_) | Self::NotConfigured(_) => false,
        }
    }

    /// Short machine-friendly label for logs and cost rows.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Transport(_) => "transport",
            Self::Http { .. } => "http",
            Self::RateLimited(_) => "rate_limited",
            Self::Malformed(_) => "malformed",
            Self::NotConfigured(_) => "not_configured",
        }
    }
}

/// Generation options for a completion call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    /// Optional system instruction prepended by the provider client.
    pub system_prompt: Option<String>,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 300,
            system_prompt: None,
        }
    }
}

/// Completion text plus the token usage reported by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A remote language model.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name as written to cost rows (e.g. `"yandex"`).
    fn name(&self) -> &str;

    /// Model identifier as written to cost rows.
    fn model(&self) -> &str;

    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<Completion, ProviderError>;
}

/// Embedding vector plus usage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub input_tokens: u64,
}

/// Embedding model plus nearest-neighbour lookup over precomputed
/// scenario embeddings.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Embedding, ProviderError>;

    /// Top-`k` scenarios by cosine similarity, best first.
    async fn nearest(
        &self,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<(ScenarioId, f32)>, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_classification() {
        assert!(ProviderError::Timeout(Duration::from_secs(1)).is_retriable());
        assert!(ProviderError::Transport("reset".into()).is_retriable());
        assert!(ProviderError::Http {
            status: 503,
            body: String::new()
        }
        .is_retriable());
        assert!(ProviderError::Http {
            status: 429,
            body: String::new()
        }
        .is_retriable());
        assert!(!ProviderError::Http {
            status: 401,
            body: String::new()
        }
        .is_retriable());
        assert!(!ProviderError::Malformed("no text".into()).is_retriable());
    }

    #[test]
    fn test_error_kind_labels() {
        assert_eq!(ProviderError::RateLimited("x".into()).kind(), "rate_limited");
        assert_eq!(
            ProviderError::Timeout(Duration::from_millis(5)).to_string(),
            "Provider timed out after 5ms"
        );
    }
}
