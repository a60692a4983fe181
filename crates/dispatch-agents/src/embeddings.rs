//! OpenAI-compatible `/embeddings` client backed by a precomputed
//! scenario index file.
//!
//! The index is a JSON document `{"entries": [{"scenario_id": 1,
//! "vector": [...]}, ...]}` built offline with the same model.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use funnel::matchers::vector::ScenarioIndex;
use funnel::{Embedding, EmbeddingProvider, ProviderError, ScenarioId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::EmbeddingEndpoint;
use crate::providers::{build_client, check_status, lenient_u64, map_transport};

pub const PROVIDER_NAME: &str = "openai-embeddings";

#[derive(Debug, thiserror::Error)]
pub enum IndexLoadError {
    #[error("Failed to read embedding index {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Embedding index is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

pub fn load_index(path: &Path) -> Result<ScenarioIndex, IndexLoadError> {
    let text = std::fs::read_to_string(path).map_err(|source| IndexLoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let index = ScenarioIndex::from_json(&text)?;
    info!(path = %path.display(), entries = index.len(), "Loaded embedding index");
    Ok(index)
}

pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    endpoint: EmbeddingEndpoint,
    index: ScenarioIndex,
    timeout: Duration,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default, deserialize_with = "lenient_u64")]
    prompt_tokens: u64,
}

pub fn parse_embedding(body: &str) -> Result<Embedding, ProviderError> {
    let response: EmbeddingResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Malformed(e.to_string()))?;
    let vector = response
        .data
        .into_iter()
        .next()
        .map(|d| d.embedding)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ProviderError::Malformed("empty embedding in response".into()))?;
    Ok(Embedding {
        vector,
        input_tokens: response.usage.prompt_tokens,
    })
}

impl HttpEmbeddingProvider {
    pub fn new(
        endpoint: EmbeddingEndpoint,
        index: ScenarioIndex,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_client(timeout)?,
            endpoint,
            index,
            timeout,
        })
    }

    fn url(&self) -> String {
        format!("{}/embeddings", self.endpoint.url.trim_end_matches('/'))
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn model(&self) -> &str {
        &self.endpoint.model
    }

    async fn embed(&self, text: &str) -> Result<Embedding, ProviderError> {
        debug!(provider = PROVIDER_NAME, model = %self.endpoint.model, "Requesting embedding");
        let response = self
            .client
            .post(self.url())
            .bearer_auth(&self.endpoint.api_key)
            .json(&EmbeddingRequest {
                model: &self.endpoint.model,
                input: text,
            })
            .send()
            .await
            .map_err(|e| map_transport(e, self.timeout))?;
        let body = check_status(response)
            .await?
            .text()
            .await
            .map_err(|e| map_transport(e, self.timeout))?;
        parse_embedding(&body)
    }

    async fn nearest(
        &self,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<(ScenarioId, f32)>, ProviderError> {
        Ok(self.index.nearest(vector, k))
    }
}
