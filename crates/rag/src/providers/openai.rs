//! OpenAI embeddings
//!
//! Serves the GENERAL route and every legacy collection, which all carry
//! text-embedding-3-large vectors.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use lexrag_core::ProviderName;

use super::{EmbedError, EmbeddingProvider, InputType};

/// OpenAI embedding configuration
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub dimensions: usize,
    pub max_batch_size: usize,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        use lexrag_config::constants::{dimensions, endpoints, models};
        Self {
            endpoint: endpoints::OPENAI_DEFAULT.to_string(),
            model: models::OPENAI_EMBEDDING.to_string(),
            api_key: None,
            dimensions: dimensions::OPENAI,
            max_batch_size: 256,
        }
    }
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    index: usize,
    embedding: Vec<f32>,
}

/// OpenAI embedding provider
pub struct OpenAiProvider {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiConfig, client: Client) -> Self {
        Self { config, client }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    fn name(&self) -> ProviderName {
        ProviderName::Openai
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    fn max_batch_size(&self) -> usize {
        self.config.max_batch_size
    }

    async fn embed_request(
        &self,
        texts: &[String],
        _input_type: InputType,
    ) -> Result<Vec<Vec<f32>>, EmbedError> {
        let url = format!("{}/embeddings", self.config.endpoint.trim_end_matches('/'));
        let body = EmbeddingsRequest {
            model: &self.config.model,
            input: texts,
        };

        let mut request = self.client.post(&url).json(&body);
        if let Some(ref key) = self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| EmbedError::Network(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(EmbedError::Quota(status.to_string()));
        }
        if status.is_server_error() {
            return Err(EmbedError::Network(status.to_string()));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(EmbedError::Fatal(format!("{status}: {detail}")));
        }

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| EmbedError::Fatal(format!("bad embeddings payload: {e}")))?;

        if parsed.data.is_empty() {
            return Err(EmbedError::EmptyResponse);
        }

        // The API is index-annotated; restore request order explicitly
        let mut rows = parsed.data;
        rows.sort_by_key(|r| r.index);
        Ok(rows.into_iter().map(|r| r.embedding).collect())
    }
}
