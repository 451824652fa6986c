//! Kanon 2 embeddings
//!
//! Serves the international collection (US/UK/INT routes). The API takes a
//! task string instead of an input_type field.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use lexrag_core::ProviderName;

use super::{EmbedError, EmbeddingProvider, InputType};

/// Kanon embedding configuration
#[derive(Debug, Clone)]
pub struct KanonConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub dimensions: usize,
    pub max_batch_size: usize,
}

impl Default for KanonConfig {
    fn default() -> Self {
        use lexrag_config::constants::{dimensions, endpoints, models};
        Self {
            endpoint: endpoints::KANON_DEFAULT.to_string(),
            model: models::KANON2.to_string(),
            api_key: None,
            dimensions: dimensions::KANON2,
            max_batch_size: 96,
        }
    }
}

#[derive(Serialize)]
struct KanonRequest<'a> {
    model: &'a str,
    texts: &'a [String],
    task: &'a str,
}

#[derive(Deserialize)]
struct KanonResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Kanon 2 embedding provider
pub struct KanonProvider {
    config: KanonConfig,
    client: Client,
}

impl KanonProvider {
    pub fn new(config: KanonConfig, client: Client) -> Self {
        Self { config, client }
    }

    fn task_for(input_type: InputType) -> &'static str {
        match input_type {
            InputType::Document => "retrieval/document",
            InputType::Query => "retrieval/query",
        }
    }
}

#[async_trait]
impl EmbeddingProvider for KanonProvider {
    fn name(&self) -> ProviderName {
        ProviderName::Kanon2
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
        input_type: InputType,
    ) -> Result<Vec<Vec<f32>>, EmbedError> {
        let url = format!("{}/embeddings", self.config.endpoint.trim_end_matches('/'));
        let body = KanonRequest {
            model: &self.config.model,
            texts,
            task: Self::task_for(input_type),
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

        let parsed: KanonResponse = response
            .json()
            .await
            .map_err(|e| EmbedError::Fatal(format!("bad embeddings payload: {e}")))?;

        if parsed.embeddings.is_empty() {
            return Err(EmbedError::EmptyResponse);
        }
        Ok(parsed.embeddings)
    }
}
