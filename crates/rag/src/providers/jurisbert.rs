//! JurisBERT embeddings
//!
//! Legacy Brazilian provider (768d) backing the `legal_br` collection,
//! served by a local inference server rather than a SaaS API. Kept for
//! legacy reads and for `migrate_collection` sources.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use lexrag_core::ProviderName;

use super::{EmbedError, EmbeddingProvider, InputType};

/// JurisBERT embedding configuration
#[derive(Debug, Clone)]
pub struct JurisBertConfig {
    /// Local inference server endpoint
    pub endpoint: String,
    pub model: String,
    pub dimensions: usize,
    pub max_batch_size: usize,
}

impl Default for JurisBertConfig {
    fn default() -> Self {
        use lexrag_config::constants::{dimensions, endpoints, models};
        Self {
            endpoint: endpoints::JURISBERT_DEFAULT.to_string(),
            model: models::JURISBERT.to_string(),
            dimensions: dimensions::JURISBERT,
            max_batch_size: 64,
        }
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    texts: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// JurisBERT embedding provider
pub struct JurisBertProvider {
    config: JurisBertConfig,
    client: Client,
}

impl JurisBertProvider {
    pub fn new(config: JurisBertConfig, client: Client) -> Self {
        Self { config, client }
    }
}

#[async_trait]
impl EmbeddingProvider for JurisBertProvider {
    fn name(&self) -> ProviderName {
        ProviderName::Jurisbert
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
        let url = format!("{}/embed", self.config.endpoint.trim_end_matches('/'));
        let body = EmbedRequest {
            model: &self.config.model,
            texts,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbedError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(EmbedError::Network(status.to_string()));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(EmbedError::Fatal(format!("{status}: {detail}")));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbedError::Fatal(format!("bad embeddings payload: {e}")))?;

        if parsed.embeddings.is_empty() {
            return Err(EmbedError::EmptyResponse);
        }
        Ok(parsed.embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = JurisBertConfig::default();
        assert_eq!(config.dimensions, 768);
        assert!(config.endpoint.starts_with("http://localhost"));
    }
}
