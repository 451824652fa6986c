//! Voyage embeddings
//!
//! One client serves two routed families: voyage-4-large for the Brazilian
//! collections and voyage-law-2 for the EU ones. The API distinguishes
//! document and query inputs via `input_type`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use lexrag_core::ProviderName;

use super::{EmbedError, EmbeddingProvider, InputType};

/// Voyage embedding configuration
#[derive(Debug, Clone)]
pub struct VoyageConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub dimensions: usize,
    pub max_batch_size: usize,
}

impl VoyageConfig {
    /// voyage-4-large, the Brazilian-collection default
    pub fn v4() -> Self {
        use lexrag_config::constants::{dimensions, endpoints, models};
        Self {
            endpoint: endpoints::VOYAGE_DEFAULT.to_string(),
            model: models::VOYAGE_V4.to_string(),
            api_key: None,
            dimensions: dimensions::VOYAGE,
            max_batch_size: 128,
        }
    }

    /// voyage-law-2, the EU-collection default
    pub fn law() -> Self {
        Self {
            model: lexrag_config::constants::models::VOYAGE_LAW.to_string(),
            ..Self::v4()
        }
    }
}

#[derive(Serialize)]
struct VoyageRequest<'a> {
    model: &'a str,
    input: &'a [String],
    input_type: &'a str,
}

#[derive(Deserialize)]
struct VoyageResponse {
    data: Vec<VoyageRow>,
}

#[derive(Deserialize)]
struct VoyageRow {
    index: usize,
    embedding: Vec<f32>,
}

/// Voyage embedding provider
pub struct VoyageProvider {
    name: ProviderName,
    config: VoyageConfig,
    client: Client,
}

impl VoyageProvider {
    pub fn v4(config: VoyageConfig, client: Client) -> Self {
        Self {
            name: ProviderName::VoyageV4,
            config,
            client,
        }
    }

    pub fn law(config: VoyageConfig, client: Client) -> Self {
        Self {
            name: ProviderName::VoyageLaw,
            config,
            client,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for VoyageProvider {
    fn name(&self) -> ProviderName {
        self.name
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
        let body = VoyageRequest {
            model: &self.config.model,
            input: texts,
            input_type: input_type.as_str(),
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

        let parsed: VoyageResponse = response
            .json()
            .await
            .map_err(|e| EmbedError::Fatal(format!("bad embeddings payload: {e}")))?;

        if parsed.data.is_empty() {
            return Err(EmbedError::EmptyResponse);
        }

        let mut rows = parsed.data;
        rows.sort_by_key(|r| r.index);
        Ok(rows.into_iter().map(|r| r.embedding).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v4_and_law_share_dimension() {
        assert_eq!(VoyageConfig::v4().dimensions, 1024);
        assert_eq!(VoyageConfig::law().dimensions, 1024);
        assert_ne!(VoyageConfig::v4().model, VoyageConfig::law().model);
    }

    #[test]
    fn test_input_type_serialized() {
        let input = vec!["texto".to_string()];
        let body = VoyageRequest {
            model: "voyage-4-large",
            input: &input,
            input_type: InputType::Query.as_str(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["input_type"], "query");
    }
}
