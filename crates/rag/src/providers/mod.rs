//! Embedding providers
//!
//! Uniform contract over four provider families. The trait supplies the
//! shared semantics every caller relies on: input order is preserved,
//! zero-length texts embed to zero vectors instead of erroring, oversize
//! batches are split transparently, and quota errors are retried with
//! exponential backoff before anything propagates.

pub mod jurisbert;
pub mod kanon;
pub mod openai;
pub mod voyage;

pub use jurisbert::JurisBertProvider;
pub use kanon::KanonProvider;
pub use openai::OpenAiProvider;
pub use voyage::VoyageProvider;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use lexrag_core::ProviderName;

use crate::RagError;

/// Whether a text is being embedded for storage or for querying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputType {
    Document,
    Query,
}

impl InputType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputType::Document => "document",
            InputType::Query => "query",
        }
    }
}

/// Provider-internal error classification, used to drive retry policy
#[derive(Debug, Clone, PartialEq)]
pub enum EmbedError {
    /// Surfaced immediately
    Network(String),
    /// Retried with exponential backoff, at most 3 attempts
    Quota(String),
    /// Transient on first occurrence, fatal thereafter
    EmptyResponse,
    /// Never retried
    Fatal(String),
}

impl EmbedError {
    fn into_rag_error(self, provider: ProviderName) -> RagError {
        let name = provider.as_str();
        match self {
            EmbedError::Network(m) => RagError::Embedding(format!("{name}: network error: {m}")),
            EmbedError::Quota(m) => RagError::Embedding(format!("{name}: quota exhausted: {m}")),
            EmbedError::EmptyResponse => {
                RagError::Embedding(format!("{name}: empty embedding response"))
            },
            EmbedError::Fatal(m) => RagError::Embedding(format!("{name}: {m}")),
        }
    }
}

const QUOTA_MAX_ATTEMPTS: u32 = 3;
const QUOTA_INITIAL_BACKOFF: Duration = Duration::from_millis(200);

/// Uniform embedding contract
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> ProviderName;

    /// Fixed output dimension; part of the contract so dimension
    /// mismatches are caught at the routing boundary, not in the store
    fn dimensions(&self) -> usize;

    fn max_batch_size(&self) -> usize;

    fn default_input_types(&self) -> &'static [InputType] {
        &[InputType::Document, InputType::Query]
    }

    /// One raw API call over at most `max_batch_size` non-empty texts.
    /// Implementations return exactly one vector per input, in order.
    async fn embed_request(
        &self,
        texts: &[String],
        input_type: InputType,
    ) -> Result<Vec<Vec<f32>>, EmbedError>;

    /// Batch embedding with the shared semantics. Callers use this; the
    /// raw request is an implementation seam.
    async fn embed_batch(
        &self,
        texts: &[String],
        input_type: InputType,
    ) -> Result<Vec<Vec<f32>>, RagError> {
        let dims = self.dimensions();
        let mut out: Vec<Option<Vec<f32>>> = vec![None; texts.len()];

        // Zero-length input yields a zero vector, never an error
        let mut pending: Vec<(usize, String)> = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            if text.trim().is_empty() {
                out[i] = Some(vec![0.0; dims]);
            } else {
                pending.push((i, text.clone()));
            }
        }

        for window in pending.chunks(self.max_batch_size().max(1)) {
            let batch: Vec<String> = window.iter().map(|(_, t)| t.clone()).collect();
            let vectors = self.embed_with_retry(&batch, input_type).await?;
            if vectors.len() != batch.len() {
                return Err(RagError::Embedding(format!(
                    "{}: expected {} vectors, got {}",
                    self.name().as_str(),
                    batch.len(),
                    vectors.len()
                )));
            }
            for ((slot, _), vector) in window.iter().zip(vectors) {
                if vector.len() != dims {
                    return Err(RagError::Embedding(format!(
                        "{}: provider returned {}d vector, contract is {}d",
                        self.name().as_str(),
                        vector.len(),
                        dims
                    )));
                }
                out[*slot] = Some(vector);
            }
        }

        Ok(out.into_iter().map(|v| v.unwrap_or_default()).collect())
    }

    /// Retry wrapper: quota errors back off exponentially; one empty
    /// response is tolerated; network errors surface immediately.
    async fn embed_with_retry(
        &self,
        texts: &[String],
        input_type: InputType,
    ) -> Result<Vec<Vec<f32>>, RagError> {
        let mut quota_attempts = 0u32;
        let mut empty_seen = false;
        let mut backoff = QUOTA_INITIAL_BACKOFF;

        loop {
            match self.embed_request(texts, input_type).await {
                Ok(vectors) => return Ok(vectors),
                Err(EmbedError::Quota(msg)) if quota_attempts + 1 < QUOTA_MAX_ATTEMPTS => {
                    quota_attempts += 1;
                    tracing::warn!(
                        provider = self.name().as_str(),
                        attempt = quota_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        msg,
                        "quota error, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                },
                Err(EmbedError::EmptyResponse) if !empty_seen => {
                    empty_seen = true;
                    tracing::warn!(
                        provider = self.name().as_str(),
                        "empty embedding response, retrying once"
                    );
                },
                Err(err) => return Err(err.into_rag_error(self.name())),
            }
        }
    }
}

/// Registry of long-lived provider instances, resolved by the router at
/// routing time
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderName, Arc<dyn EmbeddingProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn EmbeddingProvider>) {
        self.providers.insert(provider.name(), provider);
    }

    pub fn get(&self, name: ProviderName) -> Result<Arc<dyn EmbeddingProvider>, RagError> {
        self.providers.get(&name).cloned().ok_or_else(|| {
            RagError::Routing(format!("no provider registered for {}", name.as_str()))
        })
    }

    pub fn contains(&self, name: ProviderName) -> bool {
        self.providers.contains_key(&name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Deterministic in-process provider for contract tests
    struct StubProvider {
        dims: usize,
        max_batch: usize,
        fail_quota: Mutex<u32>,
        fail_empty: Mutex<u32>,
        calls: Mutex<Vec<usize>>,
    }

    impl StubProvider {
        fn new(dims: usize, max_batch: usize) -> Self {
            Self {
                dims,
                max_batch,
                fail_quota: Mutex::new(0),
                fail_empty: Mutex::new(0),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for StubProvider {
        fn name(&self) -> ProviderName {
            ProviderName::Openai
        }

        fn dimensions(&self) -> usize {
            self.dims
        }

        fn max_batch_size(&self) -> usize {
            self.max_batch
        }

        async fn embed_request(
            &self,
            texts: &[String],
            _input_type: InputType,
        ) -> Result<Vec<Vec<f32>>, EmbedError> {
            {
                let mut q = self.fail_quota.lock();
                if *q > 0 {
                    *q -= 1;
                    return Err(EmbedError::Quota("429".into()));
                }
            }
            {
                let mut e = self.fail_empty.lock();
                if *e > 0 {
                    *e -= 1;
                    return Err(EmbedError::EmptyResponse);
                }
            }
            self.calls.lock().push(texts.len());
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0; self.dims];
                    v[0] = t.len() as f32;
                    v
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn test_zero_length_text_yields_zero_vector() {
        let provider = StubProvider::new(4, 8);
        let texts = vec!["abc".to_string(), "".to_string(), "de".to_string()];
        let vectors = provider
            .embed_batch(&texts, InputType::Document)
            .await
            .unwrap();
        assert_eq!(vectors.len(), 3);
        assert_eq!(vectors[1], vec![0.0; 4]);
        assert_eq!(vectors[0][0], 3.0);
        assert_eq!(vectors[2][0], 2.0);
    }

    #[tokio::test]
    async fn test_batches_split_and_order_preserved() {
        let provider = StubProvider::new(2, 2);
        let texts: Vec<String> = (1..=5).map(|i| "x".repeat(i)).collect();
        let vectors = provider
            .embed_batch(&texts, InputType::Document)
            .await
            .unwrap();
        for (i, v) in vectors.iter().enumerate() {
            assert_eq!(v[0], (i + 1) as f32);
        }
        let calls = provider.calls.lock().clone();
        assert_eq!(calls, vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn test_quota_retried_then_succeeds() {
        let provider = StubProvider::new(2, 8);
        *provider.fail_quota.lock() = 2;
        let texts = vec!["abc".to_string()];
        let vectors = provider
            .embed_batch(&texts, InputType::Query)
            .await
            .unwrap();
        assert_eq!(vectors.len(), 1);
    }

    #[tokio::test]
    async fn test_quota_exhausted_surfaces() {
        let provider = StubProvider::new(2, 8);
        *provider.fail_quota.lock() = 10;
        let texts = vec!["abc".to_string()];
        let err = provider.embed_batch(&texts, InputType::Query).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_empty_response_transient_once() {
        let provider = StubProvider::new(2, 8);
        *provider.fail_empty.lock() = 1;
        let texts = vec!["abc".to_string()];
        assert!(provider.embed_batch(&texts, InputType::Query).await.is_ok());

        *provider.fail_empty.lock() = 2;
        assert!(provider.embed_batch(&texts, InputType::Query).await.is_err());
    }

    #[tokio::test]
    async fn test_registry_resolution() {
        let mut registry = ProviderRegistry::new();
        assert!(!registry.contains(ProviderName::Openai));
        registry.register(Arc::new(StubProvider::new(2, 8)));
        assert!(registry.contains(ProviderName::Openai));
        assert!(registry.get(ProviderName::Kanon2).is_err());
    }
}
