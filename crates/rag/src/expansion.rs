//! Query expansion
//!
//! Two independent LLM-driven strategies, both optional and both cached:
//!
//! - HyDE: generate a plausible answer paragraph and embed query+paragraph
//!   for the vector leg only; the lexical leg always sees the raw query.
//! - Multi-query: generate N reformulations that fan out through the full
//!   hybrid search and merge by RRF.
//!
//! Caches are keyed by SHA-256 of the normalized query with a one-hour TTL
//! so repeated questions stop paying LLM latency.

use std::sync::Arc;
use std::time::Duration;

use lexrag_llm::{hyde_prompt, multiquery_prompt, parse_variant_list, rewrite_prompt, LlmBackend};

use crate::cache::{CacheStats, LruTtlCache};
use crate::RagError;

/// Expansion configuration
#[derive(Debug, Clone)]
pub struct ExpansionConfig {
    /// Number of multi-query variants requested
    pub max_variants: usize,
    pub cache_capacity: usize,
    pub cache_ttl: Duration,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        use lexrag_config::constants::rag;
        Self {
            max_variants: rag::MULTIQUERY_MAX,
            cache_capacity: rag::EXPANSION_CACHE_CAPACITY,
            cache_ttl: Duration::from_secs(rag::EXPANSION_CACHE_TTL_SECS),
        }
    }
}

/// LLM-backed query expander
pub struct QueryExpander {
    config: ExpansionConfig,
    llm: Option<Arc<dyn LlmBackend>>,
    hyde_cache: LruTtlCache<String>,
    variant_cache: LruTtlCache<Vec<String>>,
}

impl QueryExpander {
    pub fn new(config: ExpansionConfig) -> Self {
        let hyde_cache = LruTtlCache::new(config.cache_capacity, Some(config.cache_ttl));
        let variant_cache = LruTtlCache::new(config.cache_capacity, Some(config.cache_ttl));
        Self {
            config,
            llm: None,
            hyde_cache,
            variant_cache,
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmBackend>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn has_llm(&self) -> bool {
        self.llm.is_some()
    }

    /// HyDE hypothetical document for a query. `None` when no LLM is
    /// attached; errors propagate so the caller can degrade the stage.
    pub async fn hypothetical_document(&self, query: &str) -> Result<Option<String>, RagError> {
        let llm = match self.llm {
            Some(ref llm) => Arc::clone(llm),
            None => return Ok(None),
        };

        let key = LruTtlCache::<String>::key_for(query);
        if let Some(cached) = self.hyde_cache.get(&key) {
            return Ok(Some(cached));
        }

        let result = llm
            .generate(&hyde_prompt(query))
            .await
            .map_err(|e| RagError::Search(format!("hyde generation failed: {e}")))?;

        let document = result.text.trim().to_string();
        if document.is_empty() {
            return Ok(None);
        }
        self.hyde_cache.insert(key, document.clone());
        Ok(Some(document))
    }

    /// Multi-query variants (the original query is not included)
    pub async fn query_variants(&self, query: &str) -> Result<Vec<String>, RagError> {
        let llm = match self.llm {
            Some(ref llm) => Arc::clone(llm),
            None => return Ok(Vec::new()),
        };

        let key = LruTtlCache::<Vec<String>>::key_for(query);
        if let Some(cached) = self.variant_cache.get(&key) {
            return Ok(cached);
        }

        let result = llm
            .generate(&multiquery_prompt(query, self.config.max_variants))
            .await
            .map_err(|e| RagError::Search(format!("variant generation failed: {e}")))?;

        let variants: Vec<String> = parse_variant_list(&result.text, self.config.max_variants)
            .into_iter()
            .filter(|v| !v.eq_ignore_ascii_case(query.trim()))
            .collect();

        tracing::debug!(
            original = query,
            count = variants.len(),
            "query variants generated"
        );
        self.variant_cache.insert(key, variants.clone());
        Ok(variants)
    }

    /// One-shot reformulation for the CRAG retry path. Deliberately
    /// uncached: a retry exists because the cached phrasing was weak.
    pub async fn rewrite(&self, query: &str) -> Result<Option<String>, RagError> {
        let llm = match self.llm {
            Some(ref llm) => Arc::clone(llm),
            None => return Ok(None),
        };

        let result = llm
            .generate(&rewrite_prompt(query))
            .await
            .map_err(|e| RagError::Search(format!("query rewrite failed: {e}")))?;

        let rewritten = result.text.trim().trim_matches('"').to_string();
        if rewritten.is_empty() || rewritten.eq_ignore_ascii_case(query.trim()) {
            return Ok(None);
        }
        Ok(Some(rewritten))
    }

    pub fn hyde_cache_stats(&self) -> CacheStats {
        self.hyde_cache.stats()
    }

    pub fn variant_cache_stats(&self) -> CacheStats {
        self.variant_cache.stats()
    }

    pub fn clear_caches(&self) {
        self.hyde_cache.clear();
        self.variant_cache.clear();
    }
}

impl Default for QueryExpander {
    fn default() -> Self {
        Self::new(ExpansionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lexrag_llm::{GenerationResult, LlmError, Message};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StubLlm {
        response: String,
        calls: AtomicU32,
    }

    impl StubLlm {
        fn new(response: &str) -> Arc<Self> {
            Arc::new(Self {
                response: response.into(),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl LlmBackend for StubLlm {
        async fn generate(&self, _messages: &[Message]) -> Result<GenerationResult, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(GenerationResult {
                text: self.response.clone(),
                total_time_ms: 1,
            })
        }

        async fn is_available(&self) -> bool {
            true
        }

        fn model_name(&self) -> &str {
            "stub"
        }
    }

    #[tokio::test]
    async fn test_no_llm_is_a_clean_noop() {
        let expander = QueryExpander::default();
        assert_eq!(
            expander.hypothetical_document("pergunta").await.unwrap(),
            None
        );
        assert!(expander.query_variants("pergunta").await.unwrap().is_empty());
        assert_eq!(expander.rewrite("pergunta").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_hyde_cached_by_normalized_query() {
        let llm = StubLlm::new("A rescisão indireta configura-se quando o empregador descumpre obrigações contratuais.");
        let expander =
            QueryExpander::new(ExpansionConfig::default()).with_llm(Arc::clone(&llm) as _);

        let first = expander
            .hypothetical_document("O que configura rescisão indireta?")
            .await
            .unwrap()
            .unwrap();
        // Same query, different surface form: still one LLM call
        let second = expander
            .hypothetical_document("  o que configura rescisão indireta?  ")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
        assert_eq!(expander.hyde_cache_stats().hits, 1);
    }

    #[tokio::test]
    async fn test_variants_parsed_and_capped() {
        let llm = StubLlm::new(
            "1. requisitos do habeas corpus\n2. cabimento do habeas corpus\n3. hc pressupostos\n4. extra",
        );
        let expander = QueryExpander::new(ExpansionConfig {
            max_variants: 3,
            ..Default::default()
        })
        .with_llm(llm as _);

        let variants = expander.query_variants("habeas corpus").await.unwrap();
        assert_eq!(variants.len(), 3);
        assert_eq!(variants[0], "requisitos do habeas corpus");
    }

    #[tokio::test]
    async fn test_variant_identical_to_query_dropped() {
        let llm = StubLlm::new("1. habeas corpus\n2. pressupostos do writ");
        let expander = QueryExpander::new(ExpansionConfig::default()).with_llm(llm as _);
        let variants = expander.query_variants("habeas corpus").await.unwrap();
        assert_eq!(variants, vec!["pressupostos do writ"]);
    }

    #[tokio::test]
    async fn test_rewrite_returns_none_on_same_text() {
        let llm = StubLlm::new("habeas corpus");
        let expander = QueryExpander::new(ExpansionConfig::default()).with_llm(llm as _);
        assert_eq!(expander.rewrite("habeas corpus").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rewrite_not_cached() {
        let llm = StubLlm::new("requisitos do habeas corpus no CPP");
        let expander =
            QueryExpander::new(ExpansionConfig::default()).with_llm(Arc::clone(&llm) as _);
        expander.rewrite("hc").await.unwrap();
        expander.rewrite("hc").await.unwrap();
        assert_eq!(llm.calls.load(Ordering::SeqCst), 2);
    }
}
