//! Environment-driven settings
//!
//! Read once at startup. `from_env_with` takes a lookup closure so tests
//! can inject an environment without touching process state.

use std::collections::HashMap;

use lexrag_core::{Jurisdiction, ProviderName};
use serde::{Deserialize, Serialize};

use crate::constants::{endpoints, models, rag};

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Feature flags, environment layer. Per-request overrides sit above
/// these; built-in defaults sit below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub enable_crag: bool,
    pub enable_hyde: bool,
    pub enable_multiquery: bool,
    pub enable_rerank: bool,
    pub enable_compression: bool,
    pub enable_graph_enrich: bool,
    pub enable_tracing: bool,
    pub enable_chunk_expansion: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_crag: true,
            enable_hyde: true,
            enable_multiquery: true,
            enable_rerank: true,
            enable_compression: true,
            enable_graph_enrich: true,
            enable_tracing: true,
            enable_chunk_expansion: true,
        }
    }
}

/// Per-jurisdiction routing override from the environment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouterOverride {
    pub provider: Option<ProviderName>,
    pub collection: Option<String>,
}

/// Full engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagSettings {
    pub features: FeatureFlags,

    // CRAG gate
    pub crag_min_best_score: f32,
    pub crag_min_avg_score: f32,
    pub crag_max_retries: usize,

    // HyDE / multi-query
    pub hyde_model: String,
    pub hyde_max_tokens: usize,
    pub multiquery_max: usize,

    // Rerank
    pub rerank_model: String,
    pub rerank_top_k: usize,
    pub rerank_max_chars: usize,

    // Compression
    pub compression_max_chars: usize,
    pub compression_min_chars: usize,

    // Chunk expansion
    pub chunk_expansion_window: usize,
    pub chunk_expansion_max_extra: usize,

    // Fusion
    pub rrf_k: f32,
    pub lexical_weight: f32,
    pub vector_weight: f32,

    // Retention / skip policy
    pub skip_rag_chars: usize,
    pub local_ttl_days: i64,

    // Endpoints
    pub qdrant_url: String,
    pub openai_url: String,
    pub voyage_url: String,
    pub kanon_url: String,
    pub jurisbert_url: String,
    pub llm_url: String,

    // Keys (absent keys leave providers unauthenticated for local setups)
    pub openai_api_key: Option<String>,
    pub voyage_api_key: Option<String>,
    pub kanon_api_key: Option<String>,
    pub qdrant_api_key: Option<String>,

    /// `RAG_ROUTER_<JURIS>_PROVIDER` / `..._COLLECTION` overrides
    pub router_overrides: HashMap<Jurisdiction, RouterOverride>,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self::from_env_with(|_| None)
    }
}

impl RagSettings {
    /// Read settings from the process environment
    pub fn from_env() -> Self {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary lookup (tests inject a map here)
    pub fn from_env_with(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get_bool = |key: &str, default: bool| -> bool {
            match lookup(key) {
                Some(raw) => parse_bool(&raw).unwrap_or_else(|| {
                    tracing::warn!(key, raw, "unparseable boolean, using default");
                    default
                }),
                None => default,
            }
        };
        let get_usize = |key: &str, default: usize| -> usize {
            lookup(key)
                .and_then(|raw| raw.trim().parse().ok())
                .unwrap_or(default)
        };
        let get_i64 = |key: &str, default: i64| -> i64 {
            lookup(key)
                .and_then(|raw| raw.trim().parse().ok())
                .unwrap_or(default)
        };
        let get_f32 = |key: &str, default: f32| -> f32 {
            lookup(key)
                .and_then(|raw| raw.trim().parse().ok())
                .unwrap_or(default)
        };
        let get_str =
            |key: &str, default: &str| -> String { lookup(key).unwrap_or_else(|| default.into()) };

        let mut router_overrides = HashMap::new();
        for jurisdiction in Jurisdiction::ALL {
            let j = jurisdiction.as_str();
            let provider = lookup(&format!("RAG_ROUTER_{j}_PROVIDER"))
                .as_deref()
                .and_then(ProviderName::parse);
            let collection = lookup(&format!("RAG_ROUTER_{j}_COLLECTION"))
                .filter(|c| !c.trim().is_empty());
            if provider.is_some() || collection.is_some() {
                router_overrides.insert(
                    jurisdiction,
                    RouterOverride {
                        provider,
                        collection,
                    },
                );
            }
        }

        Self {
            features: FeatureFlags {
                enable_crag: get_bool("RAG_ENABLE_CRAG", true),
                enable_hyde: get_bool("RAG_ENABLE_HYDE", true),
                enable_multiquery: get_bool("RAG_ENABLE_MULTIQUERY", true),
                enable_rerank: get_bool("RAG_ENABLE_RERANK", true),
                enable_compression: get_bool("RAG_ENABLE_COMPRESSION", true),
                enable_graph_enrich: get_bool("RAG_ENABLE_GRAPH_ENRICH", true),
                enable_tracing: get_bool("RAG_ENABLE_TRACING", true),
                enable_chunk_expansion: get_bool("RAG_ENABLE_CHUNK_EXPANSION", true),
            },
            crag_min_best_score: get_f32("RAG_CRAG_MIN_BEST_SCORE", rag::CRAG_MIN_BEST_SCORE),
            crag_min_avg_score: get_f32("RAG_CRAG_MIN_AVG_SCORE", rag::CRAG_MIN_AVG_SCORE),
            crag_max_retries: get_usize("RAG_CRAG_MAX_RETRIES", rag::CRAG_MAX_RETRIES),
            hyde_model: get_str("RAG_HYDE_MODEL", models::HYDE),
            hyde_max_tokens: get_usize("RAG_HYDE_MAX_TOKENS", rag::HYDE_MAX_TOKENS),
            multiquery_max: get_usize("RAG_MULTIQUERY_MAX", rag::MULTIQUERY_MAX),
            rerank_model: get_str("RAG_RERANK_MODEL", models::RERANK),
            rerank_top_k: get_usize("RAG_RERANK_TOP_K", rag::RERANK_TOP_K),
            rerank_max_chars: get_usize("RAG_RERANK_MAX_CHARS", rag::RERANK_MAX_CHARS),
            compression_max_chars: get_usize(
                "RAG_COMPRESSION_MAX_CHARS",
                rag::COMPRESSION_MAX_CHARS,
            ),
            compression_min_chars: get_usize(
                "RAG_COMPRESSION_MIN_CHARS",
                rag::COMPRESSION_MIN_CHARS,
            ),
            chunk_expansion_window: get_usize(
                "RAG_CHUNK_EXPANSION_WINDOW",
                rag::CHUNK_EXPANSION_WINDOW,
            ),
            chunk_expansion_max_extra: get_usize(
                "RAG_CHUNK_EXPANSION_MAX_EXTRA",
                rag::CHUNK_EXPANSION_MAX_EXTRA,
            ),
            rrf_k: get_f32("RAG_RRF_K", rag::RRF_K),
            lexical_weight: get_f32("RAG_LEXICAL_WEIGHT", rag::LEXICAL_WEIGHT),
            vector_weight: get_f32("RAG_VECTOR_WEIGHT", rag::VECTOR_WEIGHT),
            skip_rag_chars: get_usize("SMART_SKIP_RAG_CHARS", rag::SKIP_RAG_CHAR_THRESHOLD),
            local_ttl_days: get_i64("LOCAL_TTL_DAYS", rag::LOCAL_TTL_DAYS),
            qdrant_url: get_str("QDRANT_URL", endpoints::QDRANT_DEFAULT),
            openai_url: get_str("OPENAI_BASE_URL", endpoints::OPENAI_DEFAULT),
            voyage_url: get_str("VOYAGE_BASE_URL", endpoints::VOYAGE_DEFAULT),
            kanon_url: get_str("KANON_BASE_URL", endpoints::KANON_DEFAULT),
            jurisbert_url: get_str("JURISBERT_URL", endpoints::JURISBERT_DEFAULT),
            llm_url: get_str("LLM_BASE_URL", endpoints::LLM_DEFAULT),
            openai_api_key: lookup("OPENAI_API_KEY"),
            voyage_api_key: lookup("VOYAGE_API_KEY"),
            kanon_api_key: lookup("KANON_API_KEY"),
            qdrant_api_key: lookup("QDRANT_API_KEY"),
            router_overrides,
        }
    }

    /// Routed (provider, collection) for a jurisdiction after overrides
    pub fn route_for(&self, jurisdiction: Jurisdiction) -> (ProviderName, String) {
        let default_provider = crate::constants::default_provider(jurisdiction);
        let default_collection = crate::constants::default_collection(jurisdiction);
        match self.router_overrides.get(&jurisdiction) {
            Some(ov) => (
                ov.provider.unwrap_or(default_provider),
                ov.collection
                    .clone()
                    .unwrap_or_else(|| default_collection.to_string()),
            ),
            None => (default_provider, default_collection.to_string()),
        }
    }
}
