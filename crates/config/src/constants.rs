//! Centralized constants
//!
//! Single source of truth for pipeline defaults and the fixed routing
//! tables. Stage configs derive their `Default` impls from these values.

use lexrag_core::{Jurisdiction, ProviderName};

/// Retrieval pipeline defaults
pub mod rag {
    /// Final results returned to the caller
    pub const DEFAULT_TOP_K: usize = 10;
    /// Candidates fetched per backend before fusion
    pub const FETCH_K: usize = 30;

    pub const RRF_K: f32 = 60.0;
    pub const LEXICAL_WEIGHT: f32 = 0.5;
    pub const VECTOR_WEIGHT: f32 = 0.5;

    pub const CRAG_MIN_BEST_SCORE: f32 = 0.5;
    pub const CRAG_MIN_AVG_SCORE: f32 = 0.35;
    pub const CRAG_MAX_RETRIES: usize = 2;
    /// Fused scores averaged over this many top hits by the gate
    pub const CRAG_TOP_N: usize = 5;

    pub const MULTIQUERY_MAX: usize = 3;
    pub const HYDE_MAX_TOKENS: usize = 300;

    pub const RERANK_TOP_K: usize = 10;
    pub const RERANK_MAX_CHARS: usize = 1800;

    pub const COMPRESSION_MAX_CHARS: usize = 900;
    pub const COMPRESSION_MIN_CHARS: usize = 100;
    /// Global extractive-compression budget, in estimated tokens
    pub const COMPRESSION_TOKEN_BUDGET: usize = 3000;

    pub const CHUNK_EXPANSION_WINDOW: usize = 1;
    pub const CHUNK_EXPANSION_MAX_EXTRA: usize = 12;

    pub const DEFAULT_CHUNK_SIZE: usize = 512;
    pub const DEFAULT_CHUNK_OVERLAP: usize = 50;

    /// Documents below both thresholds are advisory skip_rag
    pub const SKIP_RAG_CHAR_THRESHOLD: usize = 400_000;
    pub const SKIP_RAG_MAX_PAGES: usize = 100;
    /// Page estimation divisor (words per page)
    pub const WORDS_PER_PAGE: usize = 500;

    pub const LOCAL_TTL_DAYS: i64 = 7;

    pub const REQUEST_DEADLINE_SECS: u64 = 30;

    pub const EXPANSION_CACHE_CAPACITY: usize = 1024;
    pub const EXPANSION_CACHE_TTL_SECS: u64 = 3600;
    pub const ROUTER_CACHE_CAPACITY: usize = 1024;
    /// Router classification cache hashes only this prefix of the text
    pub const ROUTER_CACHE_KEY_CHARS: usize = 500;

    pub const HEURISTIC_CONFIDENCE_THRESHOLD: f32 = 0.8;
    pub const LLM_CONFIDENCE_THRESHOLD: f32 = 0.6;
    /// Layer-3 fallback trusts the layer-1 guess above this score
    pub const FALLBACK_JURIS_CONFIDENCE: f32 = 0.3;
}

/// Default service endpoints; all overridable via settings
pub mod endpoints {
    pub const QDRANT_DEFAULT: &str = "http://localhost:6333";
    pub const OPENAI_DEFAULT: &str = "https://api.openai.com/v1";
    pub const VOYAGE_DEFAULT: &str = "https://api.voyageai.com/v1";
    pub const KANON_DEFAULT: &str = "https://api.isaacus.com/v1";
    /// Local JurisBERT inference server
    pub const JURISBERT_DEFAULT: &str = "http://localhost:8089";
    pub const LLM_DEFAULT: &str = "http://localhost:11434/v1";
}

/// Default model identifiers
pub mod models {
    pub const OPENAI_EMBEDDING: &str = "text-embedding-3-large";
    pub const VOYAGE_V4: &str = "voyage-4-large";
    pub const VOYAGE_LAW: &str = "voyage-law-2";
    pub const KANON2: &str = "kanon-2-embedder";
    pub const JURISBERT: &str = "jurisbert-base";
    pub const HYDE: &str = "gemini-2.0-flash";
    pub const RERANK: &str = "cross-encoder/ms-marco-MiniLM-L-6-v2";
}

/// Embedding dimensions per provider family
pub mod dimensions {
    pub const OPENAI: usize = 3072;
    pub const VOYAGE: usize = 1024;
    pub const KANON2: usize = 1024;
    pub const JURISBERT: usize = 768;
}

/// Fixed jurisdiction → default collection table
pub fn default_collection(jurisdiction: Jurisdiction) -> &'static str {
    match jurisdiction {
        Jurisdiction::Br => "legal_br_v4",
        Jurisdiction::Us | Jurisdiction::Uk | Jurisdiction::Int => "legal_international",
        Jurisdiction::Eu => "legal_eu",
        Jurisdiction::General => "general",
    }
}

/// Fixed jurisdiction → default provider table
pub fn default_provider(jurisdiction: Jurisdiction) -> ProviderName {
    match jurisdiction {
        Jurisdiction::Br => ProviderName::VoyageV4,
        Jurisdiction::Us | Jurisdiction::Uk | Jurisdiction::Int => ProviderName::Kanon2,
        Jurisdiction::Eu => ProviderName::VoyageLaw,
        Jurisdiction::General => ProviderName::Openai,
    }
}

/// Dimension registered for each known collection
pub fn collection_dimensions(collection: &str) -> usize {
    match collection {
        "legal_br" => dimensions::JURISBERT,
        "legal_br_v4" | "legal_international" | "legal_eu" => dimensions::VOYAGE,
        "general" => dimensions::OPENAI,
        // Legacy collections all carry OpenAI 3072d embeddings
        _ => LEGACY_EMBEDDING_DIMENSIONS,
    }
}

pub fn provider_dimensions(provider: ProviderName) -> usize {
    match provider {
        ProviderName::Openai => dimensions::OPENAI,
        ProviderName::VoyageV4 | ProviderName::VoyageLaw => dimensions::VOYAGE,
        ProviderName::Kanon2 => dimensions::KANON2,
        ProviderName::Jurisbert => dimensions::JURISBERT,
    }
}

/// Legacy collections consulted when `include_legacy` is on. All use
/// OpenAI 3072d embeddings regardless of the routed provider.
pub fn legacy_collections(jurisdiction: Jurisdiction) -> &'static [&'static str] {
    match jurisdiction {
        Jurisdiction::Br | Jurisdiction::General => {
            &["lei", "juris", "doutrina", "pecas_modelo", "local_chunks"]
        },
        Jurisdiction::Us | Jurisdiction::Uk | Jurisdiction::Int | Jurisdiction::Eu => {
            &["local_chunks"]
        },
    }
}

pub const LEGACY_EMBEDDING_DIMENSIONS: usize = 3072;

/// Every legacy collection name, for dataset validation
pub const ALL_LEGACY_COLLECTIONS: [&str; 5] =
    ["lei", "juris", "doutrina", "pecas_modelo", "local_chunks"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_and_collection_dimensions_agree() {
        for j in Jurisdiction::ALL {
            let provider = default_provider(j);
            let collection = default_collection(j);
            assert_eq!(
                provider_dimensions(provider),
                collection_dimensions(collection),
                "dimension table mismatch for {}",
                j.as_str()
            );
        }
    }

    #[test]
    fn test_br_routes_to_voyage_v4() {
        assert_eq!(default_provider(Jurisdiction::Br), ProviderName::VoyageV4);
        assert_eq!(default_collection(Jurisdiction::Br), "legal_br_v4");
    }

    #[test]
    fn test_international_share_kanon() {
        for j in [Jurisdiction::Us, Jurisdiction::Uk, Jurisdiction::Int] {
            assert_eq!(default_provider(j), ProviderName::Kanon2);
            assert_eq!(default_collection(j), "legal_international");
        }
    }

    #[test]
    fn test_unknown_collection_assumed_legacy() {
        assert_eq!(collection_dimensions("lei"), LEGACY_EMBEDDING_DIMENSIONS);
        assert_eq!(collection_dimensions("juris"), LEGACY_EMBEDDING_DIMENSIONS);
    }
}
