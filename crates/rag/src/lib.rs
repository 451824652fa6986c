//! Hybrid legal retrieval engine
//!
//! Features:
//! - Dense vector search via Qdrant with scope-filtered payloads
//! - Lexical BM25 search via Tantivy
//! - Embedding router: jurisdiction/language/type classification in three
//!   layers (heuristic, LLM, fallback) with per-provider collections
//! - Query expansion (HyDE + multi-query, LLM-driven, cached)
//! - Hybrid fusion with weighted RRF
//! - CRAG evidence gate with bounded retry loop
//! - Cross-encoder reranking (optional ONNX)
//! - Chunk-neighbor expansion and token-budgeted compression
//! - Legal-aware chunking respecting article boundaries
//! - Corpus management: ingestion, retention, promotion, backfill

pub mod cache;
pub mod chunker;
pub mod compressor;
pub mod corpus;
pub mod crag;
pub mod engine;
pub mod expansion;
pub mod fusion;
pub mod lexical;
pub mod neighbors;
pub mod pipeline;
pub mod providers;
pub mod reranker;
pub mod router;
pub mod vector;

pub use cache::{CacheStats, LruTtlCache};
pub use chunker::{chunk_document, ChunkerConfig, TextChunk};
pub use compressor::{CompressionOutcome, Compressor, CompressorConfig};
pub use corpus::{BackfillReport, CorpusManager, CorpusStats, InMemoryRegistry, SweepReport};
pub use crag::{CragConfig, CragGate, EvidenceLevel, GateDecision, GateOutcome};
pub use engine::{build_engine, Engine};
pub use expansion::{ExpansionConfig, QueryExpander};
pub use fusion::{rrf_fuse, rrf_norm_factor, RankedInput};
pub use lexical::{LexicalConfig, TantivyBackend};
pub use neighbors::{ChunkExpander, ExpanderConfig};
pub use pipeline::{Pipeline, PipelineConfig};
pub use providers::{
    jurisbert::JurisBertConfig, kanon::KanonConfig, openai::OpenAiConfig, voyage::VoyageConfig,
    EmbeddingProvider, InputType, JurisBertProvider, KanonProvider, OpenAiProvider,
    ProviderRegistry, VoyageProvider,
};
pub use reranker::{CrossEncoderReranker, RerankerConfig};
pub use router::{EmbeddingRouter, RouterConfig, RouterUsage};
pub use vector::{QdrantBackend, VectorConfig};

use thiserror::Error;

/// RAG errors
#[derive(Error, Debug)]
pub enum RagError {
    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Reranker error: {0}")]
    Reranker(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Routing error: {0}")]
    Routing(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

impl From<RagError> for lexrag_core::Error {
    fn from(err: RagError) -> Self {
        match err {
            RagError::Embedding(m) | RagError::Model(m) | RagError::Routing(m) => {
                lexrag_core::Error::ProviderFailure(m)
            },
            RagError::VectorStore(m)
            | RagError::Search(m)
            | RagError::Index(m)
            | RagError::Connection(m) => lexrag_core::Error::BackendUnavailable(m),
            RagError::Reranker(m) => lexrag_core::Error::ProviderFailure(m),
            RagError::NotFound(m) => lexrag_core::Error::InvalidInput(m),
        }
    }
}
