//! Core traits and types for the legal RAG engine
//!
//! Everything shared across crates lives here: the chunk data model,
//! scope/sigilo visibility rules, jurisdiction and routing types, the
//! search/ingest request surface, the per-request trace, and the narrow
//! adapter traits the retrieval pipeline is built against.

pub mod chunk;
pub mod error;
pub mod jurisdiction;
pub mod ranking;
pub mod request;
pub mod scope;
pub mod trace;
pub mod traits;

pub use chunk::{Chunk, ChunkMetadata, Hit, Sigilo};
pub use error::{Error, Result};
pub use jurisdiction::{
    DocumentType, EmbeddingRoute, Jurisdiction, ProviderName, RouteMethod, RoutingDecision,
};
pub use ranking::{sort_ranked, NeighborRef};
pub use request::{
    FeatureOverrides, IngestRequest, IngestResponse, SearchRequest, SearchResponse,
    SearchResultItem,
};
pub use scope::{Scope, ScopeFilter};
pub use trace::{counts, Trace, TraceEvent, TraceRecorder};
pub use traits::{
    DeletePredicate, DocumentRegistry, LexicalBackend, ReconciliationMarker, RegistryStats,
    ScrollPage, VectorBackend,
};
