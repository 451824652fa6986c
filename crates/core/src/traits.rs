//! Adapter seams
//!
//! The pipeline is written against these traits only; the concrete
//! Tantivy/Qdrant adapters and the external document registry plug in
//! behind them. No other assumptions about the underlying stores exist.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chunk::{Chunk, Hit};
use crate::error::Result;
use crate::ranking::NeighborRef;
use crate::scope::ScopeFilter;

/// Predicate for targeted deletion, counting and scrolling
#[derive(Debug, Clone, PartialEq)]
pub enum DeletePredicate {
    /// Every chunk of one document
    Doc { doc_id: String },
    /// LOCAL-scope chunks uploaded before the cutoff
    ExpiredLocal { cutoff: DateTime<Utc> },
    /// Exact keyword-field match
    Term { field: String, value: String },
    /// Field absent from the payload (backfill discovery)
    Missing { field: String },
}

/// One page of a scroll over a backend
#[derive(Debug, Clone, Default)]
pub struct ScrollPage {
    pub hits: Vec<Hit>,
    /// Opaque continuation token; `None` means the scroll is exhausted
    pub next_offset: Option<String>,
}

/// BM25 lexical store (component boundary for OpenSearch-class engines)
#[async_trait]
pub trait LexicalBackend: Send + Sync {
    /// Idempotent index creation
    async fn ensure_index(&self, name: &str) -> Result<()>;

    async fn index_chunk(&self, index: &str, chunk: &Chunk) -> Result<()>;

    /// BM25 search across one or more indices under a scope filter.
    /// Must return zero private/group/local rows for a wrong tenant.
    async fn search_lexical(
        &self,
        indices: &[String],
        query: &str,
        filter: &ScopeFilter,
        size: usize,
    ) -> Result<Vec<Hit>>;

    /// Fetch chunks by (doc_id, position) pairs in one round-trip
    async fn fetch_by_position(&self, index: &str, refs: &[NeighborRef]) -> Result<Vec<Hit>>;

    /// Delete matching chunks, returning how many were removed
    async fn delete_where(&self, index: &str, predicate: &DeletePredicate) -> Result<u64>;

    async fn count(&self, index: &str, predicate: Option<&DeletePredicate>) -> Result<u64>;
}

/// Dense/sparse vector store (component boundary for Qdrant-class engines)
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Idempotent collection creation with a fixed dimension
    async fn ensure_collection(&self, name: &str, dims: usize) -> Result<()>;

    /// Upsert one chunk; dimension mismatch against the collection is fatal
    async fn upsert(&self, collection: &str, chunk: &Chunk, vector: &[f32]) -> Result<()>;

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        filter: Option<&ScopeFilter>,
        top_k: usize,
    ) -> Result<Vec<Hit>>;

    /// Page through a collection; pass the previous page's `next_offset`
    /// to continue
    async fn scroll(
        &self,
        collection: &str,
        predicate: Option<&DeletePredicate>,
        batch_size: usize,
        offset: Option<String>,
    ) -> Result<ScrollPage>;

    /// Merge a payload patch into one point
    async fn set_payload(
        &self,
        collection: &str,
        chunk_id: &str,
        patch: HashMap<String, serde_json::Value>,
    ) -> Result<()>;

    async fn fetch_by_position(&self, collection: &str, refs: &[NeighborRef])
        -> Result<Vec<Hit>>;

    async fn delete_where(&self, collection: &str, predicate: &DeletePredicate) -> Result<u64>;

    async fn count(&self, collection: &str, predicate: Option<&DeletePredicate>) -> Result<u64>;
}

/// Marker left behind when a dual-write could not be fully compensated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationMarker {
    pub doc_id: String,
    pub chunk_id: String,
    pub collection: String,
    pub index: String,
    /// Which side holds the orphan write
    pub orphan_side: String,
    pub recorded_at: DateTime<Utc>,
}

/// Aggregate ingestion bookkeeping held by the external metadata store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub ingested: u64,
    pub pending: u64,
    pub failed: u64,
    pub last_indexed_at: Option<DateTime<Utc>>,
}

/// Narrow view of the external metadata store. The core never owns durable
/// state; it only flips flags and parks reconciliation markers here.
#[async_trait]
pub trait DocumentRegistry: Send + Sync {
    async fn mark_ingested(&self, doc_id: &str, collection: &str) -> Result<()>;

    /// Called by remove-from-corpus; sets rag_ingested=false
    async fn mark_removed(&self, doc_id: &str) -> Result<()>;

    async fn mark_failed(&self, doc_id: &str, reason: &str) -> Result<()>;

    async fn is_ingested(&self, doc_id: &str) -> Result<bool>;

    async fn record_marker(&self, marker: ReconciliationMarker) -> Result<()>;

    /// Drain markers for the sweep job
    async fn take_markers(&self) -> Result<Vec<ReconciliationMarker>>;

    async fn stats(&self) -> Result<RegistryStats>;
}
