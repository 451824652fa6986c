//! Search and ingest request surface
//!
//! These are the structured entry points of the core. Validation happens
//! here so every downstream stage can assume well-formed parameters.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::chunk::Hit;
use crate::error::{Error, Result};
use crate::jurisdiction::RoutingDecision;
use crate::scope::ScopeFilter;
use crate::trace::Trace;

pub const MAX_QUERY_CHARS: usize = 10_000;
pub const MAX_TOP_K: usize = 100;
pub const DEFAULT_TOP_K: usize = 10;
pub const MIN_CHUNK_SIZE: usize = 100;
pub const MAX_CHUNK_SIZE: usize = 2_000;
pub const DEFAULT_CHUNK_SIZE: usize = 512;
pub const MAX_CHUNK_OVERLAP: usize = 500;
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;

/// Per-request feature overrides. `None` defers to environment
/// configuration, which defers to built-in defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureOverrides {
    #[serde(default)]
    pub use_hyde: Option<bool>,
    #[serde(default)]
    pub use_multiquery: Option<bool>,
    #[serde(default)]
    pub use_crag: Option<bool>,
    #[serde(default)]
    pub use_rerank: Option<bool>,
    #[serde(default)]
    pub use_compression: Option<bool>,
    #[serde(default)]
    pub use_expansion: Option<bool>,
    #[serde(default)]
    pub use_graph_enrich: Option<bool>,
}

/// Structured search request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(flatten)]
    pub scope: ScopeFilter,
    /// Restrict legacy search to these collections; empty = all legacy
    #[serde(default)]
    pub datasets: Vec<String>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub jurisdiction_hint: Option<String>,
    #[serde(default)]
    pub language_hint: Option<String>,
    #[serde(default)]
    pub features: FeatureOverrides,
    #[serde(default = "default_true")]
    pub include_legacy: bool,
    #[serde(default = "default_true")]
    pub include_routing_info: bool,
    /// CRAG threshold overrides
    #[serde(default)]
    pub min_best_score: Option<f32>,
    #[serde(default)]
    pub min_avg_score: Option<f32>,
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_true() -> bool {
    true
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            scope: ScopeFilter::new(tenant_id),
            datasets: Vec::new(),
            top_k: DEFAULT_TOP_K,
            jurisdiction_hint: None,
            language_hint: None,
            features: FeatureOverrides::default(),
            include_legacy: true,
            include_routing_info: true,
            min_best_score: None,
            min_avg_score: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let trimmed = self.query.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidInput("query must not be empty".into()));
        }
        if self.query.chars().count() > MAX_QUERY_CHARS {
            return Err(Error::InvalidInput(format!(
                "query exceeds {} chars",
                MAX_QUERY_CHARS
            )));
        }
        if self.top_k == 0 || self.top_k > MAX_TOP_K {
            return Err(Error::InvalidInput(format!(
                "top_k must be in 1..={}, got {}",
                MAX_TOP_K, self.top_k
            )));
        }
        self.scope.validate()
    }
}

/// One ranked result in the response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResultItem {
    pub chunk_id: String,
    pub text: String,
    pub score: f32,
    pub source_collection: String,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl From<Hit> for SearchResultItem {
    fn from(hit: Hit) -> Self {
        let mut metadata = hit.metadata;
        if let Some(doc_id) = hit.doc_id {
            metadata
                .entry("doc_id".to_string())
                .or_insert(serde_json::Value::String(doc_id));
        }
        if let Some(position) = hit.position {
            metadata
                .entry("position".to_string())
                .or_insert(serde_json::json!(position));
        }
        Self {
            chunk_id: hit.chunk_id,
            text: hit.text,
            score: hit.fused_score.unwrap_or(hit.score),
            source_collection: hit.source_collection,
            metadata,
        }
    }
}

/// Search response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResultItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routing: Option<RoutingDecision>,
    pub processing_time_ms: f64,
    /// Every collection consulted, new and legacy
    pub collections_searched: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<Trace>,
    /// True when one backend failed and search continued on the other
    #[serde(default)]
    pub degraded: bool,
}

/// Structured ingest request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    pub text: String,
    pub doc_id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub case_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub jurisdiction_hint: Option<String>,
    #[serde(default)]
    pub language_hint: Option<String>,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_chunk_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}

impl IngestRequest {
    pub fn validate(&self) -> Result<()> {
        if self.text.trim().is_empty() {
            return Err(Error::InvalidInput("text must not be empty".into()));
        }
        if self.doc_id.trim().is_empty() {
            return Err(Error::InvalidInput("doc_id must not be empty".into()));
        }
        if self.tenant_id.trim().is_empty() {
            return Err(Error::InvalidInput("tenant_id must not be empty".into()));
        }
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&self.chunk_size) {
            return Err(Error::InvalidInput(format!(
                "chunk_size must be in {}..={}",
                MIN_CHUNK_SIZE, MAX_CHUNK_SIZE
            )));
        }
        if self.chunk_overlap > MAX_CHUNK_OVERLAP {
            return Err(Error::InvalidInput(format!(
                "chunk_overlap must be at most {}",
                MAX_CHUNK_OVERLAP
            )));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(Error::InvalidInput(
                "chunk_overlap must be smaller than chunk_size".into(),
            ));
        }
        Ok(())
    }
}

/// Ingest response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub indexed_count: usize,
    pub collection: String,
    pub routing: RoutingDecision,
    pub skip_rag: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    pub processing_time_ms: f64,
    /// Set when one backend write failed and a reconciliation marker was left
    #[serde(default)]
    pub partial: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_query_rejected() {
        let req = SearchRequest::new("   ", "T1");
        assert!(matches!(req.validate(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_top_k_zero_rejected() {
        let mut req = SearchRequest::new("art. 5", "T1");
        req.top_k = 0;
        assert!(matches!(req.validate(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_oversize_query_rejected() {
        let req = SearchRequest::new("x".repeat(MAX_QUERY_CHARS + 1), "T1");
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_valid_request_passes() {
        let req = SearchRequest::new("responsabilidade civil do Estado", "T1");
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_ingest_overlap_bounds() {
        let mut req = IngestRequest {
            text: "Art. 1º Texto.".into(),
            doc_id: "d1".into(),
            tenant_id: "T1".into(),
            case_id: None,
            metadata: HashMap::new(),
            jurisdiction_hint: None,
            language_hint: None,
            chunk_size: 512,
            chunk_overlap: 50,
        };
        assert!(req.validate().is_ok());
        req.chunk_overlap = 512;
        assert!(req.validate().is_err());
        req.chunk_overlap = 50;
        req.chunk_size = 50;
        assert!(req.validate().is_err());
    }
}
