//! Chunk data model
//!
//! The chunk is the smallest indexed and ranked unit of text. Field names
//! here are the stable, case-sensitive payload keys written to both the
//! lexical and vector stores.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scope::Scope;

/// Confidentiality sub-level, orthogonal to scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sigilo {
    /// Visible to any caller the scope admits
    #[default]
    Public,
    /// Visible only to users on the chunk's allowed list
    Restricted,
}

impl Sigilo {
    pub fn tag(&self) -> &'static str {
        match self {
            Sigilo::Public => "public",
            Sigilo::Restricted => "restricted",
        }
    }
}

/// Chunk metadata carried into both backends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(flatten)]
    pub scope: Scope,
    #[serde(default)]
    pub sigilo: Sigilo,
    /// Users allowed to see a restricted chunk
    #[serde(default)]
    pub allowed_users: Vec<String>,
    #[serde(default)]
    pub jurisdiction: Option<String>,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub uploaded_at: Option<DateTime<Utc>>,
    /// Free-form caller metadata, stored verbatim
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

impl ChunkMetadata {
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            sigilo: Sigilo::Public,
            allowed_users: Vec::new(),
            jurisdiction: None,
            source_id: None,
            page: None,
            uploaded_at: None,
            extra: HashMap::new(),
        }
    }
}

/// A retrieved or ingested passage
///
/// Invariant: (doc_id, position) is unique within a document, and the id
/// is stable across both backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Opaque unique id, stable across backends
    pub id: String,
    /// UTF-8 passage text
    pub text: String,
    /// Monotonic position within the document, starting at 0
    pub position: i64,
    pub doc_id: String,
    pub metadata: ChunkMetadata,
}

/// A scored hit returned by a backend or a pipeline stage
///
/// `score` is provider-native and not comparable across providers;
/// `fused_score` is the RRF score once fusion has run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub chunk_id: String,
    pub score: f32,
    #[serde(default)]
    pub fused_score: Option<f32>,
    pub text: String,
    pub source_collection: String,
    #[serde(default)]
    pub doc_id: Option<String>,
    #[serde(default)]
    pub position: Option<i64>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Hit {
    /// Effective ranking score: fused when present, native otherwise
    pub fn ranking_score(&self) -> f32 {
        self.fused_score.unwrap_or(self.score)
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_roundtrip() {
        let meta = ChunkMetadata {
            scope: Scope::Local {
                tenant_id: "T1".into(),
                case_id: "C9".into(),
            },
            sigilo: Sigilo::Restricted,
            allowed_users: vec!["u1".into()],
            jurisdiction: Some("BR".into()),
            source_id: None,
            page: Some(12),
            uploaded_at: None,
            extra: HashMap::new(),
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["scope"], "local");
        assert_eq!(json["case_id"], "C9");
        assert_eq!(json["sigilo"], "restricted");
        let back: ChunkMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn test_ranking_score_prefers_fused() {
        let mut hit = Hit {
            chunk_id: "c1".into(),
            score: 11.5,
            fused_score: None,
            text: String::new(),
            source_collection: "lei".into(),
            doc_id: None,
            position: None,
            metadata: HashMap::new(),
        };
        assert_eq!(hit.ranking_score(), 11.5);
        hit.fused_score = Some(0.031);
        assert_eq!(hit.ranking_score(), 0.031);
    }
}
