//! Corpus management
//!
//! Ingestion planning, inventory, retention and cross-backend removal.
//! Every chunk write is a logical dual-write: lexical first, vector
//! second, with a compensating delete when the second leg fails and a
//! reconciliation marker when even the compensation fails. The retention
//! sweep drains those markers and expires LOCAL chunks past their TTL.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use lexrag_config::RagSettings;
use lexrag_core::{
    Chunk, ChunkMetadata, DeletePredicate, DocumentRegistry, Error as CoreError, Hit,
    IngestRequest, IngestResponse, LexicalBackend, ReconciliationMarker, RegistryStats,
    Result as CoreResult, Scope, Sigilo, VectorBackend,
};

use crate::chunker::{chunk_document, ChunkerConfig};
use crate::providers::InputType;
use crate::router::EmbeddingRouter;

/// Per-collection, per-scope inventory plus registry bookkeeping
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorpusStats {
    /// collection → scope tag → chunk count
    pub per_collection: HashMap<String, HashMap<String, u64>>,
    pub registry: RegistryStats,
}

/// Backfill outcome; `updated` stays zero on dry runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillReport {
    pub matched: u64,
    pub updated: u64,
    pub dry_run: bool,
}

/// Retention sweep outcome
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub expired_lexical: u64,
    pub expired_vector: u64,
    pub markers_repaired: u64,
    pub markers_requeued: u64,
}

/// Corpus manager over both backends and the external registry
pub struct CorpusManager {
    settings: Arc<RagSettings>,
    router: Arc<EmbeddingRouter>,
    lexical: Arc<dyn LexicalBackend>,
    vector: Arc<dyn VectorBackend>,
    registry: Arc<dyn DocumentRegistry>,
}

impl CorpusManager {
    pub fn new(
        settings: Arc<RagSettings>,
        router: Arc<EmbeddingRouter>,
        lexical: Arc<dyn LexicalBackend>,
        vector: Arc<dyn VectorBackend>,
        registry: Arc<dyn DocumentRegistry>,
    ) -> Self {
        Self {
            settings,
            router,
            lexical,
            vector,
            registry,
        }
    }

    fn scope_for(request: &IngestRequest) -> Scope {
        if let Some(tag) = request.metadata.get("scope") {
            match tag.as_str() {
                "global" => return Scope::Global,
                "group" => {
                    let group_ids: Vec<String> = request
                        .metadata
                        .get("group_ids")
                        .map(|g| g.split(',').map(|s| s.trim().to_string()).collect())
                        .unwrap_or_default();
                    return Scope::Group {
                        tenant_id: request.tenant_id.clone(),
                        group_ids,
                    };
                },
                _ => {},
            }
        }
        match request.case_id {
            Some(ref case_id) => Scope::Local {
                tenant_id: request.tenant_id.clone(),
                case_id: case_id.clone(),
            },
            None => Scope::Private {
                tenant_id: request.tenant_id.clone(),
            },
        }
    }

    /// Ingest one document: route, chunk, embed, dual-write. Ingestion is
    /// idempotent per (doc_id, position); re-running replaces rows in
    /// place.
    pub async fn ingest(&self, request: IngestRequest) -> CoreResult<IngestResponse> {
        let started = Instant::now();
        request.validate()?;

        let route = self
            .router
            .route(
                &request.text,
                request.jurisdiction_hint.as_deref(),
                request.language_hint.as_deref(),
            )
            .await
            .map_err(CoreError::from)?;

        let scope = Self::scope_for(&request);
        let uploaded_at = Utc::now();

        let chunker_config = ChunkerConfig {
            chunk_size: request.chunk_size,
            overlap: request.chunk_overlap,
        };
        let text_chunks = {
            // Chunking large documents is CPU-bound
            let text = request.text.clone();
            let doc_id = request.doc_id.clone();
            let doc_type = route.decision.document_type;
            tokio::task::spawn_blocking(move || {
                chunk_document(&text, &doc_id, doc_type, &chunker_config)
            })
            .await
            .map_err(|e| CoreError::BackendUnavailable(format!("chunking task failed: {e}")))?
        };

        if text_chunks.is_empty() {
            return Err(CoreError::InvalidInput(
                "document produced no chunks".into(),
            ));
        }

        self.lexical.ensure_index(&route.collection).await?;
        self.vector
            .ensure_collection(&route.collection, route.dimensions)
            .await?;

        let chunks: Vec<Chunk> = text_chunks
            .into_iter()
            .map(|tc| {
                let mut metadata = ChunkMetadata::new(scope.clone());
                metadata.sigilo = match request.metadata.get("sigilo").map(String::as_str) {
                    Some("restricted") => Sigilo::Restricted,
                    _ => Sigilo::Public,
                };
                metadata.allowed_users = request
                    .metadata
                    .get("allowed_users")
                    .map(|u| u.split(',').map(|s| s.trim().to_string()).collect())
                    .unwrap_or_default();
                metadata.jurisdiction =
                    Some(route.decision.jurisdiction.as_str().to_string());
                metadata.source_id = request.metadata.get("source_id").cloned();
                metadata.uploaded_at = Some(uploaded_at);
                metadata.extra = request
                    .metadata
                    .iter()
                    .filter(|(k, _)| {
                        !matches!(
                            k.as_str(),
                            "scope" | "group_ids" | "sigilo" | "allowed_users" | "source_id"
                        )
                    })
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                Chunk {
                    id: tc.id,
                    text: tc.text,
                    position: tc.position,
                    doc_id: request.doc_id.clone(),
                    metadata,
                }
            })
            .collect();

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let (vectors, embed_degraded) = self
            .router
            .embed_routed(&route, &texts, InputType::Document)
            .await;
        if embed_degraded {
            tracing::warn!(doc_id = %request.doc_id, "embedding degraded during ingest");
        }

        let mut indexed = 0usize;
        let mut partial = false;
        for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
            match self
                .write_chunk_pair(&route.collection, chunk, vector)
                .await
            {
                Ok(()) => indexed += 1,
                Err(e) => {
                    tracing::warn!(chunk_id = %chunk.id, error = %e, "dual-write failed");
                    partial = true;
                },
            }
        }

        if indexed > 0 {
            self.registry
                .mark_ingested(&request.doc_id, &route.collection)
                .await?;
        } else {
            self.registry
                .mark_failed(&request.doc_id, "no chunk written to both backends")
                .await?;
        }

        Ok(IngestResponse {
            indexed_count: indexed,
            collection: route.collection.clone(),
            skip_rag: route.decision.skip_rag,
            skip_reason: route
                .decision
                .skip_rag
                .then(|| "document small enough to send whole to the model".to_string()),
            routing: route.decision,
            processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            partial,
        })
    }

    /// Logical dual-write: both stores or neither. A failed vector write
    /// triggers a compensating lexical delete; a failed compensation
    /// leaves a marker for the sweep job.
    async fn write_chunk_pair(
        &self,
        collection: &str,
        chunk: &Chunk,
        vector: &[f32],
    ) -> CoreResult<()> {
        self.lexical.index_chunk(collection, chunk).await?;

        match self.vector.upsert(collection, chunk, vector).await {
            Ok(()) => Ok(()),
            Err(vector_err) => {
                let compensation = self
                    .lexical
                    .delete_where(
                        collection,
                        &DeletePredicate::Term {
                            field: "chunk_uid".into(),
                            value: chunk.id.clone(),
                        },
                    )
                    .await;
                if let Err(comp_err) = compensation {
                    tracing::error!(
                        chunk_id = %chunk.id,
                        error = %comp_err,
                        "compensating delete failed, leaving reconciliation marker"
                    );
                    self.registry
                        .record_marker(ReconciliationMarker {
                            doc_id: chunk.doc_id.clone(),
                            chunk_id: chunk.id.clone(),
                            collection: collection.to_string(),
                            index: collection.to_string(),
                            orphan_side: "lexical".into(),
                            recorded_at: Utc::now(),
                        })
                        .await?;
                    return Err(CoreError::ReconciliationNeeded(format!(
                        "chunk {} written to lexical only",
                        chunk.id
                    )));
                }
                Err(vector_err)
            },
        }
    }

    /// Delete every chunk of a document from both backends across all
    /// given collections (best-effort per collection), then flip the
    /// registry flag.
    pub async fn remove_document(
        &self,
        doc_id: &str,
        collections: &[String],
    ) -> CoreResult<u64> {
        let predicate = DeletePredicate::Doc {
            doc_id: doc_id.to_string(),
        };
        let mut removed = 0u64;
        for collection in collections {
            match self.lexical.delete_where(collection, &predicate).await {
                Ok(n) => removed += n,
                Err(e) => {
                    tracing::warn!(collection, error = %e, "lexical removal failed")
                },
            }
            match self.vector.delete_where(collection, &predicate).await {
                Ok(n) => removed += n,
                Err(e) => {
                    tracing::warn!(collection, error = %e, "vector removal failed")
                },
            }
        }
        self.registry.mark_removed(doc_id).await?;
        Ok(removed)
    }

    /// Expire LOCAL chunks past their TTL and repair orphaned writes
    pub async fn retention_sweep(&self, collections: &[String]) -> CoreResult<SweepReport> {
        let cutoff = Utc::now() - ChronoDuration::days(self.settings.local_ttl_days);
        let predicate = DeletePredicate::ExpiredLocal { cutoff };

        let mut report = SweepReport::default();
        for collection in collections {
            match self.lexical.delete_where(collection, &predicate).await {
                Ok(n) => report.expired_lexical += n,
                Err(e) => tracing::warn!(collection, error = %e, "lexical ttl sweep failed"),
            }
            match self.vector.delete_where(collection, &predicate).await {
                Ok(n) => report.expired_vector += n,
                Err(e) => tracing::warn!(collection, error = %e, "vector ttl sweep failed"),
            }
        }

        for marker in self.registry.take_markers().await? {
            let predicate = DeletePredicate::Term {
                field: "chunk_uid".into(),
                value: marker.chunk_id.clone(),
            };
            let repaired = match marker.orphan_side.as_str() {
                "lexical" => self.lexical.delete_where(&marker.index, &predicate).await,
                _ => self.vector.delete_where(&marker.collection, &predicate).await,
            };
            match repaired {
                Ok(_) => report.markers_repaired += 1,
                Err(e) => {
                    tracing::warn!(chunk_id = %marker.chunk_id, error = %e, "marker repair failed");
                    self.registry.record_marker(marker).await?;
                    report.markers_requeued += 1;
                },
            }
        }

        Ok(report)
    }

    /// Push a LOCAL document's TTL clock forward by `days`
    pub async fn extend_ttl(
        &self,
        doc_id: &str,
        collection: &str,
        days: i64,
    ) -> CoreResult<u64> {
        let new_uploaded_at = Utc::now() + ChronoDuration::days(days)
            - ChronoDuration::days(self.settings.local_ttl_days);
        self.rewrite_doc_chunks(doc_id, collection, |chunk| {
            chunk.metadata.uploaded_at = Some(new_uploaded_at);
        })
        .await
    }

    /// Promote a document to a new scope: payload patch on the vector
    /// side, row rewrite on the lexical side
    pub async fn promote(
        &self,
        doc_id: &str,
        collection: &str,
        new_scope: Scope,
    ) -> CoreResult<u64> {
        self.rewrite_doc_chunks(doc_id, collection, move |chunk| {
            chunk.metadata.scope = new_scope.clone();
        })
        .await
    }

    async fn rewrite_doc_chunks(
        &self,
        doc_id: &str,
        collection: &str,
        mutate: impl Fn(&mut Chunk) + Clone,
    ) -> CoreResult<u64> {
        let predicate = DeletePredicate::Doc {
            doc_id: doc_id.to_string(),
        };
        let mut updated = 0u64;
        let mut offset = None;

        loop {
            let page = self
                .vector
                .scroll(collection, Some(&predicate), 128, offset)
                .await?;
            if page.hits.is_empty() {
                break;
            }
            for hit in &page.hits {
                let mut chunk = chunk_from_hit(hit);
                mutate(&mut chunk);

                let mut patch: HashMap<String, serde_json::Value> = HashMap::new();
                patch.insert(
                    "scope".into(),
                    serde_json::Value::String(chunk.metadata.scope.tag().to_string()),
                );
                if let Some(tenant) = chunk.metadata.scope.tenant_id() {
                    patch.insert("tenant_id".into(), serde_json::Value::String(tenant.into()));
                }
                if let Scope::Local { ref case_id, .. } = chunk.metadata.scope {
                    patch.insert("case_id".into(), serde_json::Value::String(case_id.clone()));
                }
                if let Some(uploaded_at) = chunk.metadata.uploaded_at {
                    patch.insert(
                        "uploaded_at".into(),
                        serde_json::json!(uploaded_at.timestamp()),
                    );
                }

                self.vector
                    .set_payload(collection, &chunk.id, patch)
                    .await?;
                self.lexical.index_chunk(collection, &chunk).await?;
                updated += 1;
            }
            match page.next_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        if updated == 0 {
            return Err(CoreError::InvalidInput(format!(
                "document '{doc_id}' has no chunks in '{collection}'"
            )));
        }
        Ok(updated)
    }

    /// Patch a missing payload field across a collection. Dry runs only
    /// report the match count.
    pub async fn backfill_field(
        &self,
        collection: &str,
        field: &str,
        value: &str,
        dry_run: bool,
    ) -> CoreResult<BackfillReport> {
        let predicate = DeletePredicate::Missing {
            field: field.to_string(),
        };
        let matched = self.vector.count(collection, Some(&predicate)).await?;
        if dry_run || matched == 0 {
            return Ok(BackfillReport {
                matched,
                updated: 0,
                dry_run,
            });
        }

        let mut updated = 0u64;
        let mut offset = None;
        loop {
            let page = self
                .vector
                .scroll(collection, Some(&predicate), 128, offset)
                .await?;
            if page.hits.is_empty() {
                break;
            }
            for hit in &page.hits {
                let patch = HashMap::from([(
                    field.to_string(),
                    serde_json::Value::String(value.to_string()),
                )]);
                self.vector.set_payload(collection, &hit.chunk_id, patch).await?;

                let mut chunk = chunk_from_hit(hit);
                if field == "jurisdiction" {
                    chunk.metadata.jurisdiction = Some(value.to_string());
                } else if field == "source_id" {
                    chunk.metadata.source_id = Some(value.to_string());
                } else {
                    chunk
                        .metadata
                        .extra
                        .insert(field.to_string(), value.to_string());
                }
                self.lexical.index_chunk(collection, &chunk).await?;
                updated += 1;
            }
            match page.next_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        Ok(BackfillReport {
            matched,
            updated,
            dry_run: false,
        })
    }

    /// Per-scope, per-collection counts plus registry totals
    pub async fn stats(&self, collections: &[String]) -> CoreResult<CorpusStats> {
        let mut per_collection = HashMap::new();
        for collection in collections {
            let mut by_scope = HashMap::new();
            for scope in ["global", "private", "group", "local"] {
                let predicate = DeletePredicate::Term {
                    field: "scope".into(),
                    value: scope.into(),
                };
                let count = self
                    .vector
                    .count(collection, Some(&predicate))
                    .await
                    .unwrap_or(0);
                by_scope.insert(scope.to_string(), count);
            }
            per_collection.insert(collection.clone(), by_scope);
        }
        Ok(CorpusStats {
            per_collection,
            registry: self.registry.stats().await?,
        })
    }
}

/// Rebuild a chunk skeleton from a backend hit
fn chunk_from_hit(hit: &Hit) -> Chunk {
    let tenant = hit
        .metadata_str("tenant_id")
        .unwrap_or_default()
        .to_string();
    let scope = match hit.metadata_str("scope") {
        Some("private") => Scope::Private { tenant_id: tenant },
        Some("group") => Scope::Group {
            tenant_id: tenant,
            group_ids: hit
                .metadata
                .get("group_ids")
                .and_then(|v| v.as_array())
                .map(|a| {
                    a.iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default(),
        },
        Some("local") => Scope::Local {
            tenant_id: tenant,
            case_id: hit.metadata_str("case_id").unwrap_or_default().to_string(),
        },
        _ => Scope::Global,
    };

    let mut metadata = ChunkMetadata::new(scope);
    metadata.sigilo = match hit.metadata_str("sigilo") {
        Some("restricted") => Sigilo::Restricted,
        _ => Sigilo::Public,
    };
    metadata.jurisdiction = hit.metadata_str("jurisdiction").map(str::to_string);
    metadata.source_id = hit.metadata_str("source_id").map(str::to_string);
    metadata.uploaded_at = hit
        .metadata
        .get("uploaded_at")
        .and_then(|v| v.as_i64())
        .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0));

    Chunk {
        id: hit.chunk_id.clone(),
        text: hit.text.clone(),
        position: hit.position.unwrap_or(0),
        doc_id: hit.doc_id.clone().unwrap_or_default(),
        metadata,
    }
}

/// In-process registry used in tests and single-node deployments; the
/// production registry lives in the external metadata store.
#[derive(Default)]
pub struct InMemoryRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    ingested: HashMap<String, String>,
    failed: HashMap<String, String>,
    markers: Vec<ReconciliationMarker>,
    last_indexed_at: Option<DateTime<Utc>>,
}

impl InMemoryRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl DocumentRegistry for InMemoryRegistry {
    async fn mark_ingested(&self, doc_id: &str, collection: &str) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        inner.failed.remove(doc_id);
        inner.ingested.insert(doc_id.into(), collection.into());
        inner.last_indexed_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_removed(&self, doc_id: &str) -> CoreResult<()> {
        self.inner.lock().ingested.remove(doc_id);
        Ok(())
    }

    async fn mark_failed(&self, doc_id: &str, reason: &str) -> CoreResult<()> {
        self.inner.lock().failed.insert(doc_id.into(), reason.into());
        Ok(())
    }

    async fn is_ingested(&self, doc_id: &str) -> CoreResult<bool> {
        Ok(self.inner.lock().ingested.contains_key(doc_id))
    }

    async fn record_marker(&self, marker: ReconciliationMarker) -> CoreResult<()> {
        self.inner.lock().markers.push(marker);
        Ok(())
    }

    async fn take_markers(&self) -> CoreResult<Vec<ReconciliationMarker>> {
        Ok(std::mem::take(&mut self.inner.lock().markers))
    }

    async fn stats(&self) -> CoreResult<RegistryStats> {
        let inner = self.inner.lock();
        Ok(RegistryStats {
            ingested: inner.ingested.len() as u64,
            pending: 0,
            failed: inner.failed.len() as u64,
            last_indexed_at: inner.last_indexed_at,
        })
    }
}
