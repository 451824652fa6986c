//! Vector store backend using Qdrant
//!
//! Dense search with payload-level scope filtering mirroring the lexical
//! adapter's rules. Point ids are derived deterministically from chunk ids
//! so re-ingestion upserts in place; the authoritative chunk id always
//! travels in the payload. Hybrid collections keep their dense vectors
//! under a named slot; the adapter tries the named call first and falls
//! back to the unnamed signature, remembering the outcome per collection.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use qdrant_client::qdrant::{
    condition::ConditionOneOf, point_id::PointIdOptions, value::Kind, Condition,
    CountPointsBuilder, CreateCollectionBuilder, DeletePointsBuilder, Distance, FieldCondition,
    Filter, IsEmptyCondition, ListValue, Match, PointId, PointStruct, Range, RetrievedPoint,
    ScoredPoint, ScrollPointsBuilder, SearchPointsBuilder, SetPayloadPointsBuilder, Struct,
    UpsertPointsBuilder, Value, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use sha2::{Digest, Sha256};

use lexrag_core::{
    Chunk, DeletePredicate, Error as CoreError, Hit, NeighborRef, Result as CoreResult,
    Scope, ScopeFilter, ScrollPage, Sigilo, VectorBackend,
};

use crate::RagError;

/// Vector backend configuration
#[derive(Debug, Clone)]
pub struct VectorConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    /// Name of the dense slot in hybrid (dense+sparse) collections
    pub dense_vector_name: String,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            endpoint: lexrag_config::constants::endpoints::QDRANT_DEFAULT.to_string(),
            api_key: None,
            dense_vector_name: "dense".to_string(),
        }
    }
}

/// Qdrant-backed vector adapter
pub struct QdrantBackend {
    client: Qdrant,
    config: VectorConfig,
    /// Registered dimension per collection; the DimensionMismatch boundary
    dims: DashMap<String, usize>,
    /// Whether the named dense slot worked for a collection
    named_slot: DashMap<String, bool>,
}

impl QdrantBackend {
    pub fn new(config: VectorConfig) -> Result<Arc<Self>, RagError> {
        let mut builder = Qdrant::from_url(&config.endpoint);
        if let Some(ref api_key) = config.api_key {
            builder = builder.api_key(api_key.clone());
            tracing::info!("qdrant connection using API key authentication");
        }
        let client = builder
            .build()
            .map_err(|e| RagError::Connection(e.to_string()))?;

        Ok(Arc::new(Self {
            client,
            config,
            dims: DashMap::new(),
            named_slot: DashMap::new(),
        }))
    }

    /// Deterministic numeric point id from the chunk id
    pub fn point_id_for(chunk_id: &str) -> u64 {
        let digest = Sha256::digest(chunk_id.as_bytes());
        u64::from_be_bytes(digest[..8].try_into().expect("digest is long enough"))
    }

    fn registered_dims(&self, collection: &str) -> usize {
        self.dims
            .get(collection)
            .map(|d| *d)
            .unwrap_or_else(|| lexrag_config::constants::collection_dimensions(collection))
    }

    fn keyword(value: &str) -> Value {
        Value {
            kind: Some(Kind::StringValue(value.to_string())),
        }
    }

    fn integer(value: i64) -> Value {
        Value {
            kind: Some(Kind::IntegerValue(value)),
        }
    }

    fn keyword_list(values: &[String]) -> Value {
        Value {
            kind: Some(Kind::ListValue(ListValue {
                values: values.iter().map(|v| Self::keyword(v)).collect(),
            })),
        }
    }

    fn chunk_payload(chunk: &Chunk) -> HashMap<String, Value> {
        let meta = &chunk.metadata;
        let mut payload = HashMap::new();
        payload.insert("chunk_uid".to_string(), Self::keyword(&chunk.id));
        payload.insert("text".to_string(), Self::keyword(&chunk.text));
        payload.insert("scope".to_string(), Self::keyword(meta.scope.tag()));
        if let Some(tenant) = meta.scope.tenant_id() {
            payload.insert("tenant_id".to_string(), Self::keyword(tenant));
        }
        if let Scope::Local { case_id, .. } = &meta.scope {
            payload.insert("case_id".to_string(), Self::keyword(case_id));
        }
        if let Scope::Group { group_ids, .. } = &meta.scope {
            payload.insert("group_ids".to_string(), Self::keyword_list(group_ids));
        }
        if !meta.allowed_users.is_empty() {
            payload.insert(
                "allowed_users".to_string(),
                Self::keyword_list(&meta.allowed_users),
            );
        }
        payload.insert("sigilo".to_string(), Self::keyword(meta.sigilo.tag()));
        payload.insert("doc_id".to_string(), Self::keyword(&chunk.doc_id));
        payload.insert("position".to_string(), Self::integer(chunk.position));
        if let Some(ref jurisdiction) = meta.jurisdiction {
            payload.insert("jurisdiction".to_string(), Self::keyword(jurisdiction));
        }
        if let Some(ref source_id) = meta.source_id {
            payload.insert("source_id".to_string(), Self::keyword(source_id));
        }
        if let Some(page) = meta.page {
            payload.insert("page".to_string(), Self::integer(page));
        }
        if let Some(uploaded_at) = meta.uploaded_at {
            payload.insert(
                "uploaded_at".to_string(),
                Self::integer(uploaded_at.timestamp()),
            );
        }
        for (k, v) in &meta.extra {
            payload.entry(k.clone()).or_insert_with(|| Self::keyword(v));
        }
        payload
    }

    fn match_keyword(field: &str, value: &str) -> Condition {
        Condition {
            condition_one_of: Some(ConditionOneOf::Field(FieldCondition {
                key: field.to_string(),
                r#match: Some(Match {
                    match_value: Some(qdrant_client::qdrant::r#match::MatchValue::Keyword(
                        value.to_string(),
                    )),
                }),
                ..Default::default()
            })),
        }
    }

    fn match_any(field: &str, values: &[String]) -> Condition {
        Condition {
            condition_one_of: Some(ConditionOneOf::Field(FieldCondition {
                key: field.to_string(),
                r#match: Some(Match {
                    match_value: Some(qdrant_client::qdrant::r#match::MatchValue::Keywords(
                        qdrant_client::qdrant::RepeatedStrings {
                            strings: values.to_vec(),
                        },
                    )),
                }),
                ..Default::default()
            })),
        }
    }

    fn nested(filter: Filter) -> Condition {
        Condition {
            condition_one_of: Some(ConditionOneOf::Filter(filter)),
        }
    }

    /// Payload filter mirroring the lexical scope semantics
    fn scope_filter(filter: &ScopeFilter) -> Filter {
        let mut variants: Vec<Condition> = Vec::new();

        if filter.include_global {
            variants.push(Self::match_keyword("scope", "global"));
        }
        if filter.include_private {
            variants.push(Self::nested(Filter {
                must: vec![
                    Self::match_keyword("scope", "private"),
                    Self::match_keyword("tenant_id", &filter.tenant_id),
                ],
                ..Default::default()
            }));
        }
        if filter.group_clause_active() {
            variants.push(Self::nested(Filter {
                must: vec![
                    Self::match_keyword("scope", "group"),
                    Self::match_keyword("tenant_id", &filter.tenant_id),
                    Self::match_any("group_ids", &filter.group_ids),
                ],
                ..Default::default()
            }));
        }
        if let (true, Some(case_id)) = (filter.include_local, filter.case_id.as_deref()) {
            variants.push(Self::nested(Filter {
                must: vec![
                    Self::match_keyword("scope", "local"),
                    Self::match_keyword("tenant_id", &filter.tenant_id),
                    Self::match_keyword("case_id", case_id),
                ],
                ..Default::default()
            }));
        }

        let scope_tree = Filter {
            should: variants,
            ..Default::default()
        };

        let sigilo_tree = match filter.user_id.as_deref() {
            Some(user_id) => Filter {
                should: vec![
                    Self::match_keyword("sigilo", Sigilo::Public.tag()),
                    Self::match_any("allowed_users", &[user_id.to_string()]),
                ],
                ..Default::default()
            },
            None => Filter {
                must: vec![Self::match_keyword("sigilo", Sigilo::Public.tag())],
                ..Default::default()
            },
        };

        Filter {
            must: vec![Self::nested(scope_tree), Self::nested(sigilo_tree)],
            ..Default::default()
        }
    }

    fn predicate_filter(predicate: &DeletePredicate) -> Filter {
        match predicate {
            DeletePredicate::Doc { doc_id } => Filter {
                must: vec![Self::match_keyword("doc_id", doc_id)],
                ..Default::default()
            },
            DeletePredicate::ExpiredLocal { cutoff } => Filter {
                must: vec![
                    Self::match_keyword("scope", "local"),
                    Condition {
                        condition_one_of: Some(ConditionOneOf::Field(FieldCondition {
                            key: "uploaded_at".to_string(),
                            range: Some(Range {
                                lt: Some(cutoff.timestamp() as f64),
                                ..Default::default()
                            }),
                            ..Default::default()
                        })),
                    },
                ],
                ..Default::default()
            },
            DeletePredicate::Term { field, value } => Filter {
                must: vec![Self::match_keyword(field, value)],
                ..Default::default()
            },
            DeletePredicate::Missing { field } => Filter {
                must: vec![Condition {
                    condition_one_of: Some(ConditionOneOf::IsEmpty(IsEmptyCondition {
                        key: field.clone(),
                    })),
                }],
                ..Default::default()
            },
        }
    }

    fn value_to_json(value: Value) -> serde_json::Value {
        match value.kind {
            Some(Kind::StringValue(s)) => serde_json::Value::String(s),
            Some(Kind::IntegerValue(n)) => serde_json::json!(n),
            Some(Kind::DoubleValue(d)) => serde_json::json!(d),
            Some(Kind::BoolValue(b)) => serde_json::Value::Bool(b),
            Some(Kind::ListValue(list)) => serde_json::Value::Array(
                list.values.into_iter().map(Self::value_to_json).collect(),
            ),
            Some(Kind::StructValue(Struct { fields })) => serde_json::Value::Object(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, Self::value_to_json(v)))
                    .collect(),
            ),
            _ => serde_json::Value::Null,
        }
    }

    fn point_id_string(id: Option<PointId>) -> String {
        match id.and_then(|p| p.point_id_options) {
            Some(PointIdOptions::Uuid(u)) => u,
            Some(PointIdOptions::Num(n)) => n.to_string(),
            None => String::new(),
        }
    }

    fn payload_to_hit(
        payload: HashMap<String, Value>,
        id: Option<PointId>,
        score: f32,
        collection: &str,
    ) -> Hit {
        let mut metadata = HashMap::new();
        let mut text = String::new();
        let mut chunk_uid = String::new();
        let mut doc_id = None;
        let mut position = None;

        for (key, value) in payload {
            match key.as_str() {
                "text" => {
                    if let Some(Kind::StringValue(s)) = value.kind {
                        text = s;
                    }
                },
                "chunk_uid" => {
                    if let Some(Kind::StringValue(s)) = value.kind {
                        chunk_uid = s;
                    }
                },
                "doc_id" => {
                    if let Some(Kind::StringValue(ref s)) = value.kind {
                        doc_id = Some(s.clone());
                    }
                    metadata.insert(key, Self::value_to_json(value));
                },
                "position" => {
                    if let Some(Kind::IntegerValue(n)) = value.kind {
                        position = Some(n);
                    }
                    metadata.insert(key, Self::value_to_json(value));
                },
                _ => {
                    metadata.insert(key, Self::value_to_json(value));
                },
            }
        }

        if chunk_uid.is_empty() {
            chunk_uid = Self::point_id_string(id);
        }

        Hit {
            chunk_id: chunk_uid,
            score,
            fused_score: None,
            text,
            source_collection: collection.to_string(),
            doc_id,
            position,
            metadata,
        }
    }

    fn scored_to_hit(point: ScoredPoint, collection: &str) -> Hit {
        Self::payload_to_hit(point.payload, point.id, point.score, collection)
    }

    fn retrieved_to_hit(point: RetrievedPoint, collection: &str) -> Hit {
        Self::payload_to_hit(point.payload, point.id, 0.0, collection)
    }

    async fn search_points(
        &self,
        collection: &str,
        vector: &[f32],
        filter: Option<Filter>,
        top_k: usize,
    ) -> Result<Vec<ScoredPoint>, RagError> {
        let use_named = self
            .named_slot
            .get(collection)
            .map(|v| *v)
            .unwrap_or(true);

        if use_named {
            let mut builder =
                SearchPointsBuilder::new(collection, vector.to_vec(), top_k as u64)
                    .with_payload(true)
                    .vector_name(self.config.dense_vector_name.clone());
            if let Some(ref f) = filter {
                builder = builder.filter(f.clone());
            }
            match self.client.search_points(builder).await {
                Ok(response) => {
                    self.named_slot.insert(collection.to_string(), true);
                    return Ok(response.result);
                },
                Err(e) => {
                    // Plain collections reject the named-slot signature;
                    // fall through to the unnamed call
                    tracing::debug!(
                        collection,
                        error = %e,
                        "named dense slot rejected, retrying unnamed"
                    );
                    self.named_slot.insert(collection.to_string(), false);
                },
            }
        }

        let mut builder = SearchPointsBuilder::new(collection, vector.to_vec(), top_k as u64)
            .with_payload(true);
        if let Some(f) = filter {
            builder = builder.filter(f);
        }
        let response = self
            .client
            .search_points(builder)
            .await
            .map_err(|e| RagError::Search(e.to_string()))?;
        Ok(response.result)
    }
}

#[async_trait]
impl VectorBackend for QdrantBackend {
    async fn ensure_collection(&self, name: &str, dims: usize) -> CoreResult<()> {
        if let Some(registered) = self.dims.get(name) {
            if *registered != dims {
                return Err(CoreError::DimensionMismatch {
                    collection: name.to_string(),
                    expected: *registered,
                    actual: dims,
                });
            }
            return Ok(());
        }

        let exists = self
            .client
            .collection_exists(name)
            .await
            .map_err(|e| CoreError::BackendUnavailable(e.to_string()))?;

        if !exists {
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(name).vectors_config(VectorParamsBuilder::new(
                        dims as u64,
                        Distance::Cosine,
                    )),
                )
                .await
                .map_err(|e| CoreError::BackendUnavailable(e.to_string()))?;
            tracing::info!(collection = name, dims, "vector collection created");
        }

        self.dims.insert(name.to_string(), dims);
        Ok(())
    }

    async fn upsert(&self, collection: &str, chunk: &Chunk, vector: &[f32]) -> CoreResult<()> {
        let expected = self.registered_dims(collection);
        if vector.len() != expected {
            return Err(CoreError::DimensionMismatch {
                collection: collection.to_string(),
                expected,
                actual: vector.len(),
            });
        }

        let point = PointStruct::new(
            Self::point_id_for(&chunk.id),
            vector.to_vec(),
            qdrant_client::Payload::from(Self::chunk_payload(chunk)),
        );

        self.client
            .upsert_points(UpsertPointsBuilder::new(collection, vec![point]))
            .await
            .map_err(|e| CoreError::BackendUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        filter: Option<&ScopeFilter>,
        top_k: usize,
    ) -> CoreResult<Vec<Hit>> {
        let expected = self.registered_dims(collection);
        if vector.len() != expected {
            return Err(CoreError::DimensionMismatch {
                collection: collection.to_string(),
                expected,
                actual: vector.len(),
            });
        }

        let qdrant_filter = filter.map(Self::scope_filter);
        let points = self
            .search_points(collection, vector, qdrant_filter, top_k)
            .await
            .map_err(CoreError::from)?;

        Ok(points
            .into_iter()
            .map(|p| Self::scored_to_hit(p, collection))
            .collect())
    }

    async fn scroll(
        &self,
        collection: &str,
        predicate: Option<&DeletePredicate>,
        batch_size: usize,
        offset: Option<String>,
    ) -> CoreResult<ScrollPage> {
        let mut builder = ScrollPointsBuilder::new(collection)
            .limit(batch_size as u32)
            .with_payload(true);
        if let Some(predicate) = predicate {
            builder = builder.filter(Self::predicate_filter(predicate));
        }
        if let Some(offset) = offset {
            let point_id = match offset.parse::<u64>() {
                Ok(num) => PointId::from(num),
                Err(_) => PointId::from(offset),
            };
            builder = builder.offset(point_id);
        }

        let response = self
            .client
            .scroll(builder)
            .await
            .map_err(|e| CoreError::BackendUnavailable(e.to_string()))?;

        let next_offset = response
            .next_page_offset
            .map(|id| Self::point_id_string(Some(id)));
        let hits = response
            .result
            .into_iter()
            .map(|p| Self::retrieved_to_hit(p, collection))
            .collect();

        Ok(ScrollPage { hits, next_offset })
    }

    async fn set_payload(
        &self,
        collection: &str,
        chunk_id: &str,
        patch: HashMap<String, serde_json::Value>,
    ) -> CoreResult<()> {
        let payload: HashMap<String, Value> = patch
            .into_iter()
            .map(|(k, v)| (k, json_to_value(v)))
            .collect();

        let points: Vec<PointId> = vec![PointId::from(Self::point_id_for(chunk_id))];
        self.client
            .set_payload(
                SetPayloadPointsBuilder::new(collection, qdrant_client::Payload::from(payload))
                    .points_selector(qdrant_client::qdrant::PointsIdsList { ids: points })
                    .wait(true),
            )
            .await
            .map_err(|e| CoreError::BackendUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn fetch_by_position(
        &self,
        collection: &str,
        refs: &[NeighborRef],
    ) -> CoreResult<Vec<Hit>> {
        if refs.is_empty() {
            return Ok(Vec::new());
        }

        // One round-trip: OR over (doc_id AND position) pairs
        let variants: Vec<Condition> = refs
            .iter()
            .map(|r| {
                Self::nested(Filter {
                    must: vec![
                        Self::match_keyword("doc_id", &r.doc_id),
                        Condition {
                            condition_one_of: Some(ConditionOneOf::Field(FieldCondition {
                                key: "position".to_string(),
                                r#match: Some(Match {
                                    match_value: Some(
                                        qdrant_client::qdrant::r#match::MatchValue::Integer(
                                            r.position,
                                        ),
                                    ),
                                }),
                                ..Default::default()
                            })),
                        },
                    ],
                    ..Default::default()
                })
            })
            .collect();

        let filter = Filter {
            should: variants,
            ..Default::default()
        };

        let response = self
            .client
            .scroll(
                ScrollPointsBuilder::new(collection)
                    .filter(filter)
                    .limit((refs.len() * 2) as u32)
                    .with_payload(true),
            )
            .await
            .map_err(|e| CoreError::BackendUnavailable(e.to_string()))?;

        Ok(response
            .result
            .into_iter()
            .map(|p| Self::retrieved_to_hit(p, collection))
            .collect())
    }

    async fn delete_where(&self, collection: &str, predicate: &DeletePredicate) -> CoreResult<u64> {
        let filter = Self::predicate_filter(predicate);

        let before = self.count(collection, Some(predicate)).await?;
        if before == 0 {
            return Ok(0);
        }

        self.client
            .delete_points(
                DeletePointsBuilder::new(collection)
                    .points(filter)
                    .wait(true),
            )
            .await
            .map_err(|e| CoreError::BackendUnavailable(e.to_string()))?;

        Ok(before)
    }

    async fn count(&self, collection: &str, predicate: Option<&DeletePredicate>) -> CoreResult<u64> {
        let mut builder = CountPointsBuilder::new(collection).exact(true);
        if let Some(predicate) = predicate {
            builder = builder.filter(Self::predicate_filter(predicate));
        }
        let response = self
            .client
            .count(builder)
            .await
            .map_err(|e| CoreError::BackendUnavailable(e.to_string()))?;
        Ok(response.result.map(|r| r.count).unwrap_or(0))
    }
}

fn json_to_value(value: serde_json::Value) -> Value {
    match value {
        serde_json::Value::String(s) => Value {
            kind: Some(Kind::StringValue(s)),
        },
        serde_json::Value::Bool(b) => Value {
            kind: Some(Kind::BoolValue(b)),
        },
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value {
                    kind: Some(Kind::IntegerValue(i)),
                }
            } else {
                Value {
                    kind: Some(Kind::DoubleValue(n.as_f64().unwrap_or(0.0))),
                }
            }
        },
        serde_json::Value::Array(items) => Value {
            kind: Some(Kind::ListValue(ListValue {
                values: items.into_iter().map(json_to_value).collect(),
            })),
        },
        serde_json::Value::Object(map) => Value {
            kind: Some(Kind::StructValue(Struct {
                fields: map.into_iter().map(|(k, v)| (k, json_to_value(v))).collect(),
            })),
        },
        serde_json::Value::Null => Value { kind: None },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lexrag_core::ChunkMetadata;

    fn sample_chunk() -> Chunk {
        let mut metadata = ChunkMetadata::new(Scope::Local {
            tenant_id: "T1".into(),
            case_id: "C1".into(),
        });
        metadata.uploaded_at = Some(Utc::now());
        metadata.jurisdiction = Some("BR".into());
        Chunk {
            id: "abc123".into(),
            text: "Art. 5º Todos são iguais perante a lei".into(),
            position: 3,
            doc_id: "cf88".into(),
            metadata,
        }
    }

    #[test]
    fn test_point_id_deterministic() {
        let a = QdrantBackend::point_id_for("abc123");
        let b = QdrantBackend::point_id_for("abc123");
        let c = QdrantBackend::point_id_for("abc124");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_chunk_payload_fields() {
        let payload = QdrantBackend::chunk_payload(&sample_chunk());
        assert!(matches!(
            payload["scope"].kind,
            Some(Kind::StringValue(ref s)) if s == "local"
        ));
        assert!(matches!(
            payload["tenant_id"].kind,
            Some(Kind::StringValue(ref s)) if s == "T1"
        ));
        assert!(matches!(
            payload["case_id"].kind,
            Some(Kind::StringValue(ref s)) if s == "C1"
        ));
        assert!(matches!(payload["position"].kind, Some(Kind::IntegerValue(3))));
        assert!(payload.contains_key("uploaded_at"));
    }

    #[test]
    fn test_scope_filter_tree_shape() {
        let filter = ScopeFilter::new("T1")
            .case_id("C1")
            .group_ids(vec!["g1".into()]);
        let qf = QdrantBackend::scope_filter(&filter);

        // Top level: scope tree AND sigilo tree
        assert_eq!(qf.must.len(), 2);

        let scope_tree = match &qf.must[0].condition_one_of {
            Some(ConditionOneOf::Filter(f)) => f,
            other => panic!("expected nested filter, got {other:?}"),
        };
        // global, private, group, local variants
        assert_eq!(scope_tree.should.len(), 4);

        // No user_id: sigilo clause is a bare must on public
        let sigilo_tree = match &qf.must[1].condition_one_of {
            Some(ConditionOneOf::Filter(f)) => f,
            other => panic!("expected nested filter, got {other:?}"),
        };
        assert_eq!(sigilo_tree.must.len(), 1);
        assert!(sigilo_tree.should.is_empty());
    }

    #[test]
    fn test_scope_filter_with_user_allows_restricted() {
        let filter = ScopeFilter::new("T1").user_id("u1");
        let qf = QdrantBackend::scope_filter(&filter);
        let sigilo_tree = match &qf.must[1].condition_one_of {
            Some(ConditionOneOf::Filter(f)) => f,
            other => panic!("expected nested filter, got {other:?}"),
        };
        assert_eq!(sigilo_tree.should.len(), 2);
    }

    #[test]
    fn test_scope_filter_skips_inactive_clauses() {
        // No case_id and no groups: only global+private variants remain
        let filter = ScopeFilter::new("T1");
        let qf = QdrantBackend::scope_filter(&filter);
        let scope_tree = match &qf.must[0].condition_one_of {
            Some(ConditionOneOf::Filter(f)) => f,
            other => panic!("expected nested filter, got {other:?}"),
        };
        assert_eq!(scope_tree.should.len(), 2);
    }

    #[test]
    fn test_predicate_filters() {
        let doc = QdrantBackend::predicate_filter(&DeletePredicate::Doc {
            doc_id: "d1".into(),
        });
        assert_eq!(doc.must.len(), 1);

        let expired = QdrantBackend::predicate_filter(&DeletePredicate::ExpiredLocal {
            cutoff: Utc::now(),
        });
        assert_eq!(expired.must.len(), 2);

        let missing = QdrantBackend::predicate_filter(&DeletePredicate::Missing {
            field: "jurisdiction".into(),
        });
        assert!(matches!(
            missing.must[0].condition_one_of,
            Some(ConditionOneOf::IsEmpty(_))
        ));
    }

    #[test]
    fn test_payload_roundtrip_to_hit() {
        let payload = QdrantBackend::chunk_payload(&sample_chunk());
        let hit = QdrantBackend::payload_to_hit(payload, None, 0.88, "legal_br_v4");
        assert_eq!(hit.chunk_id, "abc123");
        assert_eq!(hit.doc_id.as_deref(), Some("cf88"));
        assert_eq!(hit.position, Some(3));
        assert_eq!(hit.score, 0.88);
        assert_eq!(hit.source_collection, "legal_br_v4");
        assert!(hit.text.contains("Art. 5º"));
        assert_eq!(hit.metadata_str("jurisdiction"), Some("BR"));
    }

    #[test]
    fn test_json_value_conversion() {
        let v = json_to_value(serde_json::json!({"a": 1, "b": ["x"], "c": true}));
        match v.kind {
            Some(Kind::StructValue(s)) => {
                assert!(matches!(s.fields["a"].kind, Some(Kind::IntegerValue(1))));
                assert!(matches!(s.fields["c"].kind, Some(Kind::BoolValue(true))));
            },
            other => panic!("expected struct, got {other:?}"),
        }
    }
}
