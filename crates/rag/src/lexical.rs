//! Lexical BM25 backend using Tantivy
//!
//! One named index per legacy collection, held behind a shared handle map.
//! Scope filtering is compiled into the query tree itself: exactly one of
//! {global, private, group, local} must admit the chunk, AND the sigilo
//! clause must pass. A request with the wrong tenant therefore scores zero
//! private/group/local rows inside the engine, not in post-processing.

use std::collections::HashMap;
use std::ops::Bound;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tantivy::collector::{Count, TopDocs};
use tantivy::query::{BooleanQuery, ExistsQuery, Occur, Query, QueryParser, RangeQuery, TermQuery};
use tantivy::schema::{
    Field, IndexRecordOption, OwnedValue, Schema, TextFieldIndexing, TextOptions, FAST, INDEXED,
    STORED, STRING,
};
use tantivy::tokenizer::{AsciiFoldingFilter, LowerCaser, RemoveLongFilter, SimpleTokenizer, TextAnalyzer};
use tantivy::{Index, IndexReader, IndexWriter, TantivyDocument, Term};

use lexrag_core::{
    Chunk, DeletePredicate, Error as CoreError, Hit, LexicalBackend, NeighborRef, Result as CoreResult,
    ScopeFilter, Sigilo,
};

use crate::RagError;

const TOKENIZER_NAME: &str = "legal";

/// Lexical backend configuration
#[derive(Debug, Clone)]
pub struct LexicalConfig {
    /// Root directory for on-disk indices; `None` keeps them in RAM
    pub index_root: Option<PathBuf>,
    /// Writer heap per index
    pub writer_buffer_bytes: usize,
}

impl Default for LexicalConfig {
    fn default() -> Self {
        Self {
            index_root: None,
            writer_buffer_bytes: 50_000_000,
        }
    }
}

#[derive(Clone, Copy)]
struct Fields {
    chunk_uid: Field,
    text: Field,
    scope: Field,
    tenant_id: Field,
    case_id: Field,
    group_ids: Field,
    allowed_users: Field,
    sigilo: Field,
    doc_id: Field,
    jurisdiction: Field,
    source_id: Field,
    position: Field,
    page: Field,
    uploaded_at: Field,
    extra: Field,
}

struct IndexHandle {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    fields: Fields,
}

/// Tantivy-backed lexical adapter
pub struct TantivyBackend {
    config: LexicalConfig,
    indices: DashMap<String, Arc<IndexHandle>>,
}

impl TantivyBackend {
    pub fn new(config: LexicalConfig) -> Self {
        Self {
            config,
            indices: DashMap::new(),
        }
    }

    fn build_schema() -> (Schema, Fields) {
        let mut builder = Schema::builder();

        let text_options = TextOptions::default()
            .set_indexing_options(
                TextFieldIndexing::default()
                    .set_tokenizer(TOKENIZER_NAME)
                    .set_index_option(IndexRecordOption::WithFreqsAndPositions),
            )
            .set_stored();

        let fields = Fields {
            chunk_uid: builder.add_text_field("chunk_uid", STRING | STORED),
            text: builder.add_text_field("text", text_options),
            scope: builder.add_text_field("scope", STRING | STORED),
            tenant_id: builder.add_text_field("tenant_id", STRING | STORED),
            case_id: builder.add_text_field("case_id", STRING | STORED),
            group_ids: builder.add_text_field("group_ids", STRING | STORED),
            allowed_users: builder.add_text_field("allowed_users", STRING | STORED),
            sigilo: builder.add_text_field("sigilo", STRING | STORED),
            doc_id: builder.add_text_field("doc_id", STRING | STORED | FAST),
            jurisdiction: builder.add_text_field("jurisdiction", STRING | STORED | FAST),
            source_id: builder.add_text_field("source_id", STRING | STORED | FAST),
            position: builder.add_i64_field("position", INDEXED | STORED | FAST),
            page: builder.add_i64_field("page", INDEXED | STORED),
            uploaded_at: builder.add_i64_field("uploaded_at", INDEXED | STORED | FAST),
            extra: builder.add_text_field("extra", STORED),
        };

        (builder.build(), fields)
    }

    fn build_tokenizer() -> TextAnalyzer {
        TextAnalyzer::builder(SimpleTokenizer::default())
            .filter(RemoveLongFilter::limit(100))
            .filter(LowerCaser)
            .filter(AsciiFoldingFilter)
            .build()
    }

    fn handle(&self, name: &str) -> Result<Arc<IndexHandle>, RagError> {
        self.indices
            .get(name)
            .map(|h| Arc::clone(h.value()))
            .ok_or_else(|| RagError::Index(format!("index '{name}' not initialized")))
    }

    fn open_index(&self, name: &str) -> Result<Arc<IndexHandle>, RagError> {
        let (schema, fields) = Self::build_schema();

        let index = match &self.config.index_root {
            Some(root) => {
                let dir = root.join(name);
                std::fs::create_dir_all(&dir).map_err(|e| RagError::Index(e.to_string()))?;
                let mmap = tantivy::directory::MmapDirectory::open(&dir)
                    .map_err(|e| RagError::Index(e.to_string()))?;
                Index::open_or_create(mmap, schema).map_err(|e| RagError::Index(e.to_string()))?
            },
            None => Index::create_in_ram(schema),
        };

        index
            .tokenizers()
            .register(TOKENIZER_NAME, Self::build_tokenizer());

        let reader = index.reader().map_err(|e| RagError::Index(e.to_string()))?;
        let writer = index
            .writer(self.config.writer_buffer_bytes)
            .map_err(|e| RagError::Index(e.to_string()))?;

        tracing::info!(index = name, "lexical index ready");

        Ok(Arc::new(IndexHandle {
            index,
            reader,
            writer: Mutex::new(writer),
            fields,
        }))
    }

    fn chunk_to_doc(fields: &Fields, chunk: &Chunk) -> TantivyDocument {
        let mut doc = TantivyDocument::default();
        let meta = &chunk.metadata;

        doc.add_text(fields.chunk_uid, &chunk.id);
        doc.add_text(fields.text, &chunk.text);
        doc.add_text(fields.scope, meta.scope.tag());
        if let Some(tenant) = meta.scope.tenant_id() {
            doc.add_text(fields.tenant_id, tenant);
        }
        if let lexrag_core::Scope::Local { case_id, .. } = &meta.scope {
            doc.add_text(fields.case_id, case_id);
        }
        if let lexrag_core::Scope::Group { group_ids, .. } = &meta.scope {
            for group in group_ids {
                doc.add_text(fields.group_ids, group);
            }
        }
        for user in &meta.allowed_users {
            doc.add_text(fields.allowed_users, user);
        }
        doc.add_text(fields.sigilo, meta.sigilo.tag());
        doc.add_text(fields.doc_id, &chunk.doc_id);
        if let Some(ref jurisdiction) = meta.jurisdiction {
            doc.add_text(fields.jurisdiction, jurisdiction);
        }
        if let Some(ref source_id) = meta.source_id {
            doc.add_text(fields.source_id, source_id);
        }
        doc.add_i64(fields.position, chunk.position);
        if let Some(page) = meta.page {
            doc.add_i64(fields.page, page);
        }
        if let Some(uploaded_at) = meta.uploaded_at {
            doc.add_i64(fields.uploaded_at, uploaded_at.timestamp());
        }
        if !meta.extra.is_empty() {
            if let Ok(json) = serde_json::to_string(&meta.extra) {
                doc.add_text(fields.extra, &json);
            }
        }
        doc
    }

    fn term_query(field: Field, value: &str) -> Box<dyn Query> {
        Box::new(TermQuery::new(
            Term::from_field_text(field, value),
            IndexRecordOption::Basic,
        ))
    }

    /// Boolean tree enforcing the scope rules. Exactly one scope variant
    /// must admit the chunk; the sigilo clause is conjoined on top.
    fn scope_query(fields: &Fields, filter: &ScopeFilter) -> Box<dyn Query> {
        let mut variants: Vec<(Occur, Box<dyn Query>)> = Vec::new();

        if filter.include_global {
            variants.push((Occur::Should, Self::term_query(fields.scope, "global")));
        }
        if filter.include_private {
            variants.push((
                Occur::Should,
                Box::new(BooleanQuery::new(vec![
                    (Occur::Must, Self::term_query(fields.scope, "private")),
                    (
                        Occur::Must,
                        Self::term_query(fields.tenant_id, &filter.tenant_id),
                    ),
                ])),
            ));
        }
        if filter.group_clause_active() {
            let any_group: Vec<(Occur, Box<dyn Query>)> = filter
                .group_ids
                .iter()
                .map(|g| (Occur::Should, Self::term_query(fields.group_ids, g)))
                .collect();
            variants.push((
                Occur::Should,
                Box::new(BooleanQuery::new(vec![
                    (Occur::Must, Self::term_query(fields.scope, "group")),
                    (
                        Occur::Must,
                        Self::term_query(fields.tenant_id, &filter.tenant_id),
                    ),
                    (Occur::Must, Box::new(BooleanQuery::new(any_group))),
                ])),
            ));
        }
        if let (true, Some(case_id)) = (filter.include_local, filter.case_id.as_deref()) {
            variants.push((
                Occur::Should,
                Box::new(BooleanQuery::new(vec![
                    (Occur::Must, Self::term_query(fields.scope, "local")),
                    (
                        Occur::Must,
                        Self::term_query(fields.tenant_id, &filter.tenant_id),
                    ),
                    (Occur::Must, Self::term_query(fields.case_id, case_id)),
                ])),
            ));
        }

        let scope_tree: Box<dyn Query> = Box::new(BooleanQuery::new(variants));

        let sigilo_tree: Box<dyn Query> = match filter.user_id.as_deref() {
            Some(user_id) => Box::new(BooleanQuery::new(vec![
                (
                    Occur::Should,
                    Self::term_query(fields.sigilo, Sigilo::Public.tag()),
                ),
                (
                    Occur::Should,
                    Self::term_query(fields.allowed_users, user_id),
                ),
            ])),
            None => Self::term_query(fields.sigilo, Sigilo::Public.tag()),
        };

        Box::new(BooleanQuery::new(vec![
            (Occur::Must, scope_tree),
            (Occur::Must, sigilo_tree),
        ]))
    }

    fn predicate_query(
        handle: &IndexHandle,
        predicate: &DeletePredicate,
    ) -> Result<Box<dyn Query>, RagError> {
        let fields = &handle.fields;
        match predicate {
            DeletePredicate::Doc { doc_id } => Ok(Self::term_query(fields.doc_id, doc_id)),
            DeletePredicate::ExpiredLocal { cutoff } => {
                let range = RangeQuery::new_i64_bounds(
                    "uploaded_at".to_string(),
                    Bound::Unbounded,
                    Bound::Excluded(cutoff.timestamp()),
                );
                Ok(Box::new(BooleanQuery::new(vec![
                    (Occur::Must, Self::term_query(fields.scope, "local")),
                    (Occur::Must, Box::new(range)),
                ])))
            },
            DeletePredicate::Term { field, value } => {
                let field = Self::field_by_name(fields, field)
                    .ok_or_else(|| RagError::Index(format!("unknown field '{field}'")))?;
                Ok(Self::term_query(field, value))
            },
            DeletePredicate::Missing { field } => {
                // exists() needs a fast field; complement it for "missing"
                let all: Box<dyn Query> = Box::new(tantivy::query::AllQuery);
                let exists: Box<dyn Query> = Box::new(ExistsQuery::new_exists_query(field.clone()));
                Ok(Box::new(BooleanQuery::new(vec![
                    (Occur::Must, all),
                    (Occur::MustNot, exists),
                ])))
            },
        }
    }

    fn field_by_name(fields: &Fields, name: &str) -> Option<Field> {
        match name {
            "chunk_uid" => Some(fields.chunk_uid),
            "scope" => Some(fields.scope),
            "tenant_id" => Some(fields.tenant_id),
            "case_id" => Some(fields.case_id),
            "group_ids" => Some(fields.group_ids),
            "allowed_users" => Some(fields.allowed_users),
            "sigilo" => Some(fields.sigilo),
            "doc_id" => Some(fields.doc_id),
            "jurisdiction" => Some(fields.jurisdiction),
            "source_id" => Some(fields.source_id),
            _ => None,
        }
    }

    fn str_value(doc: &TantivyDocument, field: Field) -> Option<String> {
        doc.get_first(field).and_then(|v| match v {
            OwnedValue::Str(s) => Some(s.clone()),
            _ => None,
        })
    }

    fn i64_value(doc: &TantivyDocument, field: Field) -> Option<i64> {
        doc.get_first(field).and_then(|v| match v {
            OwnedValue::I64(n) => Some(*n),
            _ => None,
        })
    }

    fn doc_to_hit(handle: &IndexHandle, doc: &TantivyDocument, score: f32, index: &str) -> Hit {
        let fields = &handle.fields;
        let mut metadata: HashMap<String, serde_json::Value> = HashMap::new();

        for (name, field) in [
            ("scope", fields.scope),
            ("tenant_id", fields.tenant_id),
            ("case_id", fields.case_id),
            ("sigilo", fields.sigilo),
            ("jurisdiction", fields.jurisdiction),
            ("source_id", fields.source_id),
        ] {
            if let Some(value) = Self::str_value(doc, field) {
                metadata.insert(name.to_string(), serde_json::Value::String(value));
            }
        }
        let groups: Vec<serde_json::Value> = doc
            .get_all(fields.group_ids)
            .filter_map(|v| match v {
                OwnedValue::Str(s) => Some(serde_json::Value::String(s.clone())),
                _ => None,
            })
            .collect();
        if !groups.is_empty() {
            metadata.insert("group_ids".to_string(), serde_json::Value::Array(groups));
        }
        if let Some(page) = Self::i64_value(doc, fields.page) {
            metadata.insert("page".to_string(), serde_json::json!(page));
        }
        if let Some(uploaded_at) = Self::i64_value(doc, fields.uploaded_at) {
            metadata.insert("uploaded_at".to_string(), serde_json::json!(uploaded_at));
        }
        if let Some(extra) = Self::str_value(doc, fields.extra) {
            if let Ok(map) = serde_json::from_str::<HashMap<String, String>>(&extra) {
                for (k, v) in map {
                    metadata.entry(k).or_insert(serde_json::Value::String(v));
                }
            }
        }

        Hit {
            chunk_id: Self::str_value(doc, fields.chunk_uid).unwrap_or_default(),
            score,
            fused_score: None,
            text: Self::str_value(doc, fields.text).unwrap_or_default(),
            source_collection: index.to_string(),
            doc_id: Self::str_value(doc, fields.doc_id),
            position: Self::i64_value(doc, fields.position),
            metadata,
        }
    }

    fn search_one_index(
        handle: &IndexHandle,
        index_name: &str,
        query_text: &str,
        filter: &ScopeFilter,
        size: usize,
    ) -> Result<Vec<Hit>, RagError> {
        let searcher = handle.reader.searcher();

        let parser = QueryParser::for_index(&handle.index, vec![handle.fields.text]);
        let (user_query, errors) = parser.parse_query_lenient(query_text);
        if !errors.is_empty() {
            tracing::debug!(?errors, "lenient query parse dropped some clauses");
        }

        let full = BooleanQuery::new(vec![
            (Occur::Must, user_query),
            (Occur::Must, Self::scope_query(&handle.fields, filter)),
        ]);

        let top_docs = searcher
            .search(&full, &TopDocs::with_limit(size.max(1)))
            .map_err(|e| RagError::Search(e.to_string()))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(address)
                .map_err(|e| RagError::Search(e.to_string()))?;
            hits.push(Self::doc_to_hit(handle, &doc, score, index_name));
        }
        Ok(hits)
    }

    fn collect_matching(
        handle: &IndexHandle,
        query: &dyn Query,
        limit: usize,
        index_name: &str,
    ) -> Result<Vec<Hit>, RagError> {
        let searcher = handle.reader.searcher();
        let top_docs = searcher
            .search(query, &TopDocs::with_limit(limit.max(1)))
            .map_err(|e| RagError::Search(e.to_string()))?;
        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(address)
                .map_err(|e| RagError::Search(e.to_string()))?;
            hits.push(Self::doc_to_hit(handle, &doc, score, index_name));
        }
        Ok(hits)
    }

    fn commit_and_reload(handle: &IndexHandle) -> Result<(), RagError> {
        handle
            .writer
            .lock()
            .commit()
            .map_err(|e| RagError::Index(e.to_string()))?;
        handle
            .reader
            .reload()
            .map_err(|e| RagError::Index(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl LexicalBackend for TantivyBackend {
    async fn ensure_index(&self, name: &str) -> CoreResult<()> {
        if self.indices.contains_key(name) {
            return Ok(());
        }
        let handle = self.open_index(name).map_err(CoreError::from)?;
        self.indices.entry(name.to_string()).or_insert(handle);
        Ok(())
    }

    async fn index_chunk(&self, index: &str, chunk: &Chunk) -> CoreResult<()> {
        self.ensure_index(index).await?;
        let handle = self.handle(index).map_err(CoreError::from)?;
        let chunk = chunk.clone();

        tokio::task::spawn_blocking(move || -> Result<(), RagError> {
            {
                let writer = handle.writer.lock();
                // Re-ingesting the same chunk id replaces the old row
                writer.delete_term(Term::from_field_text(handle.fields.chunk_uid, &chunk.id));
                writer
                    .add_document(TantivyBackend::chunk_to_doc(&handle.fields, &chunk))
                    .map_err(|e| RagError::Index(e.to_string()))?;
            }
            TantivyBackend::commit_and_reload(&handle)
        })
        .await
        .map_err(|e| CoreError::BackendUnavailable(format!("index task failed: {e}")))?
        .map_err(CoreError::from)
    }

    async fn search_lexical(
        &self,
        indices: &[String],
        query: &str,
        filter: &ScopeFilter,
        size: usize,
    ) -> CoreResult<Vec<Hit>> {
        let mut handles = Vec::new();
        for name in indices {
            // Unknown indices are a caller error, not an empty result
            let handle = self.handle(name).map_err(|_| {
                CoreError::InvalidInput(format!("unknown dataset '{name}'"))
            })?;
            handles.push((name.clone(), handle));
        }

        let query = query.to_string();
        let filter = filter.clone();

        let mut hits = tokio::task::spawn_blocking(move || -> Result<Vec<Hit>, RagError> {
            let mut all = Vec::new();
            for (name, handle) in &handles {
                all.extend(TantivyBackend::search_one_index(
                    handle, name, &query, &filter, size,
                )?);
            }
            Ok(all)
        })
        .await
        .map_err(|e| CoreError::BackendUnavailable(format!("search task failed: {e}")))?
        .map_err(CoreError::from)?;

        // Deterministic adapter-internal order: score desc, id asc
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(size);
        Ok(hits)
    }

    async fn fetch_by_position(&self, index: &str, refs: &[NeighborRef]) -> CoreResult<Vec<Hit>> {
        if refs.is_empty() {
            return Ok(Vec::new());
        }
        let handle = self.handle(index).map_err(CoreError::from)?;
        let refs = refs.to_vec();
        let index_name = index.to_string();

        tokio::task::spawn_blocking(move || -> Result<Vec<Hit>, RagError> {
            let clauses: Vec<(Occur, Box<dyn Query>)> = refs
                .iter()
                .map(|r| {
                    let pair: Box<dyn Query> = Box::new(BooleanQuery::new(vec![
                        (
                            Occur::Must,
                            TantivyBackend::term_query(handle.fields.doc_id, &r.doc_id),
                        ),
                        (
                            Occur::Must,
                            Box::new(TermQuery::new(
                                Term::from_field_i64(handle.fields.position, r.position),
                                IndexRecordOption::Basic,
                            )) as Box<dyn Query>,
                        ),
                    ]));
                    (Occur::Should, pair)
                })
                .collect();
            let query = BooleanQuery::new(clauses);
            TantivyBackend::collect_matching(&handle, &query, refs.len() * 2, &index_name)
        })
        .await
        .map_err(|e| CoreError::BackendUnavailable(format!("fetch task failed: {e}")))?
        .map_err(CoreError::from)
    }

    async fn delete_where(&self, index: &str, predicate: &DeletePredicate) -> CoreResult<u64> {
        let handle = self.handle(index).map_err(CoreError::from)?;
        let predicate = predicate.clone();
        let index_name = index.to_string();

        tokio::task::spawn_blocking(move || -> Result<u64, RagError> {
            let query = TantivyBackend::predicate_query(&handle, &predicate)?;
            let total = handle
                .reader
                .searcher()
                .search(query.as_ref(), &Count)
                .map_err(|e| RagError::Search(e.to_string()))?;
            if total == 0 {
                return Ok(0);
            }
            let matching =
                TantivyBackend::collect_matching(&handle, query.as_ref(), total, &index_name)?;
            let removed = matching.len() as u64;
            if removed > 0 {
                {
                    let writer = handle.writer.lock();
                    for hit in &matching {
                        writer.delete_term(Term::from_field_text(
                            handle.fields.chunk_uid,
                            &hit.chunk_id,
                        ));
                    }
                }
                TantivyBackend::commit_and_reload(&handle)?;
            }
            Ok(removed)
        })
        .await
        .map_err(|e| CoreError::BackendUnavailable(format!("delete task failed: {e}")))?
        .map_err(CoreError::from)
    }

    async fn count(&self, index: &str, predicate: Option<&DeletePredicate>) -> CoreResult<u64> {
        let handle = self.handle(index).map_err(CoreError::from)?;
        let predicate = predicate.cloned();

        tokio::task::spawn_blocking(move || -> Result<u64, RagError> {
            let searcher = handle.reader.searcher();
            let count = match predicate {
                Some(predicate) => {
                    let query = TantivyBackend::predicate_query(&handle, &predicate)?;
                    searcher
                        .search(query.as_ref(), &Count)
                        .map_err(|e| RagError::Search(e.to_string()))?
                },
                None => searcher.num_docs() as usize,
            };
            Ok(count as u64)
        })
        .await
        .map_err(|e| CoreError::BackendUnavailable(format!("count task failed: {e}")))?
        .map_err(CoreError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use lexrag_core::{ChunkMetadata, Scope};

    fn chunk(id: &str, doc_id: &str, position: i64, text: &str, scope: Scope) -> Chunk {
        let mut metadata = ChunkMetadata::new(scope);
        metadata.uploaded_at = Some(Utc::now());
        Chunk {
            id: id.into(),
            text: text.into(),
            position,
            doc_id: doc_id.into(),
            metadata,
        }
    }

    async fn backend_with(chunks: &[Chunk]) -> TantivyBackend {
        let backend = TantivyBackend::new(LexicalConfig::default());
        backend.ensure_index("lei").await.unwrap();
        for c in chunks {
            backend.index_chunk("lei", c).await.unwrap();
        }
        backend
    }

    #[tokio::test]
    async fn test_ensure_index_idempotent() {
        let backend = TantivyBackend::new(LexicalConfig::default());
        backend.ensure_index("lei").await.unwrap();
        backend.ensure_index("lei").await.unwrap();
        assert_eq!(backend.count("lei", None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_search_finds_global_chunk() {
        let backend = backend_with(&[chunk(
            "c1",
            "d1",
            0,
            "A responsabilidade civil do Estado é objetiva",
            Scope::Global,
        )])
        .await;

        let filter = ScopeFilter::new("T1");
        let hits = backend
            .search_lexical(&["lei".into()], "responsabilidade objetiva", &filter, 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "c1");
        assert_eq!(hits[0].doc_id.as_deref(), Some("d1"));
    }

    #[tokio::test]
    async fn test_wrong_tenant_sees_no_private_rows() {
        let backend = backend_with(&[chunk(
            "c1",
            "d1",
            0,
            "parecer confidencial sobre fusão",
            Scope::Private {
                tenant_id: "T1".into(),
            },
        )])
        .await;

        let own = backend
            .search_lexical(&["lei".into()], "parecer fusão", &ScopeFilter::new("T1"), 10)
            .await
            .unwrap();
        assert_eq!(own.len(), 1);

        let other = backend
            .search_lexical(&["lei".into()], "parecer fusão", &ScopeFilter::new("T2"), 10)
            .await
            .unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn test_group_scope_requires_intersection() {
        let backend = backend_with(&[chunk(
            "c1",
            "d1",
            0,
            "memorando do grupo tributário",
            Scope::Group {
                tenant_id: "T1".into(),
                group_ids: vec!["trib".into()],
            },
        )])
        .await;

        let member = ScopeFilter::new("T1").group_ids(vec!["trib".into()]);
        assert_eq!(
            backend
                .search_lexical(&["lei".into()], "memorando tributário", &member, 10)
                .await
                .unwrap()
                .len(),
            1
        );

        let outsider = ScopeFilter::new("T1").group_ids(vec!["civel".into()]);
        assert!(backend
            .search_lexical(&["lei".into()], "memorando tributário", &outsider, 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_sigilo_restricted_needs_allowed_user() {
        let mut restricted = chunk(
            "c1",
            "d1",
            0,
            "documento sigiloso do processo",
            Scope::Global,
        );
        restricted.metadata.sigilo = Sigilo::Restricted;
        restricted.metadata.allowed_users = vec!["u1".into()];
        let backend = backend_with(&[restricted]).await;

        // No user_id: public only
        assert!(backend
            .search_lexical(
                &["lei".into()],
                "documento sigiloso",
                &ScopeFilter::new("T1"),
                10
            )
            .await
            .unwrap()
            .is_empty());

        // Allowed user sees it
        let allowed = ScopeFilter::new("T1").user_id("u1");
        assert_eq!(
            backend
                .search_lexical(&["lei".into()], "documento sigiloso", &allowed, 10)
                .await
                .unwrap()
                .len(),
            1
        );

        // Different user does not
        let denied = ScopeFilter::new("T1").user_id("u2");
        assert!(backend
            .search_lexical(&["lei".into()], "documento sigiloso", &denied, 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_reindex_same_id_no_duplicates() {
        let c = chunk("c1", "d1", 0, "texto original", Scope::Global);
        let backend = backend_with(&[c.clone()]).await;
        backend.index_chunk("lei", &c).await.unwrap();
        assert_eq!(backend.count("lei", None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_doc_removes_all_positions() {
        let backend = backend_with(&[
            chunk("c1", "d1", 0, "primeira parte do documento", Scope::Global),
            chunk("c2", "d1", 1, "segunda parte do documento", Scope::Global),
            chunk("c3", "d2", 0, "outro documento inteiro", Scope::Global),
        ])
        .await;

        let removed = backend
            .delete_where(
                "lei",
                &DeletePredicate::Doc {
                    doc_id: "d1".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(backend.count("lei", None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_expired_local_cleanup() {
        let mut old = chunk(
            "c1",
            "d1",
            0,
            "documento local antigo",
            Scope::Local {
                tenant_id: "T1".into(),
                case_id: "C1".into(),
            },
        );
        old.metadata.uploaded_at = Some(Utc::now() - Duration::days(8));
        let mut fresh = chunk(
            "c2",
            "d2",
            0,
            "documento local recente",
            Scope::Local {
                tenant_id: "T1".into(),
                case_id: "C1".into(),
            },
        );
        fresh.metadata.uploaded_at = Some(Utc::now());
        let backend = backend_with(&[old, fresh]).await;

        let cutoff = Utc::now() - Duration::days(7);
        let removed = backend
            .delete_where("lei", &DeletePredicate::ExpiredLocal { cutoff })
            .await
            .unwrap();
        assert_eq!(removed, 1);

        let filter = ScopeFilter::new("T1").case_id("C1");
        let hits = backend
            .search_lexical(&["lei".into()], "documento local", &filter, 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "c2");
    }

    #[tokio::test]
    async fn test_fetch_by_position() {
        let backend = backend_with(&[
            chunk("c0", "d1", 0, "posição zero", Scope::Global),
            chunk("c1", "d1", 1, "posição um", Scope::Global),
            chunk("c2", "d1", 2, "posição dois", Scope::Global),
        ])
        .await;

        let refs = vec![
            NeighborRef {
                doc_id: "d1".into(),
                position: 0,
            },
            NeighborRef {
                doc_id: "d1".into(),
                position: 2,
            },
        ];
        let hits = backend.fetch_by_position("lei", &refs).await.unwrap();
        let mut ids: Vec<&str> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["c0", "c2"]);
    }

    #[tokio::test]
    async fn test_unknown_dataset_is_invalid_input() {
        let backend = backend_with(&[]).await;
        let err = backend
            .search_lexical(
                &["inexistente".into()],
                "qualquer",
                &ScopeFilter::new("T1"),
                10,
            )
            .await;
        assert!(matches!(err, Err(CoreError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_on_disk_index_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = LexicalConfig {
            index_root: Some(dir.path().to_path_buf()),
            ..Default::default()
        };

        {
            let backend = TantivyBackend::new(config.clone());
            backend.ensure_index("lei").await.unwrap();
            backend
                .index_chunk(
                    "lei",
                    &chunk("c1", "d1", 0, "texto persistido em disco", Scope::Global),
                )
                .await
                .unwrap();
        }

        let reopened = TantivyBackend::new(config);
        reopened.ensure_index("lei").await.unwrap();
        assert_eq!(reopened.count("lei", None).await.unwrap(), 1);
        let hits = reopened
            .search_lexical(&["lei".into()], "texto persistido", &ScopeFilter::new("T1"), 10)
            .await
            .unwrap();
        assert_eq!(hits[0].chunk_id, "c1");
    }

    #[tokio::test]
    async fn test_accent_folding_matches() {
        let backend = backend_with(&[chunk(
            "c1",
            "d1",
            0,
            "Princípio da eficiência administrativa",
            Scope::Global,
        )])
        .await;
        let hits = backend
            .search_lexical(
                &["lei".into()],
                "principio da eficiencia",
                &ScopeFilter::new("T1"),
                10,
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }
}
