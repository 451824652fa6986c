//! Retrieval pipeline orchestrator
//!
//! Drives the per-request state machine:
//!
//! ```text
//! ROUTE → [EXPAND?] → FAN_OUT → FUSE → GATE
//!                                        ├─ pass → RERANK → EXPAND_NBRS → COMPRESS → TRACE → DONE
//!                                        ├─ ambiguous (retries left) → EXPAND (rewrite) → FAN_OUT → FUSE → GATE
//!                                        └─ fail → RERANK → EXPAND_NBRS → COMPRESS → TRACE → DONE
//! ```
//!
//! The loop is written with explicit state variables so retries stay
//! visible and testable. Every stage resolves its feature flag as
//! per-request override > environment configuration > built-in default,
//! and disabled stages still emit a skipped trace event. Fan-out runs the
//! lexical and vector legs concurrently under the request deadline;
//! losing one leg degrades the request, losing both surfaces an error.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;

use lexrag_config::constants::{legacy_collections, rag, ALL_LEGACY_COLLECTIONS};
use lexrag_config::RagSettings;
use lexrag_core::{
    counts, sort_ranked, Error as CoreError, Hit, LexicalBackend, ProviderName,
    Result as CoreResult, SearchRequest, SearchResponse, SearchResultItem, TraceRecorder,
    VectorBackend,
};

use crate::compressor::{Compressor, CompressorConfig};
use crate::crag::{CragConfig, CragGate, EvidenceLevel, GateOutcome};
use crate::expansion::QueryExpander;
use crate::fusion::{rrf_fuse, rrf_norm_factor, RankedInput};
use crate::neighbors::{ChunkExpander, ExpanderConfig};
use crate::providers::{InputType, ProviderRegistry};
use crate::reranker::CrossEncoderReranker;
use crate::router::EmbeddingRouter;

mod stage {
    pub const ROUTE: &str = "route";
    pub const EXPAND: &str = "expand";
    pub const FAN_OUT: &str = "fan_out";
    pub const FUSE: &str = "fuse";
    pub const GATE: &str = "gate";
    pub const RERANK: &str = "rerank";
    pub const EXPAND_NBRS: &str = "expand_neighbors";
    pub const COMPRESS: &str = "compress";
    pub const GRAPH_ENRICH: &str = "graph_enrich";
}

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Candidates fetched per backend leg before fusion
    pub fetch_k: usize,
    /// Per-request deadline
    pub deadline: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fetch_k: rag::FETCH_K,
            deadline: Duration::from_secs(rag::REQUEST_DEADLINE_SECS),
        }
    }
}

/// Per-request override > environment configuration > built-in default
fn effective(request_override: Option<bool>, env_value: bool) -> bool {
    request_override.unwrap_or(env_value)
}

/// The retrieval pipeline
pub struct Pipeline {
    config: PipelineConfig,
    settings: Arc<RagSettings>,
    router: Arc<EmbeddingRouter>,
    registry: Arc<ProviderRegistry>,
    lexical: Arc<dyn LexicalBackend>,
    vector: Arc<dyn VectorBackend>,
    expander: Arc<QueryExpander>,
    reranker: Option<Arc<CrossEncoderReranker>>,
    neighbor_expander: ChunkExpander,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        settings: Arc<RagSettings>,
        router: Arc<EmbeddingRouter>,
        registry: Arc<ProviderRegistry>,
        lexical: Arc<dyn LexicalBackend>,
        vector: Arc<dyn VectorBackend>,
        expander: Arc<QueryExpander>,
    ) -> Self {
        let neighbor_expander = ChunkExpander::new(ExpanderConfig {
            window: settings.chunk_expansion_window,
            max_extra: settings.chunk_expansion_max_extra,
        });
        Self {
            config,
            settings,
            router,
            registry,
            lexical,
            vector,
            expander,
            reranker: None,
            neighbor_expander,
        }
    }

    pub fn with_reranker(mut self, reranker: Arc<CrossEncoderReranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    fn request_id() -> String {
        let nanos = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default();
        format!("req-{nanos:x}")
    }

    /// Legacy collections for this jurisdiction, narrowed by the request's
    /// dataset selection
    fn effective_legacy(
        request: &SearchRequest,
        jurisdiction: lexrag_core::Jurisdiction,
    ) -> Vec<String> {
        if !request.include_legacy {
            return Vec::new();
        }
        legacy_collections(jurisdiction)
            .iter()
            .filter(|c| request.datasets.is_empty() || request.datasets.iter().any(|d| d == *c))
            .map(|c| c.to_string())
            .collect()
    }

    fn validate_datasets(request: &SearchRequest) -> CoreResult<()> {
        for dataset in &request.datasets {
            if !ALL_LEGACY_COLLECTIONS.contains(&dataset.as_str()) {
                return Err(CoreError::InvalidInput(format!(
                    "unknown dataset '{dataset}'"
                )));
            }
        }
        Ok(())
    }

    /// One hybrid leg pair for a single query string. Returns
    /// (lexical hits, vector hits, lexical_ok, vector_ok, embed_degraded).
    async fn fan_out_one(
        &self,
        query_text: &str,
        vector_text: &str,
        route: &lexrag_core::EmbeddingRoute,
        legacy: &[String],
        request: &SearchRequest,
        remaining: Duration,
    ) -> (Vec<Hit>, Vec<Hit>, bool, bool, bool) {
        let fetch_k = self.config.fetch_k;

        // Lexical leg: routed collection plus selected legacy indices
        let lexical_fut = async {
            let mut indices = vec![route.collection.clone()];
            indices.extend(legacy.iter().cloned());
            for index in &indices {
                if let Err(e) = self.lexical.ensure_index(index).await {
                    tracing::warn!(index, error = %e, "ensure_index failed");
                }
            }
            self.lexical
                .search_lexical(&indices, query_text, &request.scope, fetch_k)
                .await
        };

        // Vector leg: routed collection with the routed embedding, legacy
        // collections with the legacy (OpenAI 3072d) embedding
        let vector_fut = async {
            let (vectors, degraded) = self
                .router
                .embed_routed(route, &[vector_text.to_string()], InputType::Query)
                .await;
            let routed_vec = vectors.into_iter().next().unwrap_or_default();
            let mut hits = self
                .vector
                .search(
                    &route.collection,
                    &routed_vec,
                    Some(&request.scope),
                    fetch_k,
                )
                .await?;

            if !legacy.is_empty() {
                if let Ok(openai) = self.registry.get(ProviderName::Openai) {
                    match openai
                        .embed_batch(&[query_text.to_string()], InputType::Query)
                        .await
                    {
                        Ok(legacy_vectors) => {
                            let legacy_vec = legacy_vectors.into_iter().next().unwrap_or_default();
                            let searches = legacy.iter().map(|collection| {
                                self.vector.search(
                                    collection,
                                    &legacy_vec,
                                    Some(&request.scope),
                                    fetch_k,
                                )
                            });
                            for result in join_all(searches).await {
                                match result {
                                    Ok(mut legacy_hits) => hits.append(&mut legacy_hits),
                                    Err(e) => {
                                        tracing::warn!(error = %e, "legacy vector search failed")
                                    },
                                }
                            }
                        },
                        Err(e) => tracing::warn!(error = %e, "legacy embedding failed"),
                    }
                }
            }
            sort_ranked(&mut hits);
            Ok::<(Vec<Hit>, bool), CoreError>((hits, degraded))
        };

        let (lexical_result, vector_result) = tokio::join!(
            tokio::time::timeout(remaining, lexical_fut),
            tokio::time::timeout(remaining, vector_fut),
        );

        let (lexical_hits, lexical_ok) = match lexical_result {
            Ok(Ok(hits)) => (hits, true),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "lexical leg failed");
                (Vec::new(), false)
            },
            Err(_) => {
                tracing::warn!("lexical leg timed out");
                (Vec::new(), false)
            },
        };
        let (vector_hits, vector_ok, embed_degraded) = match vector_result {
            Ok(Ok((hits, embed_degraded))) => (hits, true, embed_degraded),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "vector leg failed");
                (Vec::new(), false, false)
            },
            Err(_) => {
                tracing::warn!("vector leg timed out");
                (Vec::new(), false, false)
            },
        };

        (lexical_hits, vector_hits, lexical_ok, vector_ok, embed_degraded)
    }

    /// Execute a search request through the full state machine
    pub async fn search(&self, request: SearchRequest) -> CoreResult<SearchResponse> {
        let started = Instant::now();
        let deadline = started + self.config.deadline;

        request.validate()?;
        Self::validate_datasets(&request)?;

        let flags = &self.settings.features;
        let tracing_enabled = flags.enable_tracing;
        let mut rec = TraceRecorder::new(Self::request_id(), tracing_enabled);

        let use_hyde = effective(request.features.use_hyde, flags.enable_hyde);
        let use_multiquery = effective(request.features.use_multiquery, flags.enable_multiquery);
        let use_crag = effective(request.features.use_crag, flags.enable_crag);
        let use_rerank = effective(request.features.use_rerank, flags.enable_rerank);
        let use_compression =
            effective(request.features.use_compression, flags.enable_compression);
        let use_expansion =
            effective(request.features.use_expansion, flags.enable_chunk_expansion);

        // ROUTE
        let timer = rec.begin(stage::ROUTE);
        let route = self
            .router
            .route(
                &request.query,
                request.jurisdiction_hint.as_deref(),
                request.language_hint.as_deref(),
            )
            .await
            .map_err(CoreError::from)?;
        rec.end(
            timer,
            counts([
                ("estimated_pages", route.decision.estimated_pages as i64),
                ("dimensions", route.dimensions as i64),
            ]),
        );

        let legacy = Self::effective_legacy(&request, route.decision.jurisdiction);
        let mut collections_searched = vec![route.collection.clone()];
        collections_searched.extend(legacy.iter().cloned());

        let gate = CragGate::new(CragConfig {
            min_best_score: request
                .min_best_score
                .unwrap_or(self.settings.crag_min_best_score),
            min_avg_score: request
                .min_avg_score
                .unwrap_or(self.settings.crag_min_avg_score),
            max_retries: self.settings.crag_max_retries,
            top_n: rag::CRAG_TOP_N,
        });

        // EXPAND (initial)
        let mut hyde_doc: Option<String> = None;
        let mut variants: Vec<String> = Vec::new();
        if use_hyde || use_multiquery {
            let timer = rec.begin(stage::EXPAND);
            let mut error = None;
            if use_hyde {
                match self.expander.hypothetical_document(&request.query).await {
                    Ok(doc) => hyde_doc = doc,
                    Err(e) => error = Some(e.to_string()),
                }
            }
            if use_multiquery {
                match self.expander.query_variants(&request.query).await {
                    Ok(v) => variants = v,
                    Err(e) => error = Some(e.to_string()),
                }
            }
            rec.end_with(
                timer,
                counts([
                    ("hyde", hyde_doc.is_some() as i64),
                    ("variants", variants.len() as i64),
                ]),
                error,
            );
        } else {
            rec.skipped(stage::EXPAND);
        }

        // FAN_OUT → FUSE → GATE loop with explicit state
        let mut lists: Vec<RankedInput> = Vec::new();
        let mut fused: Vec<Hit> = Vec::new();
        let mut current_query = request.query.clone();
        let mut retries_used = 0usize;
        let mut degraded = false;
        let mut evidence = EvidenceLevel::None;
        let mut any_backend_ok = false;

        loop {
            // Queries for this attempt: first pass runs the original plus
            // its variants, retries run only the rewritten query
            let attempt_queries: Vec<String> = if retries_used == 0 {
                std::iter::once(current_query.clone())
                    .chain(variants.iter().cloned())
                    .collect()
            } else {
                vec![current_query.clone()]
            };

            let timer = rec.begin(stage::FAN_OUT);
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                rec.end_with(timer, BTreeMap::new(), Some("deadline exhausted".into()));
                break;
            }

            let legs = attempt_queries.iter().map(|q| {
                let vector_text = if q == &request.query {
                    match hyde_doc {
                        Some(ref doc) => format!("{q}\n\n{doc}"),
                        None => q.clone(),
                    }
                } else {
                    q.clone()
                };
                let q = q.clone();
                let route = route.clone();
                let legacy = legacy.clone();
                let request = request.clone();
                async move {
                    self.fan_out_one(&q, &vector_text, &route, &legacy, &request, remaining)
                        .await
                }
            });
            let leg_results = join_all(legs).await;

            let mut stage_counts: BTreeMap<String, i64> = BTreeMap::new();
            let mut lexical_ok_any = false;
            let mut vector_ok_any = false;
            for (lexical_hits, vector_hits, lexical_ok, vector_ok, embed_degraded) in leg_results {
                lexical_ok_any |= lexical_ok;
                vector_ok_any |= vector_ok;
                degraded |= embed_degraded;
                for hit in lexical_hits.iter().chain(vector_hits.iter()) {
                    *stage_counts
                        .entry(format!("hits.{}", hit.source_collection))
                        .or_insert(0) += 1;
                }
                *stage_counts.entry("lexical".into()).or_insert(0) += lexical_hits.len() as i64;
                *stage_counts.entry("vector".into()).or_insert(0) += vector_hits.len() as i64;
                lists.push(RankedInput::weighted(
                    lexical_hits,
                    self.settings.lexical_weight,
                ));
                lists.push(RankedInput::weighted(
                    vector_hits,
                    self.settings.vector_weight,
                ));
            }

            if !lexical_ok_any || !vector_ok_any {
                degraded = true;
            }
            any_backend_ok |= lexical_ok_any || vector_ok_any;
            if !any_backend_ok {
                rec.end_with(timer, stage_counts, Some("both backends failed".into()));
                if deadline.saturating_duration_since(Instant::now()).is_zero() {
                    return Err(CoreError::Timeout(self.config.deadline.as_millis() as u64));
                }
                return Err(CoreError::BackendUnavailable(
                    "lexical and vector backends both failed".into(),
                ));
            }
            rec.end(timer, stage_counts);

            // FUSE: accumulated lists across every attempt so far
            let timer = rec.begin(stage::FUSE);
            fused = rrf_fuse(&lists, self.settings.rrf_k);
            let norm = rrf_norm_factor(&lists, self.settings.rrf_k);
            rec.end(timer, counts([("fused", fused.len() as i64)]));

            // GATE
            if !use_crag {
                rec.skipped(stage::GATE);
                evidence = EvidenceLevel::Strong;
                break;
            }

            let timer = rec.begin(stage::GATE);
            let decision = gate.evaluate(&fused, norm, retries_used);
            evidence = decision.level;
            let mut gate_counts = counts([
                ("best_milli", (decision.best_score * 1000.0) as i64),
                ("avg_milli", (decision.avg_score * 1000.0) as i64),
                ("retries_left", decision.retries_left as i64),
            ]);
            gate_counts.insert(
                format!("level_{:?}", decision.level).to_lowercase(),
                1,
            );
            let gate_error = match decision.level {
                EvidenceLevel::None => Some("insufficient evidence".to_string()),
                _ => None,
            };
            rec.end_with(timer, gate_counts, gate_error);

            match decision.outcome {
                GateOutcome::Pass | GateOutcome::Fail => break,
                GateOutcome::Retry => {
                    // EXPAND (new variant): reformulate and go around
                    let timer = rec.begin(stage::EXPAND);
                    let rewritten = match self.expander.rewrite(&current_query).await {
                        Ok(Some(rewritten)) => Some(rewritten),
                        Ok(None) => None,
                        Err(e) => {
                            tracing::warn!(error = %e, "retry rewrite failed");
                            None
                        },
                    };
                    match rewritten {
                        Some(rewritten) => {
                            rec.end(timer, counts([("rewritten", 1)]));
                            current_query = rewritten;
                            retries_used += 1;
                        },
                        None => {
                            rec.end_with(
                                timer,
                                counts([("rewritten", 0)]),
                                Some("no usable reformulation".into()),
                            );
                            break;
                        },
                    }
                },
            }
        }

        // RERANK
        match (&self.reranker, use_rerank, fused.is_empty()) {
            (Some(reranker), true, false) => {
                let timer = rec.begin(stage::RERANK);
                let keep = fused.len();
                match reranker.rerank(&current_query, fused.clone(), keep) {
                    Ok(reranked) => {
                        fused = reranked;
                        rec.end(
                            timer,
                            counts([
                                ("reranked", self.settings.rerank_top_k.min(keep) as i64),
                            ]),
                        );
                    },
                    Err(e) => {
                        // Model trouble degrades to fusion order
                        rec.end_with(timer, BTreeMap::new(), Some(e.to_string()));
                    },
                }
            },
            _ => rec.skipped(stage::RERANK),
        }

        // Cap before neighbor expansion so the budget goes to top anchors
        fused.truncate(request.top_k.max(self.settings.rerank_top_k));

        // EXPAND_NBRS
        if use_expansion && !fused.is_empty() {
            let timer = rec.begin(stage::EXPAND_NBRS);
            match self
                .neighbor_expander
                .expand(fused.clone(), Some(self.vector.as_ref()), Some(self.lexical.as_ref()))
                .await
            {
                Ok((expanded, added)) => {
                    fused = expanded;
                    rec.end(timer, counts([("added", added as i64)]));
                },
                Err(e) => {
                    rec.end_with(timer, BTreeMap::new(), Some(e.to_string()));
                },
            }
        } else {
            rec.skipped(stage::EXPAND_NBRS);
        }

        // COMPRESS
        if use_compression && !fused.is_empty() {
            let timer = rec.begin(stage::COMPRESS);
            let compressor = Compressor::new(CompressorConfig {
                max_chars_per_chunk: self.settings.compression_max_chars,
                min_chars_per_chunk: self.settings.compression_min_chars,
                token_budget: rag::COMPRESSION_TOKEN_BUDGET,
            });
            let outcome = compressor.compress(&request.query, fused);
            fused = outcome.hits;
            let mut compress_counts = counts([
                ("original_chars", outcome.original_chars as i64),
                ("compressed_chars", outcome.compressed_chars as i64),
                ("chunks_compressed", outcome.chunks_compressed as i64),
            ]);
            for (chunk_id, (original, compressed)) in &outcome.per_chunk {
                compress_counts.insert(format!("chunk.{chunk_id}.original"), *original as i64);
                compress_counts.insert(format!("chunk.{chunk_id}.compressed"), *compressed as i64);
            }
            rec.end(timer, compress_counts);
        } else {
            rec.skipped(stage::COMPRESS);
        }

        // Graph enrichment runs in an external engine; the flag and trace
        // slot are reserved here
        rec.skipped(stage::GRAPH_ENRICH);

        sort_ranked(&mut fused);
        fused.truncate(request.top_k);

        if evidence == EvidenceLevel::None && fused.is_empty() {
            tracing::info!(query = %request.query, "search returned no evidence");
        }

        let trace = rec.finalize();
        let response = SearchResponse {
            results: fused.into_iter().map(SearchResultItem::from).collect(),
            routing: request.include_routing_info.then(|| route.decision.clone()),
            processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            collections_searched,
            trace: tracing_enabled.then_some(trace),
            degraded,
        };
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_precedence() {
        assert!(effective(Some(true), false));
        assert!(!effective(Some(false), true));
        assert!(effective(None, true));
        assert!(!effective(None, false));
    }

    #[test]
    fn test_effective_legacy_respects_datasets() {
        let mut request = SearchRequest::new("q", "T1");
        request.datasets = vec!["lei".into(), "juris".into()];
        let legacy = Pipeline::effective_legacy(&request, lexrag_core::Jurisdiction::Br);
        assert_eq!(legacy, vec!["lei".to_string(), "juris".to_string()]);
    }

    #[test]
    fn test_effective_legacy_empty_when_disabled() {
        let mut request = SearchRequest::new("q", "T1");
        request.include_legacy = false;
        let legacy = Pipeline::effective_legacy(&request, lexrag_core::Jurisdiction::Br);
        assert!(legacy.is_empty());
    }

    #[test]
    fn test_unknown_dataset_rejected() {
        let mut request = SearchRequest::new("q", "T1");
        request.datasets = vec!["nope".into()];
        assert!(matches!(
            Pipeline::validate_datasets(&request),
            Err(CoreError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_request_ids_unique() {
        assert_ne!(Pipeline::request_id(), Pipeline::request_id());
    }
}
