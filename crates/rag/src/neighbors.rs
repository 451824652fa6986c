//! Chunk-neighbor expansion
//!
//! Retrieval returns isolated passages; legal reasoning usually needs the
//! surrounding context (the article before, the paragraph after). For each
//! ranked hit this stage fetches up to `window` neighbors on each side by
//! (doc_id, position ± k), batched into one round-trip per backend per
//! collection, de-duplicated, and merged in behind their anchor without
//! disturbing the anchor's rank slot. At most `max_extra` chunks are added
//! in total, spent on the best-ranked anchors first.

use std::collections::HashMap;
use std::collections::HashSet;

use lexrag_core::{
    Hit, LexicalBackend, NeighborRef, Result as CoreResult, VectorBackend,
};

/// Expansion configuration
#[derive(Debug, Clone, Copy)]
pub struct ExpanderConfig {
    /// Neighbors fetched on each side of an anchor
    pub window: usize,
    /// Hard cap on added chunks per request
    pub max_extra: usize,
}

impl Default for ExpanderConfig {
    fn default() -> Self {
        use lexrag_config::constants::rag;
        Self {
            window: rag::CHUNK_EXPANSION_WINDOW,
            max_extra: rag::CHUNK_EXPANSION_MAX_EXTRA,
        }
    }
}

/// Neighbor expander over the two storage backends
pub struct ChunkExpander {
    config: ExpanderConfig,
}

impl ChunkExpander {
    pub fn new(config: ExpanderConfig) -> Self {
        Self { config }
    }

    /// Expand a ranked list. Returns the merged list and how many
    /// neighbors were added.
    pub async fn expand(
        &self,
        hits: Vec<Hit>,
        vector: Option<&dyn VectorBackend>,
        lexical: Option<&dyn LexicalBackend>,
    ) -> CoreResult<(Vec<Hit>, usize)> {
        if self.config.window == 0 || self.config.max_extra == 0 || hits.is_empty() {
            return Ok((hits, 0));
        }

        let present: HashSet<(String, i64)> = hits
            .iter()
            .filter_map(|h| h.doc_id.clone().zip(h.position))
            .collect();

        // Candidate refs per collection, de-duplicated, in anchor rank order
        let mut wanted: Vec<(usize, String, NeighborRef)> = Vec::new();
        let mut seen: HashSet<(String, i64)> = HashSet::new();
        for (rank, hit) in hits.iter().enumerate() {
            let (doc_id, position) = match (hit.doc_id.as_ref(), hit.position) {
                (Some(doc_id), Some(position)) => (doc_id.clone(), position),
                _ => continue,
            };
            for k in 1..=self.config.window as i64 {
                for candidate in [position - k, position + k] {
                    if candidate < 0 {
                        continue;
                    }
                    let key = (doc_id.clone(), candidate);
                    if present.contains(&key) || !seen.insert(key) {
                        continue;
                    }
                    wanted.push((
                        rank,
                        hit.source_collection.clone(),
                        NeighborRef {
                            doc_id: doc_id.clone(),
                            position: candidate,
                        },
                    ));
                }
            }
        }

        if wanted.is_empty() {
            return Ok((hits, 0));
        }

        // One batched fetch per collection, vector first, lexical for the rest
        let mut by_collection: HashMap<String, Vec<NeighborRef>> = HashMap::new();
        for (_, collection, nref) in &wanted {
            by_collection
                .entry(collection.clone())
                .or_default()
                .push(nref.clone());
        }

        let mut found: HashMap<(String, i64), Hit> = HashMap::new();
        for (collection, refs) in &by_collection {
            if let Some(vector) = vector {
                match vector.fetch_by_position(collection, refs).await {
                    Ok(neighbors) => {
                        for n in neighbors {
                            if let (Some(doc_id), Some(position)) = (n.doc_id.clone(), n.position) {
                                found.entry((doc_id, position)).or_insert(n);
                            }
                        }
                    },
                    Err(e) => {
                        tracing::warn!(collection, error = %e, "vector neighbor fetch failed");
                    },
                }
            }
            let missing: Vec<NeighborRef> = refs
                .iter()
                .filter(|r| !found.contains_key(&(r.doc_id.clone(), r.position)))
                .cloned()
                .collect();
            if missing.is_empty() {
                continue;
            }
            if let Some(lexical) = lexical {
                match lexical.fetch_by_position(collection, &missing).await {
                    Ok(neighbors) => {
                        for n in neighbors {
                            if let (Some(doc_id), Some(position)) = (n.doc_id.clone(), n.position) {
                                found.entry((doc_id, position)).or_insert(n);
                            }
                        }
                    },
                    Err(e) => {
                        tracing::warn!(collection, error = %e, "lexical neighbor fetch failed");
                    },
                }
            }
        }

        // Budget spent in anchor rank order
        let mut accepted: HashMap<usize, Vec<Hit>> = HashMap::new();
        let mut added = 0usize;
        for (rank, _, nref) in &wanted {
            if added >= self.config.max_extra {
                break;
            }
            if let Some(neighbor) = found.remove(&(nref.doc_id.clone(), nref.position)) {
                accepted.entry(*rank).or_default().push(neighbor);
                added += 1;
            }
        }

        // Merge: each anchor keeps its slot, neighbors follow it in
        // position order with scores nested strictly below the anchor's
        let mut merged: Vec<Hit> = Vec::with_capacity(hits.len() + added);
        let ranking_scores: Vec<f32> = hits.iter().map(|h| h.ranking_score()).collect();
        for (rank, anchor) in hits.into_iter().enumerate() {
            let anchor_score = ranking_scores[rank];
            let floor = ranking_scores
                .get(rank + 1)
                .copied()
                .unwrap_or(anchor_score - 1.0);
            merged.push(anchor);
            if let Some(mut neighbors) = accepted.remove(&rank) {
                neighbors.sort_by_key(|n| n.position.unwrap_or(0));
                let span = (anchor_score - floor).max(0.0);
                let step = span / (neighbors.len() as f32 + 1.0);
                for (j, mut neighbor) in neighbors.into_iter().enumerate() {
                    neighbor.fused_score = Some(anchor_score - step * (j as f32 + 1.0));
                    neighbor.metadata.insert(
                        "expanded".to_string(),
                        serde_json::Value::Bool(true),
                    );
                    merged.push(neighbor);
                }
            }
        }

        Ok((merged, added))
    }
}

impl Default for ChunkExpander {
    fn default() -> Self {
        Self::new(ExpanderConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lexrag_core::{Chunk, DeletePredicate, ScopeFilter, ScrollPage};
    use std::collections::HashMap as Map;

    fn hit(id: &str, doc: &str, position: i64, score: f32) -> Hit {
        Hit {
            chunk_id: id.into(),
            score,
            fused_score: Some(score),
            text: format!("chunk {id}"),
            source_collection: "lei".into(),
            doc_id: Some(doc.into()),
            position: Some(position),
            metadata: Map::new(),
        }
    }

    /// Vector backend that serves neighbors from a fixed map
    struct FakeVector {
        chunks: Map<(String, i64), Hit>,
    }

    #[async_trait]
    impl VectorBackend for FakeVector {
        async fn ensure_collection(&self, _: &str, _: usize) -> CoreResult<()> {
            Ok(())
        }
        async fn upsert(&self, _: &str, _: &Chunk, _: &[f32]) -> CoreResult<()> {
            Ok(())
        }
        async fn search(
            &self,
            _: &str,
            _: &[f32],
            _: Option<&ScopeFilter>,
            _: usize,
        ) -> CoreResult<Vec<Hit>> {
            Ok(Vec::new())
        }
        async fn scroll(
            &self,
            _: &str,
            _: Option<&DeletePredicate>,
            _: usize,
            _: Option<String>,
        ) -> CoreResult<ScrollPage> {
            Ok(ScrollPage::default())
        }
        async fn set_payload(
            &self,
            _: &str,
            _: &str,
            _: Map<String, serde_json::Value>,
        ) -> CoreResult<()> {
            Ok(())
        }
        async fn fetch_by_position(
            &self,
            _: &str,
            refs: &[NeighborRef],
        ) -> CoreResult<Vec<Hit>> {
            Ok(refs
                .iter()
                .filter_map(|r| self.chunks.get(&(r.doc_id.clone(), r.position)).cloned())
                .collect())
        }
        async fn delete_where(&self, _: &str, _: &DeletePredicate) -> CoreResult<u64> {
            Ok(0)
        }
        async fn count(&self, _: &str, _: Option<&DeletePredicate>) -> CoreResult<u64> {
            Ok(0)
        }
    }

    fn store_of(hits: &[Hit]) -> FakeVector {
        FakeVector {
            chunks: hits
                .iter()
                .map(|h| ((h.doc_id.clone().unwrap(), h.position.unwrap()), h.clone()))
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_neighbors_follow_anchor_slot() {
        let store = store_of(&[
            hit("n0", "d1", 0, 0.0),
            hit("n2", "d1", 2, 0.0),
        ]);
        let input = vec![hit("a", "d1", 1, 0.9), hit("b", "d2", 5, 0.5)];
        let expander = ChunkExpander::new(ExpanderConfig {
            window: 1,
            max_extra: 12,
        });

        let (merged, added) = expander.expand(input, Some(&store), None).await.unwrap();
        assert_eq!(added, 2);
        let ids: Vec<&str> = merged.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "n0", "n2", "b"]);

        // Strictly descending ranking scores survive the merge
        for pair in merged.windows(2) {
            assert!(pair[0].ranking_score() > pair[1].ranking_score());
        }
    }

    #[tokio::test]
    async fn test_max_extra_budget_prefers_top_anchors() {
        let store = store_of(&[
            hit("a0", "d1", 0, 0.0),
            hit("a2", "d1", 2, 0.0),
            hit("b0", "d2", 0, 0.0),
            hit("b2", "d2", 2, 0.0),
        ]);
        let input = vec![hit("a", "d1", 1, 0.9), hit("b", "d2", 1, 0.5)];
        let expander = ChunkExpander::new(ExpanderConfig {
            window: 1,
            max_extra: 2,
        });

        let (merged, added) = expander.expand(input, Some(&store), None).await.unwrap();
        assert_eq!(added, 2);
        let ids: Vec<&str> = merged.iter().map(|h| h.chunk_id.as_str()).collect();
        // Both budget slots went to the top-ranked anchor
        assert_eq!(ids, vec!["a", "a0", "a2", "b"]);
    }

    #[tokio::test]
    async fn test_already_present_positions_not_refetched() {
        let store = store_of(&[hit("n0", "d1", 0, 0.0)]);
        let input = vec![hit("a", "d1", 1, 0.9), hit("n2", "d1", 2, 0.8)];
        let expander = ChunkExpander::default();

        let (merged, added) = expander.expand(input, Some(&store), None).await.unwrap();
        assert_eq!(added, 1);
        let n2_count = merged.iter().filter(|h| h.chunk_id == "n2").count();
        assert_eq!(n2_count, 1);
    }

    #[tokio::test]
    async fn test_window_zero_is_noop() {
        let store = store_of(&[hit("n0", "d1", 0, 0.0)]);
        let input = vec![hit("a", "d1", 1, 0.9)];
        let expander = ChunkExpander::new(ExpanderConfig {
            window: 0,
            max_extra: 12,
        });
        let (merged, added) = expander.expand(input, Some(&store), None).await.unwrap();
        assert_eq!(added, 0);
        assert_eq!(merged.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_neighbors_tolerated() {
        let store = store_of(&[]);
        let input = vec![hit("a", "d1", 0, 0.9)];
        let expander = ChunkExpander::default();
        let (merged, added) = expander.expand(input, Some(&store), None).await.unwrap();
        assert_eq!(added, 0);
        assert_eq!(merged.len(), 1);
    }
}
