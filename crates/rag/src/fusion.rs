//! Reciprocal Rank Fusion
//!
//! Pure and total: no I/O, no state. For each id found in any input list,
//! `rrf(id) = Σ_L w_L / (k + rank_L(id) + 1)`; ids absent from a list
//! contribute nothing for that list. Ties break by ascending chunk id so
//! the output is deterministic under identical inputs.

use std::collections::HashMap;

use lexrag_core::{sort_ranked, Hit};

/// One ranked list entering fusion, with its weight
#[derive(Debug, Clone)]
pub struct RankedInput {
    pub hits: Vec<Hit>,
    pub weight: f32,
}

impl RankedInput {
    pub fn new(hits: Vec<Hit>) -> Self {
        Self { hits, weight: 1.0 }
    }

    pub fn weighted(hits: Vec<Hit>, weight: f32) -> Self {
        Self { hits, weight }
    }
}

/// Maximum fused score an item could earn over these lists: first place
/// everywhere. Used to normalize RRF scores for threshold comparisons.
pub fn rrf_norm_factor(lists: &[RankedInput], k: f32) -> f32 {
    lists.iter().map(|l| l.weight).sum::<f32>() / (k + 1.0)
}

/// Fuse ranked lists into one, RRF-scored and canonically ordered.
///
/// The representative hit for a duplicated id is the one with the best
/// original (provider-native) score; its `fused_score` carries the RRF
/// total.
pub fn rrf_fuse(lists: &[RankedInput], k: f32) -> Vec<Hit> {
    let mut scores: HashMap<String, f32> = HashMap::new();
    let mut best: HashMap<String, Hit> = HashMap::new();

    for list in lists {
        for (rank, hit) in list.hits.iter().enumerate() {
            if hit.chunk_id.is_empty() {
                continue;
            }
            let contribution = list.weight / (k + rank as f32 + 1.0);
            *scores.entry(hit.chunk_id.clone()).or_insert(0.0) += contribution;

            match best.get(&hit.chunk_id) {
                Some(existing) if existing.score >= hit.score => {},
                _ => {
                    best.insert(hit.chunk_id.clone(), hit.clone());
                },
            }
        }
    }

    let mut fused: Vec<Hit> = best
        .into_values()
        .map(|mut hit| {
            hit.fused_score = scores.get(&hit.chunk_id).copied();
            hit
        })
        .collect();

    sort_ranked(&mut fused);
    fused
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn hit(id: &str, score: f32) -> Hit {
        Hit {
            chunk_id: id.into(),
            score,
            fused_score: None,
            text: format!("text {id}"),
            source_collection: "lei".into(),
            doc_id: None,
            position: None,
            metadata: Map::new(),
        }
    }

    #[test]
    fn test_shared_id_ranks_first() {
        let lexical = RankedInput::new(vec![hit("a", 9.0), hit("b", 7.0)]);
        let vector = RankedInput::new(vec![hit("b", 0.92), hit("c", 0.85)]);
        let fused = rrf_fuse(&[lexical, vector], 60.0);

        assert_eq!(fused.len(), 3);
        assert_eq!(fused[0].chunk_id, "b");
        let expected = 1.0 / 62.0 + 1.0 / 61.0;
        assert!((fused[0].fused_score.unwrap() - expected).abs() < 1e-6);
    }

    #[test]
    fn test_commutative_over_inputs() {
        let a = RankedInput::new(vec![hit("a", 1.0), hit("b", 0.9)]);
        let b = RankedInput::new(vec![hit("c", 0.8), hit("a", 0.7)]);
        let ab = rrf_fuse(&[a.clone(), b.clone()], 60.0);
        let ba = rrf_fuse(&[b, a], 60.0);
        let ids = |hits: &[Hit]| hits.iter().map(|h| h.chunk_id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&ab), ids(&ba));
        for (x, y) in ab.iter().zip(ba.iter()) {
            assert!((x.fused_score.unwrap() - y.fused_score.unwrap()).abs() < 1e-9);
        }
    }

    #[test]
    fn test_single_list_preserves_rank_order() {
        let only = RankedInput::new(vec![hit("x", 5.0), hit("y", 3.0), hit("z", 1.0)]);
        let fused = rrf_fuse(&[only], 60.0);
        let ids: Vec<&str> = fused.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["x", "y", "z"]);
    }

    #[test]
    fn test_identical_lists_keep_common_ordering() {
        let l1 = RankedInput::new(vec![hit("x", 5.0), hit("y", 3.0)]);
        let l2 = RankedInput::new(vec![hit("x", 5.0), hit("y", 3.0)]);
        let fused = rrf_fuse(&[l1, l2], 60.0);
        let ids: Vec<&str> = fused.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["x", "y"]);
    }

    #[test]
    fn test_ties_break_by_ascending_id() {
        let l1 = RankedInput::new(vec![hit("b", 1.0)]);
        let l2 = RankedInput::new(vec![hit("a", 1.0)]);
        let fused = rrf_fuse(&[l1, l2], 60.0);
        assert_eq!(fused[0].chunk_id, "a");
        assert_eq!(fused[1].chunk_id, "b");
    }

    #[test]
    fn test_weights_scale_contributions() {
        let lexical = RankedInput::weighted(vec![hit("a", 1.0)], 0.2);
        let vector = RankedInput::weighted(vec![hit("b", 1.0)], 0.8);
        let fused = rrf_fuse(&[lexical, vector], 60.0);
        assert_eq!(fused[0].chunk_id, "b");
    }

    #[test]
    fn test_representative_keeps_best_native_score() {
        let l1 = RankedInput::new(vec![hit("a", 2.0)]);
        let l2 = RankedInput::new(vec![hit("a", 9.0)]);
        let fused = rrf_fuse(&[l1, l2], 60.0);
        assert_eq!(fused[0].score, 9.0);
    }

    #[test]
    fn test_empty_inputs() {
        assert!(rrf_fuse(&[], 60.0).is_empty());
        let empty = RankedInput::new(Vec::new());
        assert!(rrf_fuse(&[empty], 60.0).is_empty());
    }
}
