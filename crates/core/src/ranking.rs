//! Ranked list ordering
//!
//! Invariant shared by every ranking stage: strictly descending by score,
//! ties broken by ascending chunk id so that identical inputs always
//! produce identical output order.

use crate::chunk::Hit;

/// Sort hits into canonical rank order: descending effective score,
/// ascending chunk_id on ties.
pub fn sort_ranked(hits: &mut [Hit]) {
    hits.sort_by(|a, b| {
        b.ranking_score()
            .total_cmp(&a.ranking_score())
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
}

/// Reference to a neighbor chunk by document position
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NeighborRef {
    pub doc_id: String,
    pub position: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn hit(id: &str, score: f32) -> Hit {
        Hit {
            chunk_id: id.to_string(),
            score,
            fused_score: None,
            text: String::new(),
            source_collection: "lei".into(),
            doc_id: None,
            position: None,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn test_descending_with_id_tiebreak() {
        let mut hits = vec![hit("b", 0.5), hit("a", 0.5), hit("c", 0.9)];
        sort_ranked(&mut hits);
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_fused_score_wins_over_native() {
        let mut low_native = hit("x", 0.1);
        low_native.fused_score = Some(0.9);
        let mut hits = vec![hit("y", 0.5), low_native];
        sort_ranked(&mut hits);
        assert_eq!(hits[0].chunk_id, "x");
    }

    #[test]
    fn test_deterministic_under_permutation() {
        let mut a = vec![hit("1", 0.3), hit("2", 0.3), hit("3", 0.3)];
        let mut b = vec![hit("3", 0.3), hit("1", 0.3), hit("2", 0.3)];
        sort_ranked(&mut a);
        sort_ranked(&mut b);
        assert_eq!(a, b);
    }
}
