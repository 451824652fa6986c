//! CRAG evidence gate
//!
//! Corrective-RAG quality gate over the fused ranking. RRF scores are
//! rank-derived and tiny in absolute terms, so the gate normalizes them
//! against the best score an item could have earned (first place in every
//! contributing list) before comparing against thresholds.
//!
//! Outcomes:
//! - PASS (STRONG): proceed to rerank/expand/compress.
//! - AMBIGUOUS (WEAK): retry with a reformulated query while retries
//!   remain; results accumulate across attempts and are re-fused.
//! - FAIL (NONE): return the best available list with an evidence warning
//!   in the trace.

use serde::{Deserialize, Serialize};

use lexrag_core::Hit;

/// Strength of the retrieved evidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EvidenceLevel {
    Strong,
    Weak,
    None,
}

/// What the orchestrator should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Pass,
    Retry,
    Fail,
}

/// Gate configuration; thresholds are overridable per request
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CragConfig {
    pub min_best_score: f32,
    pub min_avg_score: f32,
    pub max_retries: usize,
    /// Scores averaged over this many leading hits
    pub top_n: usize,
}

impl Default for CragConfig {
    fn default() -> Self {
        use lexrag_config::constants::rag;
        Self {
            min_best_score: rag::CRAG_MIN_BEST_SCORE,
            min_avg_score: rag::CRAG_MIN_AVG_SCORE,
            max_retries: rag::CRAG_MAX_RETRIES,
            top_n: rag::CRAG_TOP_N,
        }
    }
}

/// Gate verdict with the numbers that produced it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateDecision {
    pub outcome: GateOutcome,
    pub level: EvidenceLevel,
    pub best_score: f32,
    pub avg_score: f32,
    pub retries_left: usize,
}

/// Evidence evaluator
pub struct CragGate {
    config: CragConfig,
}

impl CragGate {
    pub fn new(config: CragConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CragConfig {
        &self.config
    }

    /// Evaluate a fused ranking. `norm_factor` is the maximum fused score
    /// an item could carry (sum of list weights / (k + 1)); pass 1.0 for
    /// pre-normalized scores. `retries_used` counts prior gate-driven
    /// retries in this request.
    pub fn evaluate(&self, fused: &[Hit], norm_factor: f32, retries_used: usize) -> GateDecision {
        let norm = if norm_factor > 0.0 { norm_factor } else { 1.0 };
        let retries_left = self.config.max_retries.saturating_sub(retries_used);

        if fused.is_empty() {
            return GateDecision {
                outcome: GateOutcome::Fail,
                level: EvidenceLevel::None,
                best_score: 0.0,
                avg_score: 0.0,
                retries_left,
            };
        }

        let best_score = fused[0].ranking_score() / norm;
        let top: Vec<f32> = fused
            .iter()
            .take(self.config.top_n)
            .map(|h| h.ranking_score() / norm)
            .collect();
        let avg_score = top.iter().sum::<f32>() / top.len() as f32;

        let (level, outcome) = if best_score >= self.config.min_best_score
            && avg_score >= self.config.min_avg_score
        {
            (EvidenceLevel::Strong, GateOutcome::Pass)
        } else if best_score >= self.config.min_best_score / 2.0
            || avg_score >= self.config.min_avg_score / 2.0
        {
            let outcome = if retries_left > 0 {
                GateOutcome::Retry
            } else {
                GateOutcome::Fail
            };
            (EvidenceLevel::Weak, outcome)
        } else {
            (EvidenceLevel::None, GateOutcome::Fail)
        };

        GateDecision {
            outcome,
            level,
            best_score,
            avg_score,
            retries_left,
        }
    }
}

impl Default for CragGate {
    fn default() -> Self {
        Self::new(CragConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn hit(id: &str, fused: f32) -> Hit {
        Hit {
            chunk_id: id.into(),
            score: 0.0,
            fused_score: Some(fused),
            text: String::new(),
            source_collection: "lei".into(),
            doc_id: None,
            position: None,
            metadata: HashMap::new(),
        }
    }

    fn gate() -> CragGate {
        CragGate::default()
    }

    #[test]
    fn test_strong_evidence_passes() {
        let fused = vec![hit("a", 0.9), hit("b", 0.6), hit("c", 0.5)];
        let decision = gate().evaluate(&fused, 1.0, 0);
        assert_eq!(decision.level, EvidenceLevel::Strong);
        assert_eq!(decision.outcome, GateOutcome::Pass);
    }

    #[test]
    fn test_weak_evidence_retries_while_budget_lasts() {
        // best 0.3, mean 0.2: matches the ambiguous band exactly
        let fused = vec![hit("a", 0.3), hit("b", 0.2), hit("c", 0.1)];
        let first = gate().evaluate(&fused, 1.0, 0);
        assert_eq!(first.level, EvidenceLevel::Weak);
        assert_eq!(first.outcome, GateOutcome::Retry);
        assert_eq!(first.retries_left, 2);

        let exhausted = gate().evaluate(&fused, 1.0, 2);
        assert_eq!(exhausted.level, EvidenceLevel::Weak);
        assert_eq!(exhausted.outcome, GateOutcome::Fail);
    }

    #[test]
    fn test_no_evidence_fails_without_retry() {
        let fused = vec![hit("a", 0.05), hit("b", 0.01)];
        let decision = gate().evaluate(&fused, 1.0, 0);
        assert_eq!(decision.level, EvidenceLevel::None);
        assert_eq!(decision.outcome, GateOutcome::Fail);
    }

    #[test]
    fn test_empty_ranking_is_none() {
        let decision = gate().evaluate(&[], 1.0, 0);
        assert_eq!(decision.level, EvidenceLevel::None);
        assert_eq!(decision.outcome, GateOutcome::Fail);
        assert_eq!(decision.best_score, 0.0);
    }

    #[test]
    fn test_normalization_applied() {
        // Raw RRF scores: first place in both lists with k=60 gives
        // 2/61 ≈ 0.0328; normalized to 1.0 it clears the gate
        let norm = 2.0 / 61.0;
        let fused = vec![hit("a", norm), hit("b", norm * 0.8)];
        let decision = gate().evaluate(&fused, norm, 0);
        assert_eq!(decision.level, EvidenceLevel::Strong);
        assert!((decision.best_score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_per_request_threshold_override() {
        let strict = CragGate::new(CragConfig {
            min_best_score: 0.95,
            ..CragConfig::default()
        });
        let fused = vec![hit("a", 0.9), hit("b", 0.8), hit("c", 0.8)];
        let decision = strict.evaluate(&fused, 1.0, 0);
        assert_ne!(decision.outcome, GateOutcome::Pass);
    }
}
