//! Cross-encoder reranker
//!
//! Re-scores the fused top-N with a cross-encoder over (query, passage)
//! pairs. The model is loaded lazily, once per process, behind the `onnx`
//! feature. When the model is unavailable the stage is a no-op: the
//! orchestrator records a skipped rerank event and the fusion order
//! stands.

use serde::{Deserialize, Serialize};

use lexrag_core::{sort_ranked, Hit};

use crate::RagError;

#[cfg(feature = "onnx")]
use parking_lot::Mutex;

/// Reranker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerConfig {
    /// Model identifier, for logging and the trace
    pub model: String,
    /// Path to the ONNX model file
    pub model_path: Option<String>,
    /// Path to the tokenizer.json
    pub tokenizer_path: Option<String>,
    /// Candidates re-scored; the rest keep their fused order below
    pub top_k: usize,
    /// Each (query, text) pair is truncated to this many characters
    pub max_chars: usize,
    /// Token cap for the encoder
    pub max_seq_len: usize,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        use lexrag_config::constants::{models, rag};
        Self {
            model: models::RERANK.to_string(),
            model_path: None,
            tokenizer_path: None,
            top_k: rag::RERANK_TOP_K,
            max_chars: rag::RERANK_MAX_CHARS,
            max_seq_len: 256,
        }
    }
}

/// Truncate a scoring pair to the configured budget, splitting the budget
/// between query and passage with the passage taking the remainder
pub(crate) fn truncate_pair(query: &str, text: &str, max_chars: usize) -> (String, String) {
    let query_budget = max_chars / 4;
    let query: String = query.chars().take(query_budget).collect();
    let text_budget = max_chars.saturating_sub(query.chars().count());
    let text: String = text.chars().take(text_budget).collect();
    (query, text)
}

/// Lazy cross-encoder. Construction succeeds only when a model is
/// actually loadable; callers hold an `Option` and skip the stage on
/// `None`.
pub struct CrossEncoderReranker {
    config: RerankerConfig,
    #[cfg(feature = "onnx")]
    session: Mutex<ort::session::Session>,
    #[cfg(feature = "onnx")]
    tokenizer: tokenizers::Tokenizer,
}

impl CrossEncoderReranker {
    /// Try to load the model. Returns `None` (with a warning) when the
    /// feature is off or the files are missing, never an error.
    #[cfg(not(feature = "onnx"))]
    pub fn try_load(config: RerankerConfig) -> Option<Self> {
        tracing::warn!(
            model = %config.model,
            "reranker unavailable: built without the onnx feature"
        );
        None
    }

    #[cfg(feature = "onnx")]
    pub fn try_load(config: RerankerConfig) -> Option<Self> {
        use ort::session::builder::GraphOptimizationLevel;
        use ort::session::Session;

        let model_path = match config.model_path {
            Some(ref path) => path.clone(),
            None => {
                tracing::warn!("reranker unavailable: no model path configured");
                return None;
            },
        };
        let tokenizer_path = match config.tokenizer_path {
            Some(ref path) => path.clone(),
            None => {
                tracing::warn!("reranker unavailable: no tokenizer path configured");
                return None;
            },
        };

        let session = Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| b.commit_from_file(&model_path));
        let session = match session {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(error = %e, "reranker unavailable: model load failed");
                return None;
            },
        };

        let tokenizer = match tokenizers::Tokenizer::from_file(&tokenizer_path) {
            Ok(tokenizer) => tokenizer,
            Err(e) => {
                tracing::warn!(error = %e, "reranker unavailable: tokenizer load failed");
                return None;
            },
        };

        tracing::info!(model = %config.model, "cross-encoder reranker loaded");
        Some(Self {
            config,
            session: Mutex::new(session),
            tokenizer,
        })
    }

    pub fn model_name(&self) -> &str {
        &self.config.model
    }

    pub fn config(&self) -> &RerankerConfig {
        &self.config
    }

    /// Re-score and re-order the leading candidates. Items beyond the
    /// configured top_k keep their fused order after the reranked block.
    pub fn rerank(&self, query: &str, hits: Vec<Hit>, top_k: usize) -> Result<Vec<Hit>, RagError> {
        if hits.is_empty() {
            return Ok(hits);
        }

        let cut = self.config.top_k.min(hits.len());
        let (head, tail) = hits.split_at(cut);

        let mut scored: Vec<Hit> = Vec::with_capacity(head.len());
        for hit in head {
            let (q, t) = truncate_pair(query, &hit.text, self.config.max_chars);
            let score = self.score_pair(&q, &t)?;
            let mut hit = hit.clone();
            hit.score = score;
            // The cross-encoder's opinion replaces the fused score for
            // ranking purposes from here on
            hit.fused_score = Some(score);
            scored.push(hit);
        }

        sort_ranked(&mut scored);
        scored.extend(tail.iter().cloned());
        scored.truncate(top_k.max(1));
        Ok(scored)
    }

    #[cfg(not(feature = "onnx"))]
    fn score_pair(&self, _query: &str, _text: &str) -> Result<f32, RagError> {
        Err(RagError::Model("reranker model not loaded".into()))
    }

    #[cfg(feature = "onnx")]
    fn score_pair(&self, query: &str, text: &str) -> Result<f32, RagError> {
        use ndarray::Array2;
        use ort::value::Tensor;

        let encoding = self
            .tokenizer
            .encode((query, text), true)
            .map_err(|e| RagError::Reranker(e.to_string()))?;

        let len = encoding.get_ids().len().min(self.config.max_seq_len);
        let ids: Vec<i64> = encoding.get_ids()[..len].iter().map(|&v| v as i64).collect();
        let mask: Vec<i64> = encoding.get_attention_mask()[..len]
            .iter()
            .map(|&v| v as i64)
            .collect();
        let type_ids: Vec<i64> = encoding.get_type_ids()[..len]
            .iter()
            .map(|&v| v as i64)
            .collect();

        let input_ids = Array2::from_shape_vec((1, len), ids)
            .map_err(|e| RagError::Reranker(e.to_string()))?;
        let attention_mask = Array2::from_shape_vec((1, len), mask)
            .map_err(|e| RagError::Reranker(e.to_string()))?;
        let token_type_ids = Array2::from_shape_vec((1, len), type_ids)
            .map_err(|e| RagError::Reranker(e.to_string()))?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![
                "input_ids" => Tensor::from_array(input_ids).map_err(|e| RagError::Reranker(e.to_string()))?,
                "attention_mask" => Tensor::from_array(attention_mask).map_err(|e| RagError::Reranker(e.to_string()))?,
                "token_type_ids" => Tensor::from_array(token_type_ids).map_err(|e| RagError::Reranker(e.to_string()))?,
            ])
            .map_err(|e| RagError::Reranker(e.to_string()))?;

        let logits = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RagError::Reranker(e.to_string()))?;
        let raw = logits.1.first().copied().unwrap_or(0.0);

        // Sigmoid to a comparable [0, 1] relevance score
        Ok(1.0 / (1.0 + (-raw).exp()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_pair_respects_budget() {
        let query = "q".repeat(1000);
        let text = "t".repeat(5000);
        let (q, t) = truncate_pair(&query, &text, 1800);
        assert_eq!(q.chars().count(), 450);
        assert_eq!(q.chars().count() + t.chars().count(), 1800);
    }

    #[test]
    fn test_truncate_pair_short_inputs_untouched() {
        let (q, t) = truncate_pair("habeas corpus", "texto curto", 1800);
        assert_eq!(q, "habeas corpus");
        assert_eq!(t, "texto curto");
    }

    #[cfg(not(feature = "onnx"))]
    #[test]
    fn test_try_load_without_feature_is_none() {
        assert!(CrossEncoderReranker::try_load(RerankerConfig::default()).is_none());
    }
}
