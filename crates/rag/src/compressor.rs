//! Token-budgeted extractive compression
//!
//! Shrinks ranked passages to fit a downstream LLM context. Selection is
//! purely extractive: sentences are scored by lowercased alphanumeric
//! token overlap with the query plus a small bigram bonus, then emitted in
//! document order until the per-chunk character cap or the remaining
//! global token budget runs out. A chunk never grows.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use lexrag_core::Hit;

/// Compressor configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CompressorConfig {
    /// Per-chunk character cap after compression
    pub max_chars_per_chunk: usize,
    /// Chunks at or below this size are passed through untouched
    pub min_chars_per_chunk: usize,
    /// Global budget across all chunks, in estimated tokens
    pub token_budget: usize,
}

impl Default for CompressorConfig {
    fn default() -> Self {
        use lexrag_config::constants::rag;
        Self {
            max_chars_per_chunk: rag::COMPRESSION_MAX_CHARS,
            min_chars_per_chunk: rag::COMPRESSION_MIN_CHARS,
            token_budget: rag::COMPRESSION_TOKEN_BUDGET,
        }
    }
}

/// Result of compressing one ranked list
#[derive(Debug, Clone)]
pub struct CompressionOutcome {
    pub hits: Vec<Hit>,
    pub original_chars: usize,
    pub compressed_chars: usize,
    pub chunks_compressed: usize,
    /// (chunk_id, original, compressed) per chunk, for the trace
    pub per_chunk: BTreeMap<String, (usize, usize)>,
}

/// Rough token estimate: 1 token per 4 characters
fn estimate_tokens(chars: usize) -> usize {
    chars.div_ceil(4)
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn bigrams(tokens: &[String]) -> HashSet<(String, String)> {
    tokens
        .windows(2)
        .map(|w| (w[0].clone(), w[1].clone()))
        .collect()
}

/// Split into sentences, keeping terminators
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if matches!(ch, '.' | '?' | '!' | '\n') {
            if !current.trim().is_empty() {
                sentences.push(current.trim().to_string());
            }
            current.clear();
        }
    }
    if !current.trim().is_empty() {
        sentences.push(current.trim().to_string());
    }
    sentences
}

/// Extractive compressor
pub struct Compressor {
    config: CompressorConfig,
}

impl Compressor {
    pub fn new(config: CompressorConfig) -> Self {
        Self { config }
    }

    /// Query-relevance score for one sentence
    fn sentence_score(
        query_tokens: &HashSet<String>,
        query_bigrams: &HashSet<(String, String)>,
        sentence: &str,
    ) -> f32 {
        let tokens = tokenize(sentence);
        if tokens.is_empty() {
            return 0.0;
        }
        let overlap = tokens.iter().filter(|t| query_tokens.contains(*t)).count();
        let sentence_bigrams = bigrams(&tokens);
        let bigram_hits = sentence_bigrams
            .iter()
            .filter(|b| query_bigrams.contains(*b))
            .count();
        overlap as f32 / tokens.len() as f32 + 0.25 * bigram_hits as f32
    }

    /// Compress one chunk text to at most `char_cap` characters
    fn compress_text(&self, query: &str, text: &str, char_cap: usize) -> String {
        if text.chars().count() <= char_cap {
            return text.to_string();
        }

        let query_token_list = tokenize(query);
        let query_tokens: HashSet<String> = query_token_list.iter().cloned().collect();
        let query_bigrams = bigrams(&query_token_list);

        let sentences = split_sentences(text);
        let mut scored: Vec<(usize, f32, &String)> = sentences
            .iter()
            .enumerate()
            .map(|(i, s)| {
                (
                    i,
                    Self::sentence_score(&query_tokens, &query_bigrams, s),
                    s,
                )
            })
            .collect();

        // Pick best-scoring sentences first, then restore document order
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let mut selected: Vec<(usize, &String)> = Vec::new();
        let mut used_chars = 0usize;
        for (idx, score, sentence) in &scored {
            let len = sentence.chars().count();
            if used_chars + len + 1 > char_cap {
                continue;
            }
            if *score <= 0.0 && !selected.is_empty() {
                break;
            }
            selected.push((*idx, sentence));
            used_chars += len + 1;
        }

        if selected.is_empty() {
            // Nothing fit whole; hard-truncate at a char boundary
            let truncated: String = text.chars().take(char_cap).collect();
            return truncated.trim_end().to_string();
        }

        selected.sort_by_key(|(idx, _)| *idx);
        selected
            .into_iter()
            .map(|(_, s)| s.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Compress a ranked list under the global token budget. Order and
    /// ids are preserved; only `text` shrinks.
    pub fn compress(&self, query: &str, hits: Vec<Hit>) -> CompressionOutcome {
        let mut remaining_tokens = self.config.token_budget;
        let mut out_hits = Vec::with_capacity(hits.len());
        let mut original_chars = 0usize;
        let mut compressed_chars = 0usize;
        let mut chunks_compressed = 0usize;
        let mut per_chunk = BTreeMap::new();

        for mut hit in hits {
            let original = hit.text.chars().count();
            original_chars += original;

            let budget_chars = remaining_tokens.saturating_mul(4);
            let cap = self
                .config
                .max_chars_per_chunk
                .min(budget_chars)
                .max(self.config.min_chars_per_chunk.min(original));

            let compressed = if original <= self.config.min_chars_per_chunk {
                hit.text.clone()
            } else {
                self.compress_text(query, &hit.text, cap)
            };

            let compressed_len = compressed.chars().count();
            debug_assert!(compressed_len <= original);
            if compressed_len < original {
                chunks_compressed += 1;
            }
            compressed_chars += compressed_len;
            remaining_tokens = remaining_tokens.saturating_sub(estimate_tokens(compressed_len));
            per_chunk.insert(hit.chunk_id.clone(), (original, compressed_len));

            hit.text = compressed;
            out_hits.push(hit);
        }

        CompressionOutcome {
            hits: out_hits,
            original_chars,
            compressed_chars,
            chunks_compressed,
            per_chunk,
        }
    }
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new(CompressorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn hit(id: &str, text: &str) -> Hit {
        Hit {
            chunk_id: id.into(),
            score: 1.0,
            fused_score: None,
            text: text.into(),
            source_collection: "lei".into(),
            doc_id: None,
            position: None,
            metadata: HashMap::new(),
        }
    }

    fn compressor(max_chars: usize, budget: usize) -> Compressor {
        Compressor::new(CompressorConfig {
            max_chars_per_chunk: max_chars,
            min_chars_per_chunk: 20,
            token_budget: budget,
        })
    }

    #[test]
    fn test_small_chunk_untouched() {
        let c = compressor(900, 3000);
        let outcome = c.compress("dano moral", vec![hit("a", "Texto curto.")]);
        assert_eq!(outcome.hits[0].text, "Texto curto.");
        assert_eq!(outcome.chunks_compressed, 0);
    }

    #[test]
    fn test_never_grows() {
        let long = "A responsabilidade civil do Estado é objetiva. ".repeat(40);
        let c = compressor(200, 3000);
        let outcome = c.compress("responsabilidade do Estado", vec![hit("a", &long)]);
        assert!(outcome.hits[0].text.chars().count() <= long.chars().count());
        assert!(outcome.hits[0].text.chars().count() <= 200);
        assert_eq!(outcome.chunks_compressed, 1);
    }

    #[test]
    fn test_relevant_sentences_survive() {
        let text = format!(
            "O clima estava agradável naquele dia. {} A responsabilidade civil do Estado \
             por atos de seus agentes é objetiva. {} O restaurante fechou cedo.",
            "Considerações genéricas sem relação. ".repeat(10),
            "Outras observações irrelevantes aqui. ".repeat(10),
        );
        let c = compressor(120, 3000);
        let outcome = c.compress("responsabilidade civil do Estado objetiva", vec![hit("a", &text)]);
        assert!(outcome.hits[0].text.contains("responsabilidade civil do Estado"));
        assert!(!outcome.hits[0].text.contains("restaurante"));
    }

    #[test]
    fn test_global_budget_exhaustion() {
        let long = "Frase sobre direito administrativo e licitações públicas. ".repeat(30);
        // Budget covers roughly one compressed chunk only
        let c = Compressor::new(CompressorConfig {
            max_chars_per_chunk: 400,
            min_chars_per_chunk: 10,
            token_budget: 100,
        });
        let outcome = c.compress(
            "licitações",
            vec![hit("a", &long), hit("b", &long), hit("c", &long)],
        );
        // Later chunks get squeezed down to the residual budget
        let lens: Vec<usize> = outcome
            .hits
            .iter()
            .map(|h| h.text.chars().count())
            .collect();
        assert!(lens[0] <= 400);
        assert!(lens[2] <= lens[0]);
        assert_eq!(outcome.hits.len(), 3);
    }

    #[test]
    fn test_counts_recorded_per_chunk() {
        let long = "A tutela de urgência exige probabilidade do direito. ".repeat(20);
        let c = compressor(150, 3000);
        let outcome = c.compress("tutela de urgência", vec![hit("x", &long)]);
        let (orig, comp) = outcome.per_chunk["x"];
        assert!(orig > comp);
        assert_eq!(outcome.original_chars, orig);
        assert_eq!(outcome.compressed_chars, comp);
    }

    #[test]
    fn test_order_preserved() {
        let long = "Texto de preenchimento para compressão extrativa. ".repeat(10);
        let c = compressor(100, 3000);
        let outcome = c.compress("texto", vec![hit("z", &long), hit("a", &long)]);
        let ids: Vec<&str> = outcome.hits.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["z", "a"]);
    }
}
