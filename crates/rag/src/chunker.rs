//! Legal-aware text chunking
//!
//! Recursive splitter with document-type separator ladders. The normative
//! chain rule governs legislation: an article is atomic between "Art. N"
//! and its §/inciso subunits, and an oversize article is split only at
//! those subunit boundaries with the caput prepended as a context header.
//!
//! Invariant: with zero overlap, concatenating the chunk texts
//! reconstructs the original document after whitespace normalization.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use lexrag_core::DocumentType;

/// Separator ladders, most-structural first
const SEPARATORS_LEGISLATION: &[&str] = &[
    "\nLIVRO",
    "\nTÍTULO",
    "\nCAPÍTULO",
    "\nSeção",
    "\nSubseção",
    "\nArt.",
    "\n\n",
    "\n",
    ". ",
    " ",
];

const SEPARATORS_JURISPRUDENCE: &[&str] = &[
    "\nEMENTA",
    "\nACÓRDÃO",
    "\nRELATÓRIO",
    "\nVOTO",
    "\nDISPOSITIVO",
    "\n\n",
    "\n",
    ". ",
    " ",
];

const SEPARATORS_DEFAULT: &[&str] = &["\n\n", "\n", ". ", " "];

static RE_ARTICLE_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*Art\.\s*\d+").expect("article regex"));
static RE_SUBUNIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n\s*(?:§\s*\d+|Parágrafo único|[IVXLC]+\s*[-–—])").expect("subunit regex"));

const CAPUT_MAX_CHARS: usize = 300;

/// Chunker configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Target chunk size in characters
    pub chunk_size: usize,
    /// Tail of the previous chunk carried into the next, in characters
    pub overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: lexrag_config::constants::rag::DEFAULT_CHUNK_SIZE,
            overlap: lexrag_config::constants::rag::DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// One chunk of source text with its monotonic position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    /// Stable id: SHA-256(doc_id:position) truncated to 16 hex chars
    pub id: String,
    pub text: String,
    pub position: i64,
}

fn make_chunk_id(doc_id: &str, position: i64) -> String {
    let digest = Sha256::digest(format!("{doc_id}:{position}").as_bytes());
    hex::encode(digest)[..16].to_string()
}

fn separators_for(doc_type: DocumentType) -> &'static [&'static str] {
    match doc_type {
        DocumentType::Legislation => SEPARATORS_LEGISLATION,
        DocumentType::Jurisprudence => SEPARATORS_JURISPRUDENCE,
        _ => SEPARATORS_DEFAULT,
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Last `n` characters of a string, on char boundaries
fn char_tail(s: &str, n: usize) -> &str {
    let total = char_len(s);
    if total <= n {
        return s;
    }
    let skip = total - n;
    match s.char_indices().nth(skip) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

/// Split on a separator without losing text. Whitespace separators are
/// dropped; ". " keeps the period with the preceding sentence; structural
/// markers stay attached to the part they introduce.
fn split_on(text: &str, sep: &str) -> Vec<String> {
    if sep.trim().is_empty() {
        return text.split(sep).map(str::to_string).collect();
    }
    if sep == ". " {
        let mut parts = Vec::new();
        let mut rest = text;
        while let Some(idx) = rest.find(sep) {
            parts.push(rest[..=idx].to_string());
            rest = &rest[idx + 2..];
        }
        parts.push(rest.to_string());
        return parts;
    }
    // Structural marker: "\nArt." etc. Keep the marker (sans newline) as
    // the prefix of the following part.
    let marker = &sep[1..];
    let mut parts = Vec::new();
    let mut start = 0usize;
    for (idx, _) in text.match_indices(sep) {
        parts.push(text[start..idx].to_string());
        start = idx + 1; // skip only the newline, keep the marker text
    }
    parts.push(text[start..].to_string());
    debug_assert!(parts.len() < 2 || parts[1].starts_with(marker));
    parts
}

/// Recursive character splitter over a separator ladder
fn split_by_separators(
    text: &str,
    separators: &[&str],
    config: &ChunkerConfig,
    legislation: bool,
) -> Vec<String> {
    if char_len(text) <= config.chunk_size {
        return if text.trim().is_empty() {
            Vec::new()
        } else {
            vec![text.to_string()]
        };
    }

    // A single oversize article is atomic down to its §/inciso subunits;
    // the generic ladder must not slice through it
    if legislation
        && RE_ARTICLE_START.is_match(text)
        && !text.contains("\nArt.")
        && RE_SUBUNIT.is_match(text)
    {
        return chunk_long_article(text, config);
    }

    let sep = separators.first().copied().unwrap_or(" ");
    let remaining: &[&str] = if separators.len() > 1 {
        &separators[1..]
    } else {
        &[" "]
    };

    let parts = split_on(text, sep);
    let non_empty = parts.iter().filter(|p| !p.trim().is_empty()).count();
    if non_empty <= 1 {
        return split_by_separators(text, remaining, config, legislation);
    }

    let joiner = if sep.trim().is_empty() { sep } else { "\n" };

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    for part in parts {
        if part.trim().is_empty() {
            continue;
        }
        let candidate_len = char_len(&current) + char_len(joiner) + char_len(&part);
        if candidate_len > config.chunk_size && !current.is_empty() {
            chunks.push(current.trim().to_string());
            if config.overlap > 0 && char_len(&current) > config.overlap {
                let tail = char_tail(&current, config.overlap).to_string();
                current = format!("{tail}{joiner}{part}");
            } else {
                current = part;
            }
        } else if current.is_empty() {
            current = part;
        } else {
            current.push_str(joiner);
            current.push_str(&part);
        }
    }
    if !current.trim().is_empty() {
        chunks.push(current.trim().to_string());
    }

    // Recursively refine anything still oversized
    let mut result = Vec::new();
    for chunk in chunks {
        if char_len(&chunk) > config.chunk_size {
            if legislation && RE_ARTICLE_START.is_match(&chunk) {
                result.extend(chunk_long_article(&chunk, config));
            } else {
                result.extend(split_by_separators(&chunk, remaining, config, legislation));
            }
        } else {
            result.push(chunk);
        }
    }
    result
}

/// First sentence/paragraph of an article, capped at 300 chars
fn extract_caput(article: &str) -> String {
    let mut caput_lines: Vec<&str> = Vec::new();
    for line in article.trim().lines() {
        if !caput_lines.is_empty() && RE_SUBUNIT.is_match(&format!("\n{line}")) {
            break;
        }
        caput_lines.push(line);
        if char_len(&caput_lines.join("\n")) > CAPUT_MAX_CHARS {
            break;
        }
    }
    let caput = caput_lines.join("\n");
    if char_len(&caput) > CAPUT_MAX_CHARS {
        char_tail_front(&caput, CAPUT_MAX_CHARS).to_string()
    } else {
        caput
    }
}

/// First `n` characters, on char boundaries
fn char_tail_front(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Split an oversize article at §/inciso boundaries, prepending the caput
/// to every derived chunk
fn chunk_long_article(article: &str, config: &ChunkerConfig) -> Vec<String> {
    let caput = extract_caput(article);
    let header = format!("{caput}\n[...continuação...]\n");

    let mut boundaries: Vec<usize> = RE_SUBUNIT.find_iter(article).map(|m| m.start()).collect();
    if boundaries.is_empty() {
        // No subunits to split at; fall back to the default ladder
        return split_by_separators(article, SEPARATORS_DEFAULT, config, false);
    }
    boundaries.push(article.len());

    let mut parts: Vec<&str> = Vec::new();
    let mut prev = 0usize;
    for b in boundaries {
        if b > prev {
            parts.push(&article[prev..b]);
        }
        prev = b;
    }

    let mut chunks = Vec::new();
    let mut current = header.clone();
    let mut first = true;
    for part in parts {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        // The caput already carries the first segment
        if first {
            first = false;
            if part == caput.trim() {
                continue;
            }
        }
        if char_len(&current) + char_len(part) + 1 > config.chunk_size && current != header {
            chunks.push(current.trim().to_string());
            current = header.clone();
        }
        current.push_str(part);
        current.push('\n');
    }
    if current.trim() != header.trim() && !current.trim().is_empty() {
        chunks.push(current.trim().to_string());
    }
    chunks
}

/// Chunk a document respecting legal structure. Positions are monotonic
/// from 0 and (doc_id, position) keys the stable chunk id.
pub fn chunk_document(
    text: &str,
    doc_id: &str,
    doc_type: DocumentType,
    config: &ChunkerConfig,
) -> Vec<TextChunk> {
    // Exam questions stay whole when reasonably small
    if doc_type == DocumentType::Question && char_len(text) <= config.chunk_size * 2 {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }
        return vec![TextChunk {
            id: make_chunk_id(doc_id, 0),
            text: trimmed.to_string(),
            position: 0,
        }];
    }

    let separators = separators_for(doc_type);
    let legislation = doc_type == DocumentType::Legislation;
    let raw = split_by_separators(text, separators, config, legislation);

    raw.into_iter()
        .filter(|c| !c.trim().is_empty())
        .enumerate()
        .map(|(i, c)| TextChunk {
            id: make_chunk_id(doc_id, i as i64),
            text: c.trim().to_string(),
            position: i as i64,
        })
        .collect()
}
