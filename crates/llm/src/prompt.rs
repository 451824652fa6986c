//! Prompt construction
//!
//! Short, single-purpose prompts. Every consumer parses the raw completion
//! itself; nothing here depends on a specific model family.

use serde::{Deserialize, Serialize};

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// HyDE: ask for a plausible answer paragraph to embed instead of the
/// bare query
pub fn hyde_prompt(query: &str) -> Vec<Message> {
    vec![
        Message::system(
            "You are a legal research assistant. Write a short, plausible \
             passage that could appear in a legal document answering the \
             user's question. Write in the same language as the question. \
             One paragraph, no preamble, no citations of your own.",
        ),
        Message::user(query.to_string()),
    ]
}

/// Multi-query: ask for N reformulations with synonyms and legal-domain
/// vocabulary, one per line
pub fn multiquery_prompt(query: &str, count: usize) -> Vec<Message> {
    vec![
        Message::system(format!(
            "You are a legal search assistant. Rewrite the user's query into \
             {count} alternative search queries using synonyms and legal-domain \
             vocabulary, keeping the original language. Return exactly one \
             query per line, numbered like '1. ...', with no other text.",
        )),
        Message::user(query.to_string()),
    ]
}

/// CRAG retry: ask for one sharper reformulation of a query whose results
/// were weak
pub fn rewrite_prompt(query: &str) -> Vec<Message> {
    vec![
        Message::system(
            "The following legal search query returned weak results. Rewrite \
             it once to be more specific and more likely to match legal \
             sources: expand abbreviations, add the controlling statute or \
             doctrine name if implied, keep the original language. Return \
             only the rewritten query.",
        ),
        Message::user(query.to_string()),
    ]
}

/// Router layer 2: line-oriented classification of a text snippet
pub fn classification_prompt(snippet: &str) -> Vec<Message> {
    vec![Message::user(format!(
        "You are a legal text classifier. Analyze the following text and classify it.\n\n\
         TEXT:\n{snippet}\n\n\
         Respond in exactly this format (one line each):\n\
         JURISDICTION: BR|US|UK|EU|INT|GENERAL\n\
         DOCUMENT_TYPE: legislation|jurisprudence|contract|doctrine|pleading|general\n\
         LANGUAGE: pt|en|de|fr|es|other\n\
         CONFIDENCE: 0.0-1.0\n\
         REASON: brief explanation\n\n\
         Rules:\n\
         - BR = Brazilian law\n\
         - US = United States law\n\
         - UK = United Kingdom law\n\
         - EU = European Union law\n\
         - INT = International/comparative law\n\
         - GENERAL = Non-legal or general content\n",
    ))]
}

/// Parse a numbered or bulleted variant list, one variant per line
pub fn parse_variant_list(text: &str, max: usize) -> Vec<String> {
    text.lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ')' || c == '-')
                .trim()
        })
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .take(max)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_numbered_variants() {
        let text = "1. requisitos do habeas corpus\n2) cabimento de habeas corpus\n- hc requisitos";
        let variants = parse_variant_list(text, 3);
        assert_eq!(
            variants,
            vec![
                "requisitos do habeas corpus",
                "cabimento de habeas corpus",
                "hc requisitos"
            ]
        );
    }

    #[test]
    fn test_parse_caps_at_max() {
        let text = "1. a\n2. b\n3. c\n4. d";
        assert_eq!(parse_variant_list(text, 2).len(), 2);
    }

    #[test]
    fn test_parse_skips_blank_lines() {
        let text = "\n1. only one\n\n";
        assert_eq!(parse_variant_list(text, 3), vec!["only one"]);
    }

    #[test]
    fn test_classification_prompt_mentions_format() {
        let messages = classification_prompt("Lei nº 8.112");
        assert!(messages[0].content.contains("JURISDICTION:"));
        assert!(messages[0].content.contains("Lei nº 8.112"));
    }
}
