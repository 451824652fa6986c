//! Jurisdictions, document types and embedding routes

use serde::{Deserialize, Serialize};

/// Legal jurisdiction of a text; each maps 1-to-1 to a default embedding
/// collection and provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Jurisdiction {
    Br,
    Us,
    Uk,
    Eu,
    Int,
    General,
}

impl Jurisdiction {
    pub const ALL: [Jurisdiction; 6] = [
        Jurisdiction::Br,
        Jurisdiction::Us,
        Jurisdiction::Uk,
        Jurisdiction::Eu,
        Jurisdiction::Int,
        Jurisdiction::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Jurisdiction::Br => "BR",
            Jurisdiction::Us => "US",
            Jurisdiction::Uk => "UK",
            Jurisdiction::Eu => "EU",
            Jurisdiction::Int => "INT",
            Jurisdiction::General => "GENERAL",
        }
    }

    pub fn parse(s: &str) -> Option<Jurisdiction> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BR" => Some(Jurisdiction::Br),
            "US" => Some(Jurisdiction::Us),
            "UK" => Some(Jurisdiction::Uk),
            "EU" => Some(Jurisdiction::Eu),
            "INT" => Some(Jurisdiction::Int),
            "GENERAL" => Some(Jurisdiction::General),
            _ => None,
        }
    }
}

/// Kind of legal document, used by the chunker and the router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Legislation,
    Jurisprudence,
    Contract,
    Doctrine,
    Pleading,
    /// Exam question; kept whole when small
    Question,
    #[default]
    General,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Legislation => "legislation",
            DocumentType::Jurisprudence => "jurisprudence",
            DocumentType::Contract => "contract",
            DocumentType::Doctrine => "doctrine",
            DocumentType::Pleading => "pleading",
            DocumentType::Question => "question",
            DocumentType::General => "general",
        }
    }

    pub fn parse(s: &str) -> Option<DocumentType> {
        match s.trim().to_ascii_lowercase().as_str() {
            "legislation" => Some(DocumentType::Legislation),
            "jurisprudence" => Some(DocumentType::Jurisprudence),
            "contract" => Some(DocumentType::Contract),
            "doctrine" => Some(DocumentType::Doctrine),
            "pleading" => Some(DocumentType::Pleading),
            "question" => Some(DocumentType::Question),
            "general" => Some(DocumentType::General),
            _ => None,
        }
    }
}

/// Embedding provider family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderName {
    Openai,
    VoyageV4,
    VoyageLaw,
    Kanon2,
    Jurisbert,
}

impl ProviderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderName::Openai => "openai",
            ProviderName::VoyageV4 => "voyage_v4",
            ProviderName::VoyageLaw => "voyage_law",
            ProviderName::Kanon2 => "kanon2",
            ProviderName::Jurisbert => "jurisbert",
        }
    }

    pub fn parse(s: &str) -> Option<ProviderName> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Some(ProviderName::Openai),
            "voyage_v4" => Some(ProviderName::VoyageV4),
            "voyage_law" => Some(ProviderName::VoyageLaw),
            "kanon2" => Some(ProviderName::Kanon2),
            "jurisbert" => Some(ProviderName::Jurisbert),
            _ => None,
        }
    }
}

/// How a routing decision was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteMethod {
    UserHint,
    Heuristic,
    Llm,
    Fallback,
    /// Fallback taken because the LLM layer itself failed
    FallbackError,
}

/// Outcome of classifying a text for embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub jurisdiction: Jurisdiction,
    pub document_type: DocumentType,
    pub language: String,
    pub provider: ProviderName,
    pub collection: String,
    /// Confidence in [0, 1]
    pub confidence: f32,
    pub method: RouteMethod,
    pub reason: String,
    /// Advisory: callers may send the document whole to the LLM instead
    pub skip_rag: bool,
    pub estimated_pages: usize,
}

/// A resolved route: decision plus the dimension contract
///
/// Invariant: `dimensions` equals the provider's declared dimensions;
/// routes violating this are rejected before any vector I/O.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRoute {
    pub provider: ProviderName,
    pub collection: String,
    pub dimensions: usize,
    pub decision: RoutingDecision,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jurisdiction_parse_roundtrip() {
        for j in Jurisdiction::ALL {
            assert_eq!(Jurisdiction::parse(j.as_str()), Some(j));
        }
        assert_eq!(Jurisdiction::parse("br"), Some(Jurisdiction::Br));
        assert_eq!(Jurisdiction::parse("XX"), None);
    }

    #[test]
    fn test_document_type_parse() {
        assert_eq!(
            DocumentType::parse("Jurisprudence"),
            Some(DocumentType::Jurisprudence)
        );
        assert_eq!(DocumentType::parse("unknown"), None);
    }

    #[test]
    fn test_provider_serde_tags() {
        let json = serde_json::to_string(&ProviderName::VoyageV4).unwrap();
        assert_eq!(json, "\"voyage_v4\"");
    }
}
