//! Error union for the retrieval core
//!
//! One Result-style error type carrying every failure kind the pipeline
//! distinguishes. Adapters and providers map their internal errors into
//! these kinds at the boundary; the orchestrator branches on them to
//! decide between retry, degraded continuation, and surfacing.

use thiserror::Error;

/// Core error union
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Malformed query, out-of-range parameters, unknown dataset name
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Inconsistent scope combination (e.g. LOCAL without case_id)
    #[error("scope denied: {0}")]
    ScopeDenied(String),

    /// Lexical or vector adapter failed after internal retries
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Embedding or LLM provider failed
    #[error("provider failure: {0}")]
    ProviderFailure(String),

    /// Vector written or queried against a collection with incompatible
    /// dimensions. Fatal: never retried, never remapped.
    #[error("dimension mismatch: collection {collection} expects {expected}, got {actual}")]
    DimensionMismatch {
        collection: String,
        expected: usize,
        actual: usize,
    },

    /// Per-request deadline elapsed
    #[error("deadline exceeded after {0} ms")]
    Timeout(u64),

    /// Ingestion wrote to one backend but not the other; the sweep job repairs
    #[error("reconciliation needed: {0}")]
    ReconciliationNeeded(String),
}

impl Error {
    /// Whether the caller should treat this as a client error
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::InvalidInput(_) | Error::ScopeDenied(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_classification() {
        assert!(Error::InvalidInput("empty query".into()).is_client_error());
        assert!(Error::ScopeDenied("local without case".into()).is_client_error());
        assert!(!Error::BackendUnavailable("qdrant down".into()).is_client_error());
        assert!(!Error::Timeout(30_000).is_client_error());
    }

    #[test]
    fn test_dimension_mismatch_display() {
        let err = Error::DimensionMismatch {
            collection: "legal_br_v4".into(),
            expected: 1024,
            actual: 3072,
        };
        let msg = err.to_string();
        assert!(msg.contains("legal_br_v4"));
        assert!(msg.contains("1024"));
    }
}
