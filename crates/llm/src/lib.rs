//! LLM integration
//!
//! The retrieval pipeline uses an external LLM only as a pluggable text
//! generator: HyDE hypothetical documents, multi-query variants, query
//! rewrites and router classification. Answer synthesis never happens here.

pub mod backend;
pub mod prompt;

pub use backend::{GenerationResult, HttpChatBackend, LlmBackend, LlmConfig};
pub use prompt::{
    classification_prompt, hyde_prompt, multiquery_prompt, parse_variant_list, rewrite_prompt,
    Message, Role,
};

use thiserror::Error;

/// LLM errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("request error: {0}")]
    Request(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("empty response from model")]
    EmptyResponse,

    #[error("unexpected response shape: {0}")]
    Parse(String),
}

impl From<LlmError> for lexrag_core::Error {
    fn from(err: LlmError) -> Self {
        lexrag_core::Error::ProviderFailure(err.to_string())
    }
}
