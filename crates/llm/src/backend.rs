//! LLM backend implementations
//!
//! One trait, one HTTP implementation speaking the OpenAI-compatible
//! chat-completions shape (Gemini, Ollama and vLLM gateways all expose
//! it). Transient failures are retried with exponential backoff before
//! anything propagates to the caller.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::prompt::Message;
use crate::LlmError;

/// LLM configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Model name/ID
    pub model: String,
    /// OpenAI-compatible base URL (`{endpoint}/chat/completions`)
    pub endpoint: String,
    pub api_key: Option<String>,
    pub max_tokens: usize,
    pub temperature: f32,
    pub timeout: Duration,
    /// Maximum retry attempts for transient failures
    pub max_retries: u32,
    /// Initial backoff, doubled on each retry
    pub initial_backoff: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: lexrag_config::constants::models::HYDE.to_string(),
            endpoint: lexrag_config::constants::endpoints::LLM_DEFAULT.to_string(),
            api_key: None,
            max_tokens: 300,
            temperature: 0.3,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
        }
    }
}

/// LLM generation result
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub text: String,
    pub total_time_ms: u64,
}

/// LLM backend trait
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Generate a completion for the given messages
    async fn generate(&self, messages: &[Message]) -> Result<GenerationResult, LlmError>;

    /// Check if the model endpoint is reachable
    async fn is_available(&self) -> bool;

    /// Get model name
    fn model_name(&self) -> &str;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    max_tokens: usize,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// HTTP chat backend over a shared client
pub struct HttpChatBackend {
    config: LlmConfig,
    client: Client,
}

impl HttpChatBackend {
    pub fn new(config: LlmConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    /// Reuse an existing HTTP client pool
    pub fn with_client(config: LlmConfig, client: Client) -> Self {
        Self { config, client }
    }

    async fn call_once(&self, messages: &[Message]) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.config.endpoint.trim_end_matches('/'));
        let body = ChatRequest {
            model: &self.config.model,
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let mut request = self.client.post(&url).json(&body);
        if let Some(ref key) = self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(LlmError::RateLimited(status.to_string()));
        }
        if status.is_server_error() {
            return Err(LlmError::Request(format!("server error: {status}")));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(LlmError::Parse(format!("{status}: {detail}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(text)
    }

    fn is_transient(err: &LlmError) -> bool {
        matches!(err, LlmError::Request(_) | LlmError::RateLimited(_))
    }
}

#[async_trait]
impl LlmBackend for HttpChatBackend {
    async fn generate(&self, messages: &[Message]) -> Result<GenerationResult, LlmError> {
        let start = Instant::now();
        let mut backoff = self.config.initial_backoff;
        let mut attempt = 0u32;

        loop {
            match self.call_once(messages).await {
                Ok(text) => {
                    return Ok(GenerationResult {
                        text,
                        total_time_ms: start.elapsed().as_millis() as u64,
                    });
                },
                Err(err) if Self::is_transient(&err) && attempt < self.config.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "LLM call failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                },
                Err(err) => return Err(err),
            }
        }
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/models", self.config.endpoint.trim_end_matches('/'));
        let mut request = self.client.get(&url);
        if let Some(ref key) = self.config.api_key {
            request = request.bearer_auth(key);
        }
        matches!(request.send().await, Ok(r) if r.status().is_success())
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = LlmConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.max_tokens, 300);
    }

    #[test]
    fn test_transient_classification() {
        assert!(HttpChatBackend::is_transient(&LlmError::RateLimited(
            "429".into()
        )));
        assert!(HttpChatBackend::is_transient(&LlmError::Request(
            "connection reset".into()
        )));
        assert!(!HttpChatBackend::is_transient(&LlmError::EmptyResponse));
        assert!(!HttpChatBackend::is_transient(&LlmError::Parse(
            "bad json".into()
        )));
    }

    #[test]
    fn test_chat_request_shape() {
        let messages = vec![Message::user("oi")];
        let req = ChatRequest {
            model: "m",
            messages: &messages,
            max_tokens: 10,
            temperature: 0.3,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "oi");
    }
}
