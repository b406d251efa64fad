//! OpenAI-compatible inference client.
//!
//! Sends non-streaming chat completion requests to a local LLM endpoint and
//! returns the assistant text. The orchestrator depends only on the
//! [`ChatBackend`] trait, so tests substitute scripted backends.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;

use super::errors::InferenceError;
use super::types::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage};
use crate::agent_core::types::Turn;
use crate::config::ModelConfig;

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// ─── ChatBackend ─────────────────────────────────────────────────────────────

/// The model: ordered turns in, assistant text out.
///
/// Implementations must return within a bounded time; a timeout is a hard
/// error, never a truncated answer.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn chat(&self, messages: &[Turn]) -> Result<String, InferenceError>;
}

// ─── InferenceClient ─────────────────────────────────────────────────────────

/// Client for the local LLM inference endpoint.
pub struct InferenceClient {
    http: HttpClient,
    base_url: String,
    model_name: String,
    temperature: f32,
    max_tokens: u32,
    request_timeout: Duration,
}

impl InferenceClient {
    /// Create a client from the model configuration.
    ///
    /// Does NOT check connectivity; call [`health_check`](Self::health_check).
    pub fn from_config(config: &ModelConfig) -> Result<Self, InferenceError> {
        let request_timeout = Duration::from_secs(config.request_timeout_secs.max(1));
        let base_url = config.base_url.trim_end_matches('/').to_string();

        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(request_timeout)
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            base_url,
            model_name: config.model_name.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            request_timeout,
        })
    }

    /// The base URL of the model endpoint.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The model name sent with each request.
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    // ─── Health Check ────────────────────────────────────────────────────

    /// Check that the endpoint is reachable.
    ///
    /// Sends `GET {base_url}/models`, which does not consume inference tokens.
    pub async fn health_check(&self) -> Result<(), InferenceError> {
        let url = format!("{}/models", self.base_url);

        let resp = self
            .http
            .get(&url)
            .timeout(CONNECT_TIMEOUT)
            .send()
            .await
            .map_err(|e| self.map_send_error(&url, e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    fn map_send_error(&self, url: &str, e: reqwest::Error) -> InferenceError {
        if e.is_timeout() {
            InferenceError::Timeout {
                duration_secs: self.request_timeout.as_secs(),
            }
        } else {
            InferenceError::ConnectionFailed {
                endpoint: url.to_string(),
                reason: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl ChatBackend for InferenceClient {
    async fn chat(&self, messages: &[Turn]) -> Result<String, InferenceError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatCompletionRequest {
            model: self.model_name.clone(),
            messages: messages.iter().map(ChatMessage::from).collect(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: false,
        };

        let started = std::time::Instant::now();
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        let body_text = response.text().await.map_err(|e| {
            if e.is_timeout() {
                InferenceError::Timeout {
                    duration_secs: self.request_timeout.as_secs(),
                }
            } else {
                InferenceError::InvalidResponse {
                    reason: format!("failed to read response body: {e}"),
                }
            }
        })?;

        let parsed: ChatCompletionResponse =
            serde_json::from_str(&body_text).map_err(|e| InferenceError::InvalidResponse {
                reason: format!("malformed completion JSON: {e}"),
            })?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| InferenceError::InvalidResponse {
                reason: "completion has no choices".into(),
            })?;

        tracing::debug!(
            model = %self.model_name,
            messages = messages.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            finish_reason = ?choice.finish_reason,
            "chat completion received"
        );

        Ok(choice.message.content.unwrap_or_default())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
