//! Chat-completions client.

use super::types::{ApiErrorResponse, ChatCompletionRequest, ChatCompletionResponse, ChatMessage};
use crate::config::ModelConfig;
use crate::error::{is_transient_status, ServerError};
use crate::resilience::{with_retry, RetryConfig};
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

/// One chat-completion call against a language model.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Send `request` and return the first choice's message.
    async fn complete(&self, request: &ChatCompletionRequest) -> Result<ChatMessage, ServerError>;
}

/// OpenAI-compatible `/chat/completions` client.
///
/// Transient failures (timeouts, connect errors, 408, 429, 5xx) are retried
/// within the configured budget; any other status fails the call at once.
pub struct OpenAiClient {
    http: Client,
    api_key: String,
    endpoint: String,
    retry: RetryConfig,
}

impl OpenAiClient {
    pub fn new(config: &ModelConfig) -> Result<Self, ServerError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| ServerError::config("OPENAI_API_KEY is not set"))?;

        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ServerError::config(format!("Cannot build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_key,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            retry: RetryConfig::for_model(config),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send_once(&self, request: &ChatCompletionRequest) -> Result<ChatMessage, ServerError> {
        let model = request.model.as_str();
        debug!("Requesting completion from {}", model);

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| transport_error(model, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServerError::model(
                model,
                Some(status.as_u16()),
                api_error_message(&body),
                is_transient_status(status.as_u16()),
            ));
        }

        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ServerError::model(model, None, format!("Invalid response body: {}", e), false))?;

        body.into_message()
            .ok_or_else(|| ServerError::model(model, None, "Response contained no choices", false))
    }
}

#[async_trait]
impl ChatModel for OpenAiClient {
    async fn complete(&self, request: &ChatCompletionRequest) -> Result<ChatMessage, ServerError> {
        with_retry(&self.retry, || self.send_once(request)).await
    }
}

fn transport_error(model: &str, error: reqwest::Error) -> ServerError {
    let transient = error.is_timeout() || error.is_connect();
    ServerError::model(model, error.status().map(|s| s.as_u16()), error.to_string(), transient)
}

/// Pull the provider's message out of an error body, falling back to the raw text.
fn api_error_message(body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ApiErrorResponse>(body) {
        return match parsed.error.kind {
            Some(kind) => format!("{} ({})", parsed.error.message, kind),
            None => parsed.error.message,
        };
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        "empty response body".to_string()
    } else {
        trimmed.chars().take(500).collect()
    }
}
