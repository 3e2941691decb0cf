//! OpenAI-compatible chat completion client.
//!
//! Requests are paced by a token-bucket rate limiter and retried with
//! exponential backoff on 429, 5xx and network errors. Other client errors
//! fail immediately.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{LlmConfig, RateLimitConfig, RetryConfig};
use crate::domain::ports::LlmClient;

#[derive(Debug, Error)]
pub enum LlmApiError {
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("No API key configured; set {0} or llm.api_key")]
    MissingApiKey(String),

    #[error("Invalid client configuration: {0}")]
    InvalidConfig(String),
}

impl LlmApiError {
    /// Worth retrying: rate limiting, server errors, transport failures.
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::Network(_) => true,
            _ => false,
        }
    }
}

impl From<LlmApiError> for DomainError {
    fn from(err: LlmApiError) -> Self {
        DomainError::LlmError(err.to_string())
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAiClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    limiter: Arc<DefaultDirectRateLimiter>,
    retry: RetryConfig,
}

impl OpenAiClient {
    pub fn new(
        config: &LlmConfig,
        rate_limit: &RateLimitConfig,
        retry: &RetryConfig,
    ) -> Result<Self, LlmApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmApiError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: Self::resolve_api_key(config),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            limiter: Arc::new(Self::build_limiter(rate_limit)?),
            retry: retry.clone(),
        })
    }

    /// Inline key first, then the configured environment variable.
    fn resolve_api_key(config: &LlmConfig) -> Option<String> {
        config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty()))
    }

    fn build_limiter(config: &RateLimitConfig) -> Result<DefaultDirectRateLimiter, LlmApiError> {
        let burst = NonZeroU32::new(config.burst_size)
            .ok_or_else(|| LlmApiError::InvalidConfig("burst_size must be at least 1".into()))?;
        if config.requests_per_second <= 0.0 {
            return Err(LlmApiError::InvalidConfig(
                "requests_per_second must be positive".into(),
            ));
        }
        let quota = Quota::with_period(Duration::from_secs_f64(1.0 / config.requests_per_second))
            .ok_or_else(|| LlmApiError::InvalidConfig("rate limit period is zero".into()))?
            .allow_burst(burst);
        Ok(RateLimiter::direct(quota))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send_once(&self, prompt: &str) -> Result<String, LlmApiError> {
        self.limiter.until_ready().await;

        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let mut request = self.http.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| LlmApiError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmApiError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmApiError::InvalidResponse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmApiError::InvalidResponse("response had no message content".into()))
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, prompt: &str) -> DomainResult<String> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.retry.initial_backoff_ms))
            .with_max_interval(Duration::from_millis(self.retry.max_backoff_ms))
            .with_max_elapsed_time(None)
            .build();

        let max_retries = self.retry.max_retries;
        let mut attempt = 0u32;

        let result = backoff::future::retry(policy, || {
            attempt += 1;
            let current = attempt;
            async move {
                match self.send_once(prompt).await {
                    Ok(text) => Ok(text),
                    Err(err) if err.is_transient() && current <= max_retries => {
                        warn!(attempt = current, error = %err, "transient LLM failure, retrying");
                        Err(backoff::Error::transient(err))
                    }
                    Err(err) => Err(backoff::Error::permanent(err)),
                }
            }
        })
        .await;

        match result {
            Ok(text) => {
                debug!(model = %self.model, chars = text.len(), "completion received");
                Ok(text)
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_url: &str) -> LlmConfig {
        LlmConfig {
            base_url: base_url.to_string(),
            api_key: Some("test-key".to_string()),
            ..Default::default()
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
        }
    }

    #[tokio::test]
    async fn test_complete_parses_first_choice() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"billing"}}]}"#)
            .create_async()
            .await;

        let client =
            OpenAiClient::new(&config(&server.url()), &RateLimitConfig::default(), &fast_retry()).unwrap();
        let out = client.complete("classify").await.unwrap();
        assert_eq!(out, "billing");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(503)
            .with_body("overloaded")
            .expect(3)
            .create_async()
            .await;

        let client =
            OpenAiClient::new(&config(&server.url()), &RateLimitConfig::default(), &fast_retry()).unwrap();
        let err = client.complete("classify").await.unwrap_err();
        assert!(matches!(err, DomainError::LlmError(msg) if msg.contains("503")));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_client_errors_are_permanent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(400)
            .with_body("bad request")
            .expect(1)
            .create_async()
            .await;

        let client =
            OpenAiClient::new(&config(&server.url()), &RateLimitConfig::default(), &fast_retry()).unwrap();
        assert!(client.complete("classify").await.is_err());
        mock.assert_async().await;
    }

    #[test]
    fn test_transient_classification() {
        assert!(LlmApiError::Http { status: 429, message: String::new() }.is_transient());
        assert!(LlmApiError::Http { status: 502, message: String::new() }.is_transient());
        assert!(!LlmApiError::Http { status: 401, message: String::new() }.is_transient());
        assert!(LlmApiError::Network("reset".into()).is_transient());
    }

    #[test]
    fn test_zero_burst_is_rejected() {
        let rate = RateLimitConfig {
            requests_per_second: 1.0,
            burst_size: 0,
        };
        assert!(OpenAiClient::new(&LlmConfig::default(), &rate, &fast_retry()).is_err());
    }
}
