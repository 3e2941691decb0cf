//! Scripted language model for tests and offline runs.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::LlmClient;

/// One scripted reply.
#[derive(Debug, Clone)]
pub struct MockReply {
    /// Output text
    pub output: String,
    /// Whether to simulate failure
    pub fail: bool,
    /// Error message if failing
    pub error_message: Option<String>,
    /// Simulated latency
    pub delay: Option<Duration>,
}

impl Default for MockReply {
    fn default() -> Self {
        Self {
            output: String::new(),
            fail: false,
            error_message: None,
            delay: None,
        }
    }
}

impl MockReply {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            fail: true,
            error_message: Some(error.into()),
            ..Default::default()
        }
    }

    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Replies are chosen by, in order: the first rule whose needle occurs in
/// the prompt, the next queued reply, the default reply.
#[derive(Debug)]
pub struct ScriptedLlmClient {
    default_reply: MockReply,
    rules: Vec<(String, MockReply)>,
    queue: Mutex<VecDeque<MockReply>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self {
            default_reply: MockReply::default(),
            rules: Vec::new(),
            queue: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_default(mut self, output: impl Into<String>) -> Self {
        self.default_reply = MockReply::success(output);
        self
    }

    #[must_use]
    pub fn with_default_reply(mut self, reply: MockReply) -> Self {
        self.default_reply = reply;
        self
    }

    /// Answer every prompt containing `needle` with `reply`.
    #[must_use]
    pub fn with_rule(mut self, needle: impl Into<String>, reply: MockReply) -> Self {
        self.rules.push((needle.into(), reply));
        self
    }

    /// Queue a one-shot reply for the next prompt no rule claims.
    #[must_use]
    pub fn then_reply(mut self, reply: MockReply) -> Self {
        self.queue.get_mut().push_back(reply);
        self
    }

    /// Every prompt received so far, in call order.
    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }

    async fn pick(&self, prompt: &str) -> MockReply {
        if let Some((_, reply)) = self.rules.iter().find(|(needle, _)| prompt.contains(needle.as_str())) {
            return reply.clone();
        }
        if let Some(reply) = self.queue.lock().await.pop_front() {
            return reply;
        }
        self.default_reply.clone()
    }
}

impl Default for ScriptedLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &str) -> DomainResult<String> {
        self.calls.lock().await.push(prompt.to_string());
        let reply = self.pick(prompt).await;

        if let Some(delay) = reply.delay {
            tokio::time::sleep(delay).await;
        }

        if reply.fail {
            return Err(DomainError::LlmError(
                reply
                    .error_message
                    .unwrap_or_else(|| "scripted failure".to_string()),
            ));
        }
        Ok(reply.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rule_then_queue_then_default() {
        let client = ScriptedLlmClient::new()
            .with_default("default")
            .with_rule("score", MockReply::success("0.9"))
            .then_reply(MockReply::success("first"));

        assert_eq!(client.complete("please score this").await.unwrap(), "0.9");
        assert_eq!(client.complete("anything").await.unwrap(), "first");
        assert_eq!(client.complete("anything").await.unwrap(), "default");
        assert_eq!(client.call_count().await, 3);
    }

    #[tokio::test]
    async fn test_failure_reply() {
        let client = ScriptedLlmClient::new().with_default_reply(MockReply::failure("down"));
        let err = client.complete("x").await.unwrap_err();
        assert!(matches!(err, DomainError::LlmError(msg) if msg == "down"));
    }
}
