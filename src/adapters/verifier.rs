//! Verifier backed by a language model.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::{LlmClient, Verification, Verifier};
use crate::services::diagnosis::normalize_label;

const QUERY_PLACEHOLDERS: [&str; 4] = ["{{query}}", "{{input}}", "{query}", "{input}"];

/// Substitute the sample into the prompt, or append it when the prompt has
/// no placeholder.
pub fn render_prompt(prompt: &str, query: &str) -> String {
    let mut rendered = prompt.to_string();
    let mut substituted = false;
    for placeholder in QUERY_PLACEHOLDERS {
        if rendered.contains(placeholder) {
            rendered = rendered.replace(placeholder, query);
            substituted = true;
        }
    }
    if substituted {
        rendered
    } else {
        format!("{}\n\nInput: {query}", prompt.trim_end())
    }
}

/// Runs the prompt through the model and compares the normalized answer
/// with the expected label.
pub struct LlmVerifier {
    llm: Arc<dyn LlmClient>,
}

impl LlmVerifier {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Verifier for LlmVerifier {
    async fn verify(&self, query: &str, target: &str, prompt: &str) -> DomainResult<Verification> {
        let started = Instant::now();
        let output = self
            .llm
            .complete(&render_prompt(prompt, query))
            .await
            .map_err(|e| match e {
                DomainError::LlmError(msg) => DomainError::VerifierError(msg),
                other => other,
            })?;

        let is_correct = normalize_label(&output) == normalize_label(target);
        Ok(Verification {
            output,
            is_correct,
            latency_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }
}
