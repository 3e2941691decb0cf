//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use promptloop::domain::models::{PipelineConfig, Sample};
use promptloop::domain::ports::{Verification, Verifier};
use promptloop::services::diff_patch::{DIVIDER_MARKER, REPLACE_MARKER, SEARCH_MARKER};
use promptloop::{DomainError, DomainResult};

/// Initialize tracing for a test; repeated calls are no-ops.
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// One SEARCH/REPLACE block as a model would emit it.
pub fn edit(search: &str, replace: &str) -> String {
    format!("{SEARCH_MARKER}\n{search}\n{DIVIDER_MARKER}\n{replace}\n{REPLACE_MARKER}")
}

/// Pipeline settings with every optional model call switched off.
pub fn quiet_pipeline() -> PipelineConfig {
    PipelineConfig {
        enable_intent_analysis: false,
        enable_advanced_diagnosis: false,
        llm_rerank: false,
        necessity_check: false,
        poll_interval_ms: 20,
        ..Default::default()
    }
}

/// Samples `q0..q{n-1}` all labelled `billing`.
pub fn dataset(n: usize) -> Vec<Sample> {
    (0..n).map(|i| Sample::new(i, format!("q{i}"), "billing")).collect()
}

/// Scores a prompt by the version tag it carries (`v0`, `v1`, ...). Each
/// tag maps to the set of sample indices that fail under it; unknown tags
/// get every sample right.
pub struct VersionedVerifier {
    failing: Vec<(String, BTreeSet<usize>)>,
    delay: Duration,
}

impl VersionedVerifier {
    pub fn new() -> Self {
        Self {
            failing: Vec::new(),
            delay: Duration::ZERO,
        }
    }

    pub fn failing(mut self, tag: &str, indices: &[usize]) -> Self {
        self.failing
            .push((tag.to_string(), indices.iter().copied().collect()));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn shared(self) -> Arc<dyn Verifier> {
        Arc::new(self)
    }
}

#[async_trait]
impl Verifier for VersionedVerifier {
    async fn verify(&self, query: &str, target: &str, prompt: &str) -> DomainResult<Verification> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let index: usize = query
            .trim_start_matches('q')
            .parse()
            .map_err(|_| DomainError::VerifierError(format!("unexpected query {query}")))?;
        let fails = self
            .failing
            .iter()
            .find(|(tag, _)| prompt.contains(tag.as_str()))
            .is_some_and(|(_, set)| set.contains(&index));
        Ok(Verification {
            output: if fails { "shipping".into() } else { target.to_string() },
            is_correct: !fails,
            latency_ms: 1,
        })
    }
}
