//! Verifier port - runs one sample through a prompt.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::errors::DomainResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    pub output: String,
    pub is_correct: bool,
    pub latency_ms: u64,
}

#[async_trait]
pub trait Verifier: Send + Sync {
    /// Execute `prompt` on `query` and judge the output against `target`.
    async fn verify(&self, query: &str, target: &str, prompt: &str) -> DomainResult<Verification>;
}
