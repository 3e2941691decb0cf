//! Strategy port - a pluggable prompt rewrite policy.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{DiagnosisReport, ErrorRecord};

/// Everything a strategy sees about the round it is applied in.
#[derive(Debug, Clone)]
pub struct StrategyInput {
    /// The prompt to rewrite. In serial mode this is the previous strategy's output.
    pub prompt: String,
    pub errors: Vec<ErrorRecord>,
    pub diagnosis: DiagnosisReport,
    /// Rendered knowledge base history, oldest round first.
    pub history: String,
}

/// Model and patch capabilities handed to a strategy.
///
/// Implementations gate model calls behind the shared concurrency limit and
/// honor the round's stop predicate.
#[async_trait]
pub trait RewriteTools: Send + Sync {
    async fn complete(&self, prompt: &str) -> DomainResult<String>;

    /// Apply SEARCH/REPLACE edits found in `model_output` to `text`.
    async fn apply_edits(&self, text: &str, model_output: &str) -> DomainResult<String>;
}

/// A rewrite policy fixed to the capability set {is_applicable, priority, apply}.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Registry id, e.g. `format_enforcement`.
    fn id(&self) -> &str;

    /// One-sentence description of what the strategy addresses. Used by the
    /// necessity check and by model re-ranking.
    fn concern(&self) -> &str;

    fn is_applicable(&self, diagnosis: &DiagnosisReport) -> bool;

    /// Higher runs first.
    fn priority(&self, diagnosis: &DiagnosisReport) -> f64;

    /// Produce a rewritten prompt. Returning the input unchanged means
    /// "no candidate".
    async fn apply(&self, input: &StrategyInput, tools: &dyn RewriteTools) -> DomainResult<String>;
}
