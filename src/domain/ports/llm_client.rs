//! Language model port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;

/// Opaque text completion capability.
///
/// The wire protocol is an adapter concern; the pipeline only ever sends a
/// prompt and reads back text.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Backend name used in logs.
    fn name(&self) -> &str;

    /// Complete a prompt.
    async fn complete(&self, prompt: &str) -> DomainResult<String>;
}
