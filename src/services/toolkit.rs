//! Gated model and patch access for strategies and pipeline phases.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::ShouldStop;
use crate::domain::ports::{LlmClient, RewriteTools};

use super::concurrency::ConcurrencyController;
use super::diff_patch;

/// Shared services handed to every strategy application.
///
/// Model calls made through the toolkit take a permit from the shared
/// concurrency gate and honor the stop predicate.
#[derive(Clone)]
pub struct StrategyToolkit {
    pub llm: Arc<dyn LlmClient>,
    pub controller: ConcurrencyController,
    pub should_stop: ShouldStop,
}

impl StrategyToolkit {
    pub fn new(llm: Arc<dyn LlmClient>, controller: ConcurrencyController, should_stop: ShouldStop) -> Self {
        Self {
            llm,
            controller,
            should_stop,
        }
    }

    /// Gated, cancellable model call.
    pub async fn complete(&self, prompt: &str) -> DomainResult<String> {
        self.controller
            .call(&self.should_stop, self.llm.complete(prompt))
            .await
    }

    /// Apply SEARCH/REPLACE edits found in `model_output` to `text` on a worker thread.
    pub async fn apply_edits(&self, text: &str, model_output: &str) -> DomainResult<String> {
        let text = text.to_string();
        let model_output = model_output.to_string();
        self.controller
            .offload(move || diff_patch::apply_model_edits(&text, &model_output))
            .await
    }
}

#[async_trait]
impl RewriteTools for StrategyToolkit {
    async fn complete(&self, prompt: &str) -> DomainResult<String> {
        Self::complete(self, prompt).await
    }

    async fn apply_edits(&self, text: &str, model_output: &str) -> DomainResult<String> {
        Self::apply_edits(self, text, model_output).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::adapters::llm::mock::{MockReply, ScriptedLlmClient};
    use crate::services::diff_patch::{DIVIDER_MARKER, REPLACE_MARKER, SEARCH_MARKER};

    #[tokio::test]
    async fn test_tools_through_trait_object() {
        let reply = format!("{SEARCH_MARKER}\nold\n{DIVIDER_MARKER}\nnew\n{REPLACE_MARKER}");
        let toolkit = StrategyToolkit::new(
            Arc::new(ScriptedLlmClient::new().with_default(reply)),
            ConcurrencyController::default(),
            ShouldStop::never(),
        );
        let tools: &dyn RewriteTools = &toolkit;

        let edits = tools.complete("rewrite").await.unwrap();
        assert_eq!(tools.apply_edits("an old prompt", &edits).await.unwrap(), "an new prompt");
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_honors_stop() {
        let toolkit = StrategyToolkit::new(
            Arc::new(
                ScriptedLlmClient::new()
                    .with_default_reply(MockReply::success("late").with_delay(Duration::from_secs(30))),
            ),
            ConcurrencyController::new(1, Duration::from_millis(10)),
            ShouldStop::new(|| true),
        );
        assert!(toolkit.complete("x").await.unwrap_err().is_cancelled());
    }
}
