//! Turns matched strategies into candidate prompts.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::{debug, info, warn};

use crate::domain::errors::DomainResult;
use crate::domain::models::{Candidate, StrategyMode};
use crate::domain::ports::{Strategy, StrategyInput};

use super::cancellation::{gather_fan_out, TaskOutcome};
use super::toolkit::StrategyToolkit;

/// Candidates of one generation phase. `stopped` means the stop predicate
/// fired; whatever was produced before that is kept.
#[derive(Debug, Default)]
pub struct Generation {
    pub candidates: Vec<Candidate>,
    pub stopped: bool,
}

#[derive(Debug, Clone)]
pub struct CandidateGenerator {
    necessity_check: bool,
    necessity_threshold: f64,
}

impl CandidateGenerator {
    pub const fn new(necessity_check: bool, necessity_threshold: f64) -> Self {
        Self {
            necessity_check,
            necessity_threshold,
        }
    }

    pub async fn generate(
        &self,
        mode: StrategyMode,
        strategies: &[Arc<dyn Strategy>],
        input: &StrategyInput,
        toolkit: &StrategyToolkit,
    ) -> DomainResult<Generation> {
        match mode {
            StrategyMode::Parallel => self.generate_parallel(strategies, input, toolkit).await,
            StrategyMode::Serial => Ok(self.generate_serial(strategies, input, toolkit).await),
        }
    }

    async fn generate_parallel(
        &self,
        strategies: &[Arc<dyn Strategy>],
        input: &StrategyInput,
        toolkit: &StrategyToolkit,
    ) -> DomainResult<Generation> {
        let tasks: Vec<_> = strategies
            .iter()
            .map(|strategy| strategy.apply(input, toolkit))
            .collect();
        let fan_out = gather_fan_out(
            tasks,
            &toolkit.should_stop,
            toolkit.controller.poll_interval(),
            true,
        )
        .await?;

        let mut candidates = Vec::new();
        for (strategy, outcome) in strategies.iter().zip(fan_out.outcomes) {
            match outcome {
                TaskOutcome::Done(prompt) if prompt != input.prompt => {
                    candidates.push(Candidate::new(strategy.id(), prompt, &input.prompt));
                }
                TaskOutcome::Done(_) => {
                    debug!(strategy = strategy.id(), "rewrite left prompt unchanged");
                }
                TaskOutcome::Failed(e) => {
                    warn!(strategy = strategy.id(), error = %e, "no candidate from this strategy");
                }
                TaskOutcome::Cancelled => {
                    debug!(strategy = strategy.id(), "strategy cancelled");
                }
            }
        }

        // Tasks can observe the stop on their own before the shared monitor does.
        let stopped = fan_out.stopped || toolkit.should_stop.is_set();
        info!(
            strategies = strategies.len(),
            candidates = candidates.len(),
            stopped,
            "parallel generation finished"
        );
        Ok(Generation { candidates, stopped })
    }

    async fn generate_serial(
        &self,
        strategies: &[Arc<dyn Strategy>],
        input: &StrategyInput,
        toolkit: &StrategyToolkit,
    ) -> Generation {
        let mut generation = Generation::default();
        let mut current = input.clone();

        for strategy in strategies {
            if toolkit.should_stop.is_set() {
                generation.stopped = true;
                break;
            }

            if self.necessity_check {
                match necessity_score(strategy.as_ref(), &current.prompt, toolkit).await {
                    Ok(score) if score < self.necessity_threshold => {
                        debug!(strategy = strategy.id(), score, "concern already addressed, skipping");
                        continue;
                    }
                    Ok(_) => {}
                    Err(e) if e.is_cancelled() => {
                        generation.stopped = true;
                        break;
                    }
                    Err(e) => {
                        warn!(strategy = strategy.id(), error = %e, "necessity check failed, applying anyway");
                    }
                }
            }

            match strategy.apply(&current, toolkit).await {
                Ok(prompt) if prompt != current.prompt => {
                    generation
                        .candidates
                        .push(Candidate::new(strategy.id(), &prompt, &current.prompt));
                    current.prompt = prompt;
                }
                Ok(_) => debug!(strategy = strategy.id(), "rewrite left prompt unchanged"),
                Err(e) if e.is_cancelled() => {
                    generation.stopped = true;
                    break;
                }
                Err(e) => warn!(strategy = strategy.id(), error = %e, "no candidate from this strategy"),
            }
        }

        info!(
            strategies = strategies.len(),
            candidates = generation.candidates.len(),
            stopped = generation.stopped,
            "serial generation finished"
        );
        generation
    }
}

impl Default for CandidateGenerator {
    fn default() -> Self {
        Self::new(true, 0.7)
    }
}

/// How much `prompt` still needs work on the strategy's concern, 0 to 1.
/// An unparseable reply counts as fully needed.
async fn necessity_score(strategy: &dyn Strategy, prompt: &str, toolkit: &StrategyToolkit) -> DomainResult<f64> {
    let request = format!(
        "Rate how much the prompt below still needs work on this concern:\n{}\n\n\
         Prompt:\n<prompt>\n{prompt}\n</prompt>\n\n\
         Reply with a single number between 0 and 1, where 0 means the concern is fully \
         addressed and 1 means it is not addressed at all.",
        strategy.concern()
    );
    let reply = toolkit.complete(&request).await?;
    Ok(parse_score(&reply).unwrap_or(1.0))
}

fn parse_score(reply: &str) -> Option<f64> {
    static NUMBER: OnceLock<Option<Regex>> = OnceLock::new();
    NUMBER
        .get_or_init(|| Regex::new(r"\d+(?:\.\d+)?|\.\d+").ok())
        .as_ref()?
        .find(reply)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .map(|v| v.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::adapters::llm::mock::{MockReply, ScriptedLlmClient};
    use crate::domain::errors::DomainError;
    use crate::domain::models::{DiagnosisReport, ShouldStop};
    use crate::domain::ports::RewriteTools;
    use crate::services::concurrency::ConcurrencyController;

    /// Appends a fixed suffix, fails, or echoes.
    struct Fixed {
        id: &'static str,
        suffix: Option<&'static str>,
        fail: bool,
    }

    #[async_trait]
    impl Strategy for Fixed {
        fn id(&self) -> &str {
            self.id
        }
        fn concern(&self) -> &str {
            self.id
        }
        fn is_applicable(&self, _: &DiagnosisReport) -> bool {
            true
        }
        fn priority(&self, _: &DiagnosisReport) -> f64 {
            0.5
        }
        async fn apply(&self, input: &StrategyInput, _: &dyn RewriteTools) -> DomainResult<String> {
            if self.fail {
                return Err(DomainError::ExecutionFailed("boom".into()));
            }
            Ok(match self.suffix {
                Some(s) => format!("{}{s}", input.prompt),
                None => input.prompt.clone(),
            })
        }
    }

    fn strategy(id: &'static str, suffix: Option<&'static str>, fail: bool) -> Arc<dyn Strategy> {
        Arc::new(Fixed { id, suffix, fail })
    }

    fn input() -> StrategyInput {
        StrategyInput {
            prompt: "P".into(),
            errors: vec![],
            diagnosis: DiagnosisReport::default(),
            history: String::new(),
        }
    }

    fn toolkit(llm: ScriptedLlmClient) -> StrategyToolkit {
        StrategyToolkit::new(Arc::new(llm), ConcurrencyController::default(), ShouldStop::never())
    }

    #[tokio::test]
    async fn test_parallel_keeps_changed_successes_only() {
        let strategies = vec![
            strategy("a", Some(" A"), false),
            strategy("same", None, false),
            strategy("bad", None, true),
            strategy("b", Some(" B"), false),
        ];
        let out = CandidateGenerator::default()
            .generate(StrategyMode::Parallel, &strategies, &input(), &toolkit(ScriptedLlmClient::new()))
            .await
            .unwrap();

        assert!(!out.stopped);
        let prompts: Vec<_> = out.candidates.iter().map(|c| c.prompt.as_str()).collect();
        assert_eq!(prompts, vec!["P A", "P B"]);
        assert!(out.candidates.iter().all(|c| c.source_prompt == "P"));
    }

    #[tokio::test]
    async fn test_serial_chains_and_survives_failures() {
        let strategies = vec![
            strategy("a", Some(" A"), false),
            strategy("bad", None, true),
            strategy("b", Some(" B"), false),
        ];
        let generator = CandidateGenerator::new(false, 0.7);
        let out = generator
            .generate(StrategyMode::Serial, &strategies, &input(), &toolkit(ScriptedLlmClient::new()))
            .await
            .unwrap();

        assert_eq!(out.candidates.len(), 2);
        assert_eq!(out.candidates[1].source_prompt, "P A");
        assert_eq!(out.candidates[1].prompt, "P A B");
    }

    #[tokio::test]
    async fn test_necessity_check_skips_low_scores() {
        let llm = ScriptedLlmClient::new()
            .with_rule("concern:\na\n", MockReply::success("0.2"))
            .with_rule("concern:\nb\n", MockReply::success("Score: 0.9"));
        let strategies = vec![strategy("a", Some(" A"), false), strategy("b", Some(" B"), false)];
        let out = CandidateGenerator::default()
            .generate(StrategyMode::Serial, &strategies, &input(), &toolkit(llm))
            .await
            .unwrap();

        assert_eq!(out.candidates.len(), 1);
        assert_eq!(out.candidates[0].strategy, "b");
        assert_eq!(out.candidates[0].prompt, "P B");
    }

    #[tokio::test]
    async fn test_necessity_failure_applies_anyway() {
        let llm = ScriptedLlmClient::new().with_default_reply(MockReply::failure("down"));
        let strategies = vec![strategy("a", Some(" A"), false)];
        let out = CandidateGenerator::default()
            .generate(StrategyMode::Serial, &strategies, &input(), &toolkit(llm))
            .await
            .unwrap();
        assert_eq!(out.candidates.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_serial_stops_between_strategies() {
        let llm = ScriptedLlmClient::new()
            .with_default_reply(MockReply::success("1").with_delay(Duration::from_secs(5)));
        let stop = ShouldStop::new(|| true);
        let kit = StrategyToolkit::new(
            Arc::new(llm),
            ConcurrencyController::new(2, Duration::from_millis(10)),
            stop,
        );
        let strategies = vec![strategy("a", Some(" A"), false)];
        let out = CandidateGenerator::default()
            .generate(StrategyMode::Serial, &strategies, &input(), &kit)
            .await
            .unwrap();
        assert!(out.stopped);
        assert!(out.candidates.is_empty());
    }

    #[test]
    fn test_parse_score() {
        assert_eq!(parse_score("0.35"), Some(0.35));
        assert_eq!(parse_score("I'd say 0.8."), Some(0.8));
        assert_eq!(parse_score("7"), Some(1.0));
        assert_eq!(parse_score("no idea"), None);
    }
}
