//! The mutable record threaded through one optimization pass.
//!
//! An [`OptimizationContext`] is created from an [`OptimizeRequest`] at the
//! start of `optimize()`, owned by the orchestrator for the duration of the
//! call, and summarized into an [`OptimizationResult`] at the end. Only the
//! knowledge record outlives it.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::candidate::Candidate;
use super::diagnosis::DiagnosisReport;
use super::sample::{ErrorRecord, Sample};

/// How matched strategies are applied to the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyMode {
    /// Every strategy rewrites the same starting prompt concurrently.
    #[default]
    Parallel,
    /// Strategies are chained, each consuming the previous output.
    Serial,
}

impl StrategyMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Parallel => "parallel",
            Self::Serial => "serial",
        }
    }
}

impl fmt::Display for StrategyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "parallel" => Ok(Self::Parallel),
            "serial" | "chained" => Ok(Self::Serial),
            other => Err(format!("Unknown strategy mode: '{other}'")),
        }
    }
}

/// Orchestrator states, forward states first, terminals last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Diagnosing,
    AnalyzingIntent,
    AdvancedDiagnosis,
    FilteringSamples,
    MatchingStrategies,
    GeneratingCandidates,
    SelectingBest,
    InjectingPersistentKnowledge,
    RecordingKnowledge,
    Validating,
    UpdatingHistory,
    Done,
    Stopped,
    NoStrategiesMatched,
    NoErrors,
}

impl PipelineState {
    /// The fixed forward sequence. No state re-enters.
    pub const FORWARD: [Self; 12] = [
        Self::Diagnosing,
        Self::AnalyzingIntent,
        Self::AdvancedDiagnosis,
        Self::FilteringSamples,
        Self::MatchingStrategies,
        Self::GeneratingCandidates,
        Self::SelectingBest,
        Self::InjectingPersistentKnowledge,
        Self::RecordingKnowledge,
        Self::Validating,
        Self::UpdatingHistory,
        Self::Done,
    ];

    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Done | Self::Stopped | Self::NoStrategiesMatched | Self::NoErrors
        )
    }

    /// Next forward state, `None` from any terminal.
    pub fn next(self) -> Option<Self> {
        if self.is_terminal() {
            return None;
        }
        let pos = Self::FORWARD.iter().position(|s| *s == self)?;
        Self::FORWARD.get(pos + 1).copied()
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Diagnosing => "diagnosing",
            Self::AnalyzingIntent => "analyzing_intent",
            Self::AdvancedDiagnosis => "advanced_diagnosis",
            Self::FilteringSamples => "filtering_samples",
            Self::MatchingStrategies => "matching_strategies",
            Self::GeneratingCandidates => "generating_candidates",
            Self::SelectingBest => "selecting_best",
            Self::InjectingPersistentKnowledge => "injecting_persistent_knowledge",
            Self::RecordingKnowledge => "recording_knowledge",
            Self::Validating => "validating",
            Self::UpdatingHistory => "updating_history",
            Self::Done => "done",
            Self::Stopped => "stopped",
            Self::NoStrategiesMatched => "no_strategies_matched",
            Self::NoErrors => "no_errors",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type StopFn = dyn Fn() -> bool + Send + Sync;

/// Externally supplied stop predicate, polled by the cancellation monitor.
///
/// An unarmed predicate (the default) means "never stop": work wrapped with
/// it runs unmodified.
#[derive(Clone, Default)]
pub struct ShouldStop(Option<Arc<StopFn>>);

impl ShouldStop {
    pub const fn never() -> Self {
        Self(None)
    }

    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Self(Some(Arc::new(predicate)))
    }

    /// Predicate backed by a shared flag, the form the auto-iterate loop uses.
    pub fn from_flag(flag: Arc<AtomicBool>) -> Self {
        Self::new(move || flag.load(Ordering::Acquire))
    }

    pub const fn is_armed(&self) -> bool {
        self.0.is_some()
    }

    pub fn is_set(&self) -> bool {
        self.0.as_ref().is_some_and(|f| f())
    }
}

impl fmt::Debug for ShouldStop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ShouldStop")
            .field(&if self.is_armed() { "armed" } else { "never" })
            .finish()
    }
}

/// A progress notification emitted at every state entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub state: PipelineState,
    pub message: String,
}

type ProgressFn = dyn Fn(ProgressEvent) + Send + Sync;

/// Externally supplied progress callback; a no-op when unset.
#[derive(Clone, Default)]
pub struct ProgressSink(Option<Arc<ProgressFn>>);

impl ProgressSink {
    pub const fn none() -> Self {
        Self(None)
    }

    pub fn new<F>(sink: F) -> Self
    where
        F: Fn(ProgressEvent) + Send + Sync + 'static,
    {
        Self(Some(Arc::new(sink)))
    }

    pub fn emit(&self, state: PipelineState, message: impl Into<String>) {
        if let Some(sink) = &self.0 {
            sink(ProgressEvent {
                state,
                message: message.into(),
            });
        }
    }
}

impl fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ProgressSink")
            .field(&if self.0.is_some() { "set" } else { "none" })
            .finish()
    }
}

/// Outcome of the post-hoc prompt check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptVerdict {
    pub passed: bool,
    pub reason: Option<String>,
}

impl PromptVerdict {
    pub const fn pass() -> Self {
        Self {
            passed: true,
            reason: None,
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Inputs of one `optimize()` call.
#[derive(Debug, Clone)]
pub struct OptimizeRequest {
    pub project_id: String,
    pub prompt: String,
    pub errors: Vec<ErrorRecord>,
    pub dataset: Vec<Sample>,
    pub strategy_mode: StrategyMode,
    pub max_strategies: usize,
    /// Restrict matching to these strategy ids.
    pub module_filter: Option<Vec<String>>,
    /// Newly failed samples carried over from the previous round.
    pub regression_indices: Vec<usize>,
    pub should_stop: ShouldStop,
    pub on_progress: ProgressSink,
}

impl OptimizeRequest {
    pub fn new(
        project_id: impl Into<String>,
        prompt: impl Into<String>,
        errors: Vec<ErrorRecord>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            prompt: prompt.into(),
            errors,
            dataset: Vec::new(),
            strategy_mode: StrategyMode::Parallel,
            max_strategies: 3,
            module_filter: None,
            regression_indices: Vec::new(),
            should_stop: ShouldStop::never(),
            on_progress: ProgressSink::none(),
        }
    }

    #[must_use]
    pub fn with_dataset(mut self, dataset: Vec<Sample>) -> Self {
        self.dataset = dataset;
        self
    }

    #[must_use]
    pub const fn with_strategy_mode(mut self, mode: StrategyMode) -> Self {
        self.strategy_mode = mode;
        self
    }

    #[must_use]
    pub const fn with_max_strategies(mut self, max: usize) -> Self {
        self.max_strategies = max;
        self
    }

    #[must_use]
    pub fn with_module_filter(mut self, ids: Vec<String>) -> Self {
        self.module_filter = Some(ids);
        self
    }

    #[must_use]
    pub fn with_regressions(mut self, indices: Vec<usize>) -> Self {
        self.regression_indices = indices;
        self
    }

    #[must_use]
    pub fn with_should_stop(mut self, should_stop: ShouldStop) -> Self {
        self.should_stop = should_stop;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.on_progress = sink;
        self
    }
}

/// Single mutable record threaded through the pipeline phases.
#[derive(Debug)]
pub struct OptimizationContext {
    pub project_id: String,
    pub prompt: String,
    pub errors: Vec<ErrorRecord>,
    pub dataset: Vec<Sample>,
    pub strategy_mode: StrategyMode,
    pub max_strategies: usize,
    pub module_filter: Option<Vec<String>>,
    pub regression_indices: Vec<usize>,
    pub should_stop: ShouldStop,
    pub on_progress: ProgressSink,

    pub state: PipelineState,
    pub diagnosis: Option<DiagnosisReport>,
    pub history_text: String,
    pub persistent_indices: Vec<usize>,
    pub selected_errors: Vec<ErrorRecord>,
    pub matched_strategies: Vec<String>,
    pub candidates: Vec<Candidate>,
    pub best: Option<Candidate>,
    pub knowledge_version: Option<u32>,
    pub verdict: Option<PromptVerdict>,
    pub message: String,
}

impl OptimizationContext {
    pub fn from_request(request: OptimizeRequest) -> Self {
        Self {
            project_id: request.project_id,
            prompt: request.prompt,
            errors: request.errors,
            dataset: request.dataset,
            strategy_mode: request.strategy_mode,
            max_strategies: request.max_strategies,
            module_filter: request.module_filter,
            regression_indices: request.regression_indices,
            should_stop: request.should_stop,
            on_progress: request.on_progress,
            state: PipelineState::Diagnosing,
            diagnosis: None,
            history_text: String::new(),
            persistent_indices: Vec::new(),
            selected_errors: Vec::new(),
            matched_strategies: Vec::new(),
            candidates: Vec::new(),
            best: None,
            knowledge_version: None,
            verdict: None,
            message: String::new(),
        }
    }

    /// Dataset size used for accuracy; falls back to the error count.
    pub fn total_count(&self) -> usize {
        self.dataset.len().max(self.errors.len())
    }

    /// Strategies whose candidates made it into the final prompt.
    pub fn applied_strategies(&self) -> Vec<String> {
        match (&self.best, self.strategy_mode) {
            (None, _) => Vec::new(),
            (Some(_), StrategyMode::Serial) => {
                self.candidates.iter().map(|c| c.strategy.clone()).collect()
            }
            (Some(best), StrategyMode::Parallel) => vec![best.strategy.clone()],
        }
    }

    /// Summarize into the caller-facing result. The context is consumed.
    pub fn into_result(self) -> OptimizationResult {
        let applied_strategies = self.applied_strategies();
        let validation_failed = self.verdict.as_ref().is_some_and(|v| !v.passed);
        let failure_reason = self.verdict.as_ref().and_then(|v| v.reason.clone());

        let optimized_prompt = match (&self.best, validation_failed) {
            (Some(best), false) if self.state == PipelineState::Done => best.prompt.clone(),
            _ => self.prompt.clone(),
        };

        OptimizationResult {
            optimized_prompt,
            diagnosis: self.diagnosis,
            applied_strategies,
            validation_failed,
            failure_reason,
            terminal_state: self.state,
            message: self.message,
            candidates: self.candidates,
            knowledge_version: self.knowledge_version,
        }
    }
}

/// What `optimize()` hands back to its caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub optimized_prompt: String,
    pub diagnosis: Option<DiagnosisReport>,
    pub applied_strategies: Vec<String>,
    pub validation_failed: bool,
    pub failure_reason: Option<String>,
    pub terminal_state: PipelineState,
    /// Human-readable account of how the pass ended.
    pub message: String,
    pub candidates: Vec<Candidate>,
    pub knowledge_version: Option<u32>,
}

impl OptimizationResult {
    pub fn is_stopped(&self) -> bool {
        self.terminal_state == PipelineState::Stopped
    }
}
