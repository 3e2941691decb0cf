//! Prompt optimization orchestrator.
//!
//! One `optimize()` call walks a fixed sequence of states over a single
//! [`OptimizationContext`]:
//!
//! ```text
//! Diagnosing → AnalyzingIntent → AdvancedDiagnosis → FilteringSamples →
//! MatchingStrategies → GeneratingCandidates → SelectingBest →
//! InjectingPersistentKnowledge → RecordingKnowledge → Validating →
//! UpdatingHistory → Done
//! ```
//!
//! Every state entry checks the stop predicate first. Once it fires the pass
//! ends in `Stopped` with whatever was gathered so far. Model failures inside
//! a phase are logged and the phase contributes nothing; they never abort
//! the pass.

use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use crate::domain::errors::{Cancelled, DomainError, DomainResult};
use crate::domain::models::{
    format_error_records, Candidate, DiagnosisReport, ErrorRecord, OptimizationContext,
    OptimizationResult, OptimizeRequest, PipelineConfig, PipelineState, RecordInput,
    StrategyMode,
};
use crate::domain::ports::{Diagnoser, LlmClient, StrategyInput, Verifier};

use super::cancellation::{gather_fan_out, run_cancellable, TaskOutcome};
use super::candidate_generator::CandidateGenerator;
use super::concurrency::ConcurrencyController;
use super::diagnosis::HeuristicDiagnoser;
use super::diff_patch::{DIVIDER_MARKER, REPLACE_MARKER, SEARCH_MARKER};
use super::knowledge_base::KnowledgeBase;
use super::prompt_validator::PromptValidator;
use super::strategies::StrategyRegistry;
use super::strategy_matcher::StrategyMatcher;
use super::toolkit::StrategyToolkit;

pub struct PromptOptimizer {
    llm: Arc<dyn LlmClient>,
    verifier: Option<Arc<dyn Verifier>>,
    diagnoser: Arc<dyn Diagnoser>,
    matcher: StrategyMatcher,
    generator: CandidateGenerator,
    validator: PromptValidator,
    knowledge: KnowledgeBase,
    controller: ConcurrencyController,
    config: PipelineConfig,
}

impl PromptOptimizer {
    pub fn new(llm: Arc<dyn LlmClient>, knowledge: KnowledgeBase, config: PipelineConfig) -> Self {
        Self {
            llm,
            verifier: None,
            diagnoser: Arc::new(HeuristicDiagnoser::new()),
            matcher: StrategyMatcher::new(StrategyRegistry::with_builtins(), config.llm_rerank),
            generator: CandidateGenerator::new(config.necessity_check, config.necessity_threshold),
            validator: PromptValidator::new(config.max_prompt_growth),
            knowledge,
            controller: ConcurrencyController::new(config.max_concurrency, config.poll_interval()),
            config,
        }
    }

    /// Enables rapid candidate scoring.
    #[must_use]
    pub fn with_verifier(mut self, verifier: Arc<dyn Verifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    #[must_use]
    pub fn with_diagnoser(mut self, diagnoser: Arc<dyn Diagnoser>) -> Self {
        self.diagnoser = diagnoser;
        self
    }

    #[must_use]
    pub fn with_registry(mut self, registry: StrategyRegistry) -> Self {
        self.matcher = StrategyMatcher::new(registry, self.config.llm_rerank);
        self
    }

    /// Share a concurrency gate with other model-call sites.
    #[must_use]
    pub fn with_controller(mut self, controller: ConcurrencyController) -> Self {
        self.controller = controller;
        self
    }

    pub const fn knowledge(&self) -> &KnowledgeBase {
        &self.knowledge
    }

    pub const fn controller(&self) -> &ConcurrencyController {
        &self.controller
    }

    /// Run one optimization pass.
    ///
    /// Only failures that leave nothing sensible to report (a crashed worker
    /// thread) come back as `Err`. Stops, empty inputs and rejected rewrites
    /// are terminal states of the returned result.
    #[instrument(skip(self, request), fields(project_id = %request.project_id, mode = %request.strategy_mode))]
    pub async fn optimize(&self, request: OptimizeRequest) -> DomainResult<OptimizationResult> {
        let mut ctx = OptimizationContext::from_request(request);

        if ctx.errors.is_empty() {
            finish(&mut ctx, PipelineState::NoErrors, "no failing samples, nothing to optimize");
            return Ok(ctx.into_result());
        }

        let toolkit = StrategyToolkit::new(
            self.llm.clone(),
            self.controller.clone(),
            ctx.should_stop.clone(),
        );

        match self.run_phases(&mut ctx, &toolkit).await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => self.halt(&mut ctx).await,
            Err(e) => {
                error!(state = %ctx.state, error = %e, "optimization aborted");
                return Err(e);
            }
        }

        info!(state = %ctx.state, message = %ctx.message, "optimization finished");
        Ok(ctx.into_result())
    }

    async fn run_phases(&self, ctx: &mut OptimizationContext, toolkit: &StrategyToolkit) -> DomainResult<()> {
        enter(ctx, PipelineState::Diagnosing)?;
        self.diagnose(ctx).await?;

        enter(ctx, PipelineState::AnalyzingIntent)?;
        if self.config.enable_intent_analysis {
            self.analyze_intent(ctx, toolkit).await?;
        }

        enter(ctx, PipelineState::AdvancedDiagnosis)?;
        if self.config.enable_advanced_diagnosis {
            self.advanced_diagnosis(ctx, toolkit).await?;
        }

        enter(ctx, PipelineState::FilteringSamples)?;
        let diagnosis = current_diagnosis(ctx)?.clone();
        ctx.selected_errors = select_error_samples(&ctx.errors, &diagnosis, self.config.max_error_samples);

        enter(ctx, PipelineState::MatchingStrategies)?;
        let strategies = self
            .matcher
            .match_strategies(
                &diagnosis,
                ctx.module_filter.as_deref(),
                ctx.max_strategies,
                toolkit,
            )
            .await?;
        ctx.matched_strategies = strategies.iter().map(|s| s.id().to_string()).collect();
        if strategies.is_empty() {
            finish(
                ctx,
                PipelineState::NoStrategiesMatched,
                "no strategy applies to this diagnosis",
            );
            return Ok(());
        }

        enter(ctx, PipelineState::GeneratingCandidates)?;
        let input = StrategyInput {
            prompt: ctx.prompt.clone(),
            errors: ctx.selected_errors.clone(),
            diagnosis,
            history: ctx.history_text.clone(),
        };
        let generation = self
            .generator
            .generate(ctx.strategy_mode, &strategies, &input, toolkit)
            .await?;
        ctx.candidates = generation.candidates;
        if generation.stopped {
            return Err(Cancelled.into());
        }

        enter(ctx, PipelineState::SelectingBest)?;
        if ctx.candidates.is_empty() {
            finish(
                ctx,
                PipelineState::Done,
                "no strategy produced a change, prompt left as is",
            );
            return Ok(());
        }
        self.select_best(ctx).await?;

        enter(ctx, PipelineState::InjectingPersistentKnowledge)?;
        if self.config.inject_persistent_knowledge && !ctx.persistent_indices.is_empty() {
            self.inject_persistent_knowledge(ctx, toolkit).await?;
        }

        enter(ctx, PipelineState::RecordingKnowledge)?;
        self.record_knowledge(ctx).await;

        enter(ctx, PipelineState::Validating)?;
        self.validate(ctx).await?;

        enter(ctx, PipelineState::UpdatingHistory)?;
        self.update_history(ctx).await;

        let message = match &ctx.verdict {
            Some(v) if !v.passed => format!(
                "rewrite rejected: {}; prompt unchanged",
                v.reason.as_deref().unwrap_or("unknown reason")
            ),
            _ => format!("prompt optimized with {}", ctx.applied_strategies().join(", ")),
        };
        finish(ctx, PipelineState::Done, message);
        Ok(())
    }

    async fn diagnose(&self, ctx: &mut OptimizationContext) -> DomainResult<()> {
        let diagnoser = self.diagnoser.clone();
        let prompt = ctx.prompt.clone();
        let errors = ctx.errors.clone();
        let total = ctx.total_count();
        let mut report = run_cancellable(
            self.controller
                .offload(move || diagnoser.diagnose(&prompt, &errors, total)),
            &ctx.should_stop,
            self.controller.poll_interval(),
        )
        .await?;

        let error_indices: Vec<usize> = ctx.errors.iter().map(|e| e.index).collect();
        match self
            .knowledge
            .persistent_errors(&ctx.project_id, &error_indices)
            .await
        {
            Ok(persistent) => ctx.persistent_indices = persistent,
            Err(e) => warn!(error = %e, "could not load persistent errors"),
        }
        match self.knowledge.get_full_history_text(&ctx.project_id).await {
            Ok(text) => ctx.history_text = text,
            Err(e) => warn!(error = %e, "could not load knowledge history"),
        }

        report.regression_indices = ctx.regression_indices.clone();
        report.persistent_indices = ctx.persistent_indices.clone();
        debug!(
            accuracy = report.accuracy,
            errors = report.error_count,
            regressions = report.regression_indices.len(),
            persistent = report.persistent_indices.len(),
            "diagnosis complete"
        );
        ctx.diagnosis = Some(report);
        Ok(())
    }

    async fn analyze_intent(&self, ctx: &mut OptimizationContext, toolkit: &StrategyToolkit) -> DomainResult<()> {
        let request = format!(
            "Describe in two or three sentences the classification task the prompt below \
             performs and the labels it allows. Point out any ambiguous instruction.\n\n\
             Prompt:\n<prompt>\n{}\n</prompt>",
            ctx.prompt
        );
        if let Some(text) = model_text(toolkit, &request, "intent analysis").await? {
            current_diagnosis_mut(ctx)?.intent_analysis = Some(text);
        }
        Ok(())
    }

    async fn advanced_diagnosis(&self, ctx: &mut OptimizationContext, toolkit: &StrategyToolkit) -> DomainResult<()> {
        let summary = current_diagnosis(ctx)?.summary();
        let sample: Vec<ErrorRecord> = ctx
            .errors
            .iter()
            .take(self.config.max_error_samples)
            .cloned()
            .collect();
        let request = format!(
            "A classification prompt fails on the samples below. Explain briefly the most \
             likely root causes in the prompt's wording.\n\n\
             Prompt:\n<prompt>\n{}\n</prompt>\n\nDiagnosis:\n{summary}\n\nFailing samples:\n{}",
            ctx.prompt,
            format_error_records(&sample)
        );
        if let Some(text) = model_text(toolkit, &request, "advanced diagnosis").await? {
            current_diagnosis_mut(ctx)?.advanced_analysis = Some(text);
        }
        Ok(())
    }

    async fn select_best(&self, ctx: &mut OptimizationContext) -> DomainResult<()> {
        if ctx.strategy_mode == StrategyMode::Parallel && ctx.candidates.len() > 1 {
            if let Some(verifier) = &self.verifier {
                self.score_candidates(ctx, verifier.as_ref()).await?;
            }
        }

        ctx.best = match ctx.strategy_mode {
            StrategyMode::Serial => ctx.candidates.last().cloned(),
            StrategyMode::Parallel => pick_best(&ctx.candidates),
        };
        if let Some(best) = &ctx.best {
            info!(strategy = %best.strategy, score = ?best.score, "selected candidate");
        }
        Ok(())
    }

    /// Score every candidate on the first failing samples: the fraction it fixes.
    async fn score_candidates(&self, ctx: &mut OptimizationContext, verifier: &dyn Verifier) -> DomainResult<()> {
        let samples: Vec<ErrorRecord> = ctx
            .selected_errors
            .iter()
            .take(self.config.scoring_sample_size)
            .cloned()
            .collect();
        if samples.is_empty() {
            return Ok(());
        }

        let stop = ctx.should_stop.clone();
        let tasks: Vec<_> = ctx
            .candidates
            .iter()
            .map(|candidate| {
                let samples = &samples;
                let stop = &stop;
                let prompt = candidate.prompt.clone();
                async move {
                    let mut fixed = 0usize;
                    for sample in samples {
                        let verification = self
                            .controller
                            .call(stop, verifier.verify(&sample.query, &sample.target, &prompt))
                            .await?;
                        if verification.is_correct {
                            fixed += 1;
                        }
                    }
                    Ok::<f64, DomainError>(fixed as f64 / samples.len() as f64)
                }
            })
            .collect();

        let fan_out = gather_fan_out(tasks, &stop, self.controller.poll_interval(), true).await?;
        if fan_out.stopped {
            return Err(Cancelled.into());
        }

        for (candidate, outcome) in ctx.candidates.iter_mut().zip(fan_out.outcomes) {
            match outcome {
                TaskOutcome::Done(score) => candidate.score = Some(score),
                TaskOutcome::Failed(e) => {
                    warn!(strategy = %candidate.strategy, error = %e, "candidate scoring failed");
                }
                TaskOutcome::Cancelled => {}
            }
        }
        Ok(())
    }

    async fn inject_persistent_knowledge(
        &self,
        ctx: &mut OptimizationContext,
        toolkit: &StrategyToolkit,
    ) -> DomainResult<()> {
        let Some(best) = ctx.best.as_ref() else {
            return Ok(());
        };
        let cases: Vec<ErrorRecord> = ctx
            .errors
            .iter()
            .filter(|e| ctx.persistent_indices.contains(&e.index))
            .cloned()
            .collect();
        let request = format!(
            "The samples below have failed in every recent round. Add short, explicit guidance \
             for inputs like them to the prompt without changing anything else.\n\n\
             Prompt:\n<prompt>\n{}\n</prompt>\n\nPersistent failures:\n{}\n\n\
             Reply only with edit blocks in this exact format:\n\
             {SEARCH_MARKER}\n<exact text copied from the prompt>\n{DIVIDER_MARKER}\n<new text>\n{REPLACE_MARKER}",
            best.prompt,
            format_error_records(&cases)
        );

        let Some(reply) = model_text(toolkit, &request, "persistent knowledge injection").await? else {
            return Ok(());
        };
        let source = best.prompt.clone();
        let patched = toolkit.apply_edits(&source, &reply).await?;
        if patched != source {
            info!(cases = cases.len(), "injected guidance for persistent failures");
            if let Some(best) = ctx.best.as_mut() {
                best.prompt = patched;
            }
        }
        Ok(())
    }

    async fn record_knowledge(&self, ctx: &mut OptimizationContext) {
        let (Some(best), Some(diagnosis)) = (&ctx.best, &ctx.diagnosis) else {
            return;
        };
        let input = RecordInput {
            prompt_before: ctx.prompt.clone(),
            prompt_after: best.prompt.clone(),
            applied_strategies: ctx.applied_strategies(),
            accuracy_before: diagnosis.accuracy,
            newly_failed: ctx.regression_indices.clone(),
            error_indices: ctx.errors.iter().map(|e| e.index).collect(),
        };
        match self.knowledge.record(&ctx.project_id, input).await {
            Ok(record) => ctx.knowledge_version = Some(record.version),
            Err(e) => error!(error = %e, "failed to record knowledge"),
        }
    }

    async fn validate(&self, ctx: &mut OptimizationContext) -> DomainResult<()> {
        let Some(best) = &ctx.best else {
            return Ok(());
        };
        let validator = self.validator.clone();
        let original = ctx.prompt.clone();
        let optimized = best.prompt.clone();
        let verdict = self
            .controller
            .offload(move || validator.validate(&original, &optimized))
            .await?;
        if let Some(reason) = &verdict.reason {
            warn!(reason = %reason, "optimized prompt failed validation");
        }
        ctx.verdict = Some(verdict);
        Ok(())
    }

    async fn update_history(&self, ctx: &mut OptimizationContext) {
        let Some(version) = ctx.knowledge_version else {
            return;
        };
        let outcome = match &ctx.verdict {
            Some(v) if !v.passed => {
                let accuracy_before = ctx.diagnosis.as_ref().map_or(0.0, |d| d.accuracy);
                let reason = v.reason.as_deref().unwrap_or("unknown reason");
                self.knowledge
                    .mark_not_applied(&ctx.project_id, version, accuracy_before, reason)
                    .await
            }
            _ => {
                let note = format!("applied: {}", ctx.applied_strategies().join(", "));
                self.knowledge
                    .add_note(&ctx.project_id, Some(version), note)
                    .await
            }
        };
        if let Err(e) = outcome {
            warn!(version, error = %e, "failed to update knowledge history");
        }
    }

    /// Move to `Stopped`. A round already recorded but not yet settled is
    /// marked as not applied so a later back-fill cannot land on it.
    async fn halt(&self, ctx: &mut OptimizationContext) {
        let at = ctx.state;
        if let Some(version) = ctx.knowledge_version {
            let accuracy_before = ctx.diagnosis.as_ref().map_or(0.0, |d| d.accuracy);
            if let Err(e) = self
                .knowledge
                .mark_not_applied(&ctx.project_id, version, accuracy_before, "stopped before validation")
                .await
            {
                warn!(version, error = %e, "failed to settle interrupted round");
            }
        }
        finish(ctx, PipelineState::Stopped, format!("stopped during {at}"));
    }
}

/// Cancellation check on state entry.
fn enter(ctx: &mut OptimizationContext, state: PipelineState) -> DomainResult<()> {
    if ctx.should_stop.is_set() {
        return Err(Cancelled.into());
    }
    ctx.state = state;
    debug!(state = %state, "entering state");
    ctx.on_progress.emit(state, state.as_str());
    Ok(())
}

fn finish(ctx: &mut OptimizationContext, state: PipelineState, message: impl Into<String>) {
    ctx.state = state;
    ctx.message = message.into();
    ctx.on_progress.emit(state, ctx.message.clone());
}

fn current_diagnosis(ctx: &OptimizationContext) -> DomainResult<&DiagnosisReport> {
    ctx.diagnosis
        .as_ref()
        .ok_or_else(|| DomainError::ExecutionFailed("diagnosis missing".to_string()))
}

fn current_diagnosis_mut(ctx: &mut OptimizationContext) -> DomainResult<&mut DiagnosisReport> {
    ctx.diagnosis
        .as_mut()
        .ok_or_else(|| DomainError::ExecutionFailed("diagnosis missing".to_string()))
}

/// Optional model call: failures are logged and yield `None`, a stop propagates.
async fn model_text(toolkit: &StrategyToolkit, request: &str, what: &str) -> DomainResult<Option<String>> {
    match toolkit.complete(request).await {
        Ok(text) if text.trim().is_empty() => {
            debug!(what, "model returned nothing");
            Ok(None)
        }
        Ok(text) => Ok(Some(text.trim().to_string())),
        Err(e) if e.is_cancelled() => Err(e),
        Err(e) => {
            warn!(what, error = %e, "this component produced nothing");
            Ok(None)
        }
    }
}

/// At most `max` failing records: regressions, then persistent failures,
/// then hard cases, then the rest by index.
pub fn select_error_samples(errors: &[ErrorRecord], diagnosis: &DiagnosisReport, max: usize) -> Vec<ErrorRecord> {
    let rank = |e: &ErrorRecord| {
        if diagnosis.regression_indices.contains(&e.index) {
            0
        } else if diagnosis.persistent_indices.contains(&e.index) {
            1
        } else if diagnosis.hard_cases.contains(&e.index) {
            2
        } else {
            3
        }
    };
    let mut ordered: Vec<&ErrorRecord> = errors.iter().collect();
    ordered.sort_by_key(|e| (rank(e), e.index));
    ordered.into_iter().take(max).cloned().collect()
}

/// Highest score wins; ties and unscored candidates keep priority order.
fn pick_best(candidates: &[Candidate]) -> Option<Candidate> {
    let score = |c: &Candidate| c.score.unwrap_or(-1.0);
    let mut best: Option<&Candidate> = None;
    for candidate in candidates {
        match best {
            Some(current) if score(candidate) <= score(current) => {}
            _ => best = Some(candidate),
        }
    }
    best.cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::adapters::llm::mock::{MockReply, ScriptedLlmClient};
    use crate::adapters::memory::InMemoryKnowledgeRepository;
    use crate::domain::models::{ProgressSink, Sample, ShouldStop};
    use crate::domain::ports::Verification;
    use crate::services::strategies::{DiffRewriteStrategy, StrategyKind};

    fn edit(search: &str, replace: &str) -> String {
        format!("{SEARCH_MARKER}\n{search}\n{DIVIDER_MARKER}\n{replace}\n{REPLACE_MARKER}")
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            enable_intent_analysis: false,
            enable_advanced_diagnosis: false,
            llm_rerank: false,
            necessity_check: false,
            ..Default::default()
        }
    }

    fn registry(kinds: &[StrategyKind]) -> StrategyRegistry {
        let mut registry = StrategyRegistry::new();
        for kind in kinds.iter().copied() {
            registry.register(kind.id(), move || Arc::new(DiffRewriteStrategy::new(kind)));
        }
        registry
    }

    fn dataset() -> Vec<Sample> {
        (0..4).map(|i| Sample::new(i, format!("q{i}"), "billing")).collect()
    }

    fn optimizer(llm: ScriptedLlmClient, kinds: &[StrategyKind]) -> PromptOptimizer {
        let kb = KnowledgeBase::new(Arc::new(InMemoryKnowledgeRepository::new()), 3);
        PromptOptimizer::new(Arc::new(llm), kb, config()).with_registry(registry(kinds))
    }

    #[tokio::test]
    async fn test_no_errors_short_circuits() {
        let opt = optimizer(ScriptedLlmClient::new(), &[StrategyKind::InstructionRefinement]);
        let result = opt
            .optimize(OptimizeRequest::new("p", "Classify {query}", vec![]))
            .await
            .unwrap();
        assert_eq!(result.terminal_state, PipelineState::NoErrors);
        assert_eq!(result.optimized_prompt, "Classify {query}");
        assert!(!result.message.is_empty());
    }

    #[tokio::test]
    async fn test_rewrite_is_applied_and_recorded() {
        let llm = ScriptedLlmClient::new().with_rule("Goal:", MockReply::success(edit("Classify", "Carefully classify")));
        let opt = optimizer(llm, &[StrategyKind::InstructionRefinement]);
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink_events = events.clone();
        let request = OptimizeRequest::new(
            "p",
            "Classify {query}",
            vec![ErrorRecord::new(1, "q1", "billing", "shipping")],
        )
        .with_dataset(dataset())
        .with_progress(ProgressSink::new(move |e| sink_events.lock().unwrap().push(e.state)));

        let result = opt.optimize(request).await.unwrap();
        assert_eq!(result.terminal_state, PipelineState::Done);
        assert_eq!(result.optimized_prompt, "Carefully classify {query}");
        assert!(!result.validation_failed);
        assert_eq!(result.applied_strategies, vec!["instruction_refinement".to_string()]);
        assert_eq!(result.knowledge_version, Some(1));

        let history = opt.knowledge().get_history("p", None).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!((history[0].accuracy_before - 0.75).abs() < 1e-9);

        let seen = events.lock().unwrap().clone();
        assert_eq!(seen.first(), Some(&PipelineState::Diagnosing));
        assert_eq!(seen.last(), Some(&PipelineState::Done));
    }

    #[tokio::test]
    async fn test_rejected_rewrite_keeps_prompt_and_settles_record() {
        let llm = ScriptedLlmClient::new().with_rule("Goal:", MockReply::success(edit("Classify {query}", "Classify it")));
        let opt = optimizer(llm, &[StrategyKind::InstructionRefinement]);
        let request = OptimizeRequest::new(
            "p",
            "Classify {query}",
            vec![ErrorRecord::new(1, "q1", "billing", "shipping")],
        )
        .with_dataset(dataset());

        let result = opt.optimize(request).await.unwrap();
        assert!(result.validation_failed);
        assert_eq!(result.optimized_prompt, "Classify {query}");
        assert_eq!(result.failure_reason.as_deref(), Some("lost template variables: {query}"));

        let history = opt.knowledge().get_history("p", None).await.unwrap();
        assert_eq!(history[0].accuracy_after, Some(history[0].accuracy_before));
        let notes = opt.knowledge().notes("p").await.unwrap();
        assert!(notes[0].note.starts_with("not applied"));
    }

    #[tokio::test]
    async fn test_no_change_ends_done_without_record() {
        let llm = ScriptedLlmClient::new().with_default("I have no edits.");
        let opt = optimizer(llm, &[StrategyKind::InstructionRefinement]);
        let request = OptimizeRequest::new("p", "Classify {query}", vec![ErrorRecord::new(1, "q1", "a", "b")]);

        let result = opt.optimize(request).await.unwrap();
        assert_eq!(result.terminal_state, PipelineState::Done);
        assert_eq!(result.optimized_prompt, "Classify {query}");
        assert!(result.knowledge_version.is_none());
        assert!(opt.knowledge().get_history("p", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_applicable_strategy() {
        let opt = optimizer(ScriptedLlmClient::new(), &[StrategyKind::RegressionGuard]);
        let request = OptimizeRequest::new("p", "Classify", vec![ErrorRecord::new(1, "q1", "a", "b")]);
        let result = opt.optimize(request).await.unwrap();
        assert_eq!(result.terminal_state, PipelineState::NoStrategiesMatched);
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let opt = optimizer(ScriptedLlmClient::new(), &[StrategyKind::InstructionRefinement]);
        let request = OptimizeRequest::new("p", "Classify", vec![ErrorRecord::new(1, "q1", "a", "b")])
            .with_should_stop(ShouldStop::new(|| true));
        let result = opt.optimize(request).await.unwrap();
        assert!(result.is_stopped());
        assert_eq!(result.optimized_prompt, "Classify");
    }

    struct PrefersCarefully;

    #[async_trait::async_trait]
    impl Verifier for PrefersCarefully {
        async fn verify(&self, _query: &str, _target: &str, prompt: &str) -> DomainResult<Verification> {
            Ok(Verification {
                output: String::new(),
                is_correct: prompt.contains("carefully"),
                latency_ms: 1,
            })
        }
    }

    #[tokio::test]
    async fn test_scoring_picks_candidate_that_fixes_most() {
        let llm = ScriptedLlmClient::new()
            .with_rule("Sharpen", MockReply::success(edit("Classify", "Quickly classify")))
            .with_rule("examples", MockReply::success(edit("Classify", "Classify carefully")));
        let kb = KnowledgeBase::new(Arc::new(InMemoryKnowledgeRepository::new()), 3);
        let opt = PromptOptimizer::new(Arc::new(llm), kb, config())
            .with_registry(registry(&[StrategyKind::InstructionRefinement, StrategyKind::ExampleInjection]))
            .with_verifier(Arc::new(PrefersCarefully));
        let errors = (0..3).map(|i| ErrorRecord::new(i, format!("q{i}"), "a", "b")).collect();

        let result = opt
            .optimize(OptimizeRequest::new("p", "Classify {query}", errors))
            .await
            .unwrap();
        assert_eq!(result.candidates.len(), 2);
        assert_eq!(result.applied_strategies, vec!["example_injection".to_string()]);
        assert_eq!(result.optimized_prompt, "Classify carefully {query}");
    }

    #[test]
    fn test_select_error_samples_priority() {
        let errors: Vec<ErrorRecord> = (0..5).map(|i| ErrorRecord::new(i, "q", "a", "b")).collect();
        let diagnosis = DiagnosisReport {
            regression_indices: vec![4],
            persistent_indices: vec![3],
            hard_cases: vec![2],
            ..Default::default()
        };
        let picked: Vec<usize> = select_error_samples(&errors, &diagnosis, 4)
            .iter()
            .map(|e| e.index)
            .collect();
        assert_eq!(picked, vec![4, 3, 2, 0]);
    }

    #[test]
    fn test_pick_best_prefers_first_on_tie() {
        let candidates = vec![
            Candidate::new("a", "A", "P").with_score(0.5),
            Candidate::new("b", "B", "P").with_score(0.5),
            Candidate::new("c", "C", "P"),
        ];
        assert_eq!(pick_best(&candidates).unwrap().strategy, "a");
        assert!(pick_best(&[]).is_none());
    }
}
