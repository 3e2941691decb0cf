//! Built-in rewrite strategies and the id → constructor registry.
//!
//! Every built-in strategy asks the model for SEARCH/REPLACE edits against the
//! current prompt and applies them through the diff-patch engine. They differ
//! in when they apply, how urgently, and which failing samples and
//! instructions they put in front of the model.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::diagnosis::{
    CATEGORY_EMPTY_OUTPUT, CATEGORY_FORMAT_MISMATCH, CATEGORY_LABEL_CONFUSION,
};
use crate::domain::models::{format_error_records, DiagnosisReport, ErrorRecord};
use crate::domain::ports::{RewriteTools, Strategy, StrategyInput};

use super::diff_patch::{DIVIDER_MARKER, REPLACE_MARKER, SEARCH_MARKER};

/// Failing samples shown to the model per rewrite request.
const MAX_SAMPLES_IN_REQUEST: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    InstructionRefinement,
    BoundaryClarification,
    FormatEnforcement,
    ExampleInjection,
    RegressionGuard,
    PersistentErrorFocus,
}

impl StrategyKind {
    pub const ALL: [Self; 6] = [
        Self::InstructionRefinement,
        Self::BoundaryClarification,
        Self::FormatEnforcement,
        Self::ExampleInjection,
        Self::RegressionGuard,
        Self::PersistentErrorFocus,
    ];

    pub const fn id(self) -> &'static str {
        match self {
            Self::InstructionRefinement => "instruction_refinement",
            Self::BoundaryClarification => "boundary_clarification",
            Self::FormatEnforcement => "format_enforcement",
            Self::ExampleInjection => "example_injection",
            Self::RegressionGuard => "regression_guard",
            Self::PersistentErrorFocus => "persistent_error_focus",
        }
    }

    pub const fn concern(self) -> &'static str {
        match self {
            Self::InstructionRefinement => {
                "The task instructions are specific, unambiguous and complete."
            }
            Self::BoundaryClarification => {
                "The prompt explains how to tell apart labels that are easily confused."
            }
            Self::FormatEnforcement => {
                "The prompt forces the answer to be exactly one label with no extra text."
            }
            Self::ExampleInjection => {
                "The prompt contains representative examples of hard inputs and their labels."
            }
            Self::RegressionGuard => {
                "The prompt still handles inputs that were answered correctly before the last edit."
            }
            Self::PersistentErrorFocus => {
                "The prompt has explicit guidance for inputs that kept failing over several rounds."
            }
        }
    }

    fn instruction(self) -> &'static str {
        match self {
            Self::InstructionRefinement => {
                "Sharpen the task instructions so that the failing samples below would be \
                 answered correctly. Prefer precise wording over longer wording."
            }
            Self::BoundaryClarification => {
                "The model confuses some labels with each other. Add or refine decision rules \
                 that separate the confused labels listed in the diagnosis."
            }
            Self::FormatEnforcement => {
                "The model answers with empty or malformed output. Tighten the output format \
                 requirements so the answer is exactly one of the allowed labels."
            }
            Self::ExampleInjection => {
                "Add a small number of short, representative examples drawn from the failing \
                 samples below, each with its correct label."
            }
            Self::RegressionGuard => {
                "The samples below used to be answered correctly and now fail. Repair the \
                 prompt so they pass again without undoing the other improvements."
            }
            Self::PersistentErrorFocus => {
                "The samples below have failed in every recent round despite earlier edits. \
                 Try a different approach from the ones recorded in the history."
            }
        }
    }

    pub fn is_applicable(self, d: &DiagnosisReport) -> bool {
        if d.error_count == 0 {
            return false;
        }
        match self {
            Self::InstructionRefinement => true,
            Self::BoundaryClarification => d.category_count(CATEGORY_LABEL_CONFUSION) > 0,
            Self::FormatEnforcement => {
                d.category_count(CATEGORY_FORMAT_MISMATCH) + d.category_count(CATEGORY_EMPTY_OUTPUT) > 0
            }
            Self::ExampleInjection => !d.hard_cases.is_empty() || d.error_count >= 3,
            Self::RegressionGuard => !d.regression_indices.is_empty(),
            Self::PersistentErrorFocus => !d.persistent_indices.is_empty(),
        }
    }

    pub fn priority(self, d: &DiagnosisReport) -> f64 {
        let share = |n: usize| {
            if d.error_count == 0 {
                0.0
            } else {
                n as f64 / d.error_count as f64
            }
        };
        match self {
            Self::RegressionGuard => 0.9 + 0.1 * share(d.regression_indices.len()),
            Self::PersistentErrorFocus => 0.8 + 0.1 * share(d.persistent_indices.len()),
            Self::FormatEnforcement => {
                0.5 + 0.5
                    * share(
                        d.category_count(CATEGORY_FORMAT_MISMATCH)
                            + d.category_count(CATEGORY_EMPTY_OUTPUT),
                    )
            }
            Self::BoundaryClarification => 0.5 + 0.4 * d.top_confusion_share(),
            Self::InstructionRefinement => 0.4 + 0.3 * (1.0 - d.accuracy),
            Self::ExampleInjection => 0.3 + 0.3 * share(d.hard_cases.len()),
        }
    }

    /// Failing records this strategy puts in front of the model.
    fn focus<'a>(self, input: &'a StrategyInput) -> Vec<&'a ErrorRecord> {
        let pick = |indices: &[usize]| -> Vec<&'a ErrorRecord> {
            input
                .errors
                .iter()
                .filter(|e| indices.contains(&e.index))
                .collect()
        };
        let focused = match self {
            Self::RegressionGuard => pick(&input.diagnosis.regression_indices),
            Self::PersistentErrorFocus => pick(&input.diagnosis.persistent_indices),
            Self::ExampleInjection => pick(&input.diagnosis.hard_cases),
            _ => Vec::new(),
        };
        let mut records = if focused.is_empty() {
            input.errors.iter().collect()
        } else {
            focused
        };
        records.truncate(MAX_SAMPLES_IN_REQUEST);
        records
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.id() == s)
            .ok_or_else(|| DomainError::StrategyNotFound(s.to_string()))
    }
}

/// Build the rewrite request sent to the model.
pub fn build_rewrite_request(kind: StrategyKind, input: &StrategyInput) -> String {
    let samples: Vec<ErrorRecord> = kind.focus(input).into_iter().cloned().collect();
    let history = if input.history.trim().is_empty() {
        "(no previous rounds)".to_string()
    } else {
        input.history.clone()
    };

    format!(
        "You are improving a classification prompt.\n\
         Goal: {instruction}\n\n\
         Current prompt:\n<prompt>\n{prompt}\n</prompt>\n\n\
         Diagnosis:\n{diagnosis}\n\n\
         Failing samples:\n{samples}\n\n\
         Previous rounds:\n{history}\n\n\
         Reply only with edit blocks in this exact format, one per change:\n\
         {SEARCH_MARKER}\n<exact text copied from the current prompt>\n{DIVIDER_MARKER}\n<new text>\n{REPLACE_MARKER}\n\n\
         Keep every template variable such as {{query}} exactly as written.",
        instruction = kind.instruction(),
        prompt = input.prompt,
        diagnosis = input.diagnosis.summary(),
        samples = format_error_records(&samples),
    )
}

/// A built-in strategy: one model call for edits, then a local patch.
#[derive(Debug, Clone, Copy)]
pub struct DiffRewriteStrategy {
    kind: StrategyKind,
}

impl DiffRewriteStrategy {
    pub const fn new(kind: StrategyKind) -> Self {
        Self { kind }
    }

    pub const fn kind(&self) -> StrategyKind {
        self.kind
    }
}

#[async_trait]
impl Strategy for DiffRewriteStrategy {
    fn id(&self) -> &str {
        self.kind.id()
    }

    fn concern(&self) -> &str {
        self.kind.concern()
    }

    fn is_applicable(&self, diagnosis: &DiagnosisReport) -> bool {
        self.kind.is_applicable(diagnosis)
    }

    fn priority(&self, diagnosis: &DiagnosisReport) -> f64 {
        self.kind.priority(diagnosis)
    }

    async fn apply(&self, input: &StrategyInput, tools: &dyn RewriteTools) -> DomainResult<String> {
        let request = build_rewrite_request(self.kind, input);
        let reply = tools.complete(&request).await?;
        let rewritten = tools.apply_edits(&input.prompt, &reply).await?;
        debug!(
            strategy = self.kind.id(),
            changed = rewritten != input.prompt,
            "strategy applied"
        );
        Ok(rewritten)
    }
}

type StrategyFactory = Arc<dyn Fn() -> Arc<dyn Strategy> + Send + Sync>;

/// String id → constructor. Built-ins are registered by [`StrategyRegistry::with_builtins`];
/// embedders add their own with [`StrategyRegistry::register`].
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    factories: BTreeMap<String, StrategyFactory>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for kind in StrategyKind::ALL {
            registry.register(kind.id(), move || Arc::new(DiffRewriteStrategy::new(kind)));
        }
        registry
    }

    /// Register or replace a constructor.
    pub fn register<F>(&mut self, id: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn Strategy> + Send + Sync + 'static,
    {
        self.factories.insert(id.into(), Arc::new(factory));
    }

    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn create(&self, id: &str) -> DomainResult<Arc<dyn Strategy>> {
        self.factories
            .get(id)
            .map(|factory| factory())
            .ok_or_else(|| DomainError::StrategyNotFound(id.to_string()))
    }

    /// Instantiate every registered strategy, or only the listed ids.
    pub fn instantiate(&self, filter: Option<&[String]>) -> DomainResult<Vec<Arc<dyn Strategy>>> {
        match filter {
            Some(ids) => ids.iter().map(|id| self.create(id)).collect(),
            None => Ok(self.factories.values().map(|factory| factory()).collect()),
        }
    }
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("ids", &self.ids())
            .finish()
    }
}
