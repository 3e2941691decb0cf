//! Service layer: the optimization pipeline and the loops around it.
//!
//! Bottom-up:
//! - cancellation / concurrency: cooperative stop and the shared model-call gate
//! - diff_patch: SEARCH/REPLACE edit application with fuzzy fallbacks
//! - diagnosis, strategies, strategy_matcher, candidate_generator,
//!   prompt_validator, knowledge_base: the pipeline subsystems
//! - toolkit: gated model and patch access handed to strategies
//! - pipeline: the optimization state machine
//! - validation_runner, auto_iterate: background validation and the
//!   multi-round controller

pub mod auto_iterate;
pub mod cancellation;
pub mod candidate_generator;
pub mod concurrency;
pub mod diagnosis;
pub mod diff_patch;
pub mod knowledge_base;
pub mod pipeline;
pub mod prompt_validator;
pub mod strategies;
pub mod strategy_matcher;
pub mod toolkit;
pub mod validation_runner;

pub use auto_iterate::AutoIterateController;
pub use cancellation::{gather_fan_out, run_cancellable, run_with_cancellation, FanOutResult, TaskOutcome};
pub use candidate_generator::{CandidateGenerator, Generation};
pub use concurrency::ConcurrencyController;
pub use diagnosis::HeuristicDiagnoser;
pub use diff_patch::{apply_model_edits, apply_patch, apply_patch_detailed, parse_edits, DiffEdit, MatchKind, PatchReport};
pub use knowledge_base::KnowledgeBase;
pub use pipeline::PromptOptimizer;
pub use prompt_validator::PromptValidator;
pub use strategies::{DiffRewriteStrategy, StrategyKind, StrategyRegistry};
pub use strategy_matcher::StrategyMatcher;
pub use toolkit::StrategyToolkit;
pub use validation_runner::ValidationRunner;
