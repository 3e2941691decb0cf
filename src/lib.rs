//! promptloop - cancellable multi-round prompt optimization
//!
//! promptloop improves a classification prompt against a labelled dataset.
//! Each round validates the prompt, diagnoses the failures, lets a set of
//! rewrite strategies propose diff-patch edits, picks the best candidate,
//! checks it for structural damage and records the round in a versioned
//! knowledge base. Every phase honors a cooperative stop predicate.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, port traits and errors
//! - **Service Layer** (`services`): the pipeline, its subsystems and the
//!   auto-iterate controller
//! - **Adapters** (`adapters`): `SQLite` and in-memory repositories, model
//!   clients and the verifier
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use promptloop::adapters::memory::InMemoryKnowledgeRepository;
//! use promptloop::domain::models::{ErrorRecord, OptimizeRequest, PipelineConfig};
//! use promptloop::services::{KnowledgeBase, PromptOptimizer};
//!
//! let knowledge = KnowledgeBase::new(Arc::new(InMemoryKnowledgeRepository::new()), 3);
//! let optimizer = PromptOptimizer::new(llm, knowledge, PipelineConfig::default());
//! let result = optimizer
//!     .optimize(OptimizeRequest::new("tickets", prompt, errors).with_dataset(dataset))
//!     .await?;
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{Cancelled, DomainError, DomainResult};
pub use domain::models::{
    AutoIterateConfig, AutoIterateState, AutoIterateStatus, Config, DiagnosisReport, ErrorRecord,
    KnowledgeRecord, OptimizationResult, OptimizeRequest, PipelineConfig, PipelineState, Project,
    Sample, ShouldStop, StrategyMode, ValidationRun, ValidationStatus,
};
pub use domain::ports::{
    AutoIterateRepository, Diagnoser, KnowledgeRepository, LlmClient, ProjectRepository, Strategy,
    ValidationRunRepository, Verifier,
};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{
    AutoIterateController, ConcurrencyController, KnowledgeBase, PromptOptimizer, ValidationRunner,
};
