//! Port trait definitions (Hexagonal Architecture)
//!
//! The pipeline depends only on these traits:
//! - LlmClient: opaque `complete(text) -> text` capability
//! - Verifier: single-sample execution used by validation and scoring
//! - Diagnoser: CPU-bound error analysis
//! - Strategy: pluggable prompt rewrite policy
//! - Repositories: durable store for projects, knowledge, auto-iterate
//!   state and validation runs

pub mod auto_iterate_repository;
pub mod diagnoser;
pub mod knowledge_repository;
pub mod llm_client;
pub mod project_repository;
pub mod strategy;
pub mod validation_repository;
pub mod verifier;

pub use auto_iterate_repository::AutoIterateRepository;
pub use diagnoser::Diagnoser;
pub use knowledge_repository::KnowledgeRepository;
pub use llm_client::LlmClient;
pub use project_repository::ProjectRepository;
pub use strategy::{RewriteTools, Strategy, StrategyInput};
pub use validation_repository::ValidationRunRepository;
pub use verifier::{Verification, Verifier};
