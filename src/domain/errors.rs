//! Domain errors for the promptloop optimization pipeline.

use thiserror::Error;

/// Marker returned when a unit of work was abandoned because the stop
/// predicate fired. Not a failure: callers translate it into a "stopped"
/// terminal state and keep whatever partial results they hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation stopped by request")]
pub struct Cancelled;

/// Domain-level errors that can occur in the promptloop system.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Validation run not found: {0}")]
    ValidationRunNotFound(String),

    #[error("Strategy not found: {0}")]
    StrategyNotFound(String),

    #[error("Auto-iterate already running for project {0}")]
    AlreadyRunning(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Verifier error: {0}")]
    VerifierError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Stopped: {0}")]
    Cancelled(#[from] Cancelled),
}

impl DomainError {
    /// True when the error is the cooperative stop signal rather than a failure.
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for DomainError {
    fn from(err: tokio::task::JoinError) -> Self {
        DomainError::ExecutionFailed(format!("worker thread failed: {err}"))
    }
}
