//! Knowledge repository port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{KnowledgeNote, KnowledgeRecord};

/// Append-only storage for per-project optimization rounds.
#[async_trait]
pub trait KnowledgeRepository: Send + Sync {
    /// Append a record. Fails if the (project, version) pair already exists.
    async fn append(&self, record: &KnowledgeRecord) -> DomainResult<()>;

    /// Highest recorded version for a project.
    async fn latest_version(&self, project_id: &str) -> DomainResult<Option<u32>>;

    /// Records most-recent-first, optionally limited.
    async fn list(&self, project_id: &str, limit: Option<usize>) -> DomainResult<Vec<KnowledgeRecord>>;

    /// Fill `accuracy_after` on the most recent record where it is unset.
    ///
    /// Returns the version that was updated, `None` when nothing was pending.
    async fn backfill_latest_accuracy_after(
        &self,
        project_id: &str,
        accuracy: f64,
    ) -> DomainResult<Option<u32>>;

    /// Fill `accuracy_after` on a specific version if it is still unset.
    async fn set_accuracy_after(&self, project_id: &str, version: u32, accuracy: f64)
        -> DomainResult<bool>;

    async fn add_note(&self, note: &KnowledgeNote) -> DomainResult<()>;

    /// Notes oldest-first.
    async fn list_notes(&self, project_id: &str) -> DomainResult<Vec<KnowledgeNote>>;

    /// Delete every record and note of a project. Returns the number of records removed.
    async fn delete_project(&self, project_id: &str) -> DomainResult<u64>;
}
