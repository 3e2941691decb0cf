//! Validation run repository port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{ValidationRun, ValidationStatus};

#[async_trait]
pub trait ValidationRunRepository: Send + Sync {
    async fn create(&self, run: &ValidationRun) -> DomainResult<()>;

    /// Overwrite status, progress, results and error of an existing run.
    async fn update(&self, run: &ValidationRun) -> DomainResult<()>;

    async fn get(&self, id: &str) -> DomainResult<Option<ValidationRun>>;

    /// Most recent first.
    async fn list_by_project(&self, project_id: &str, limit: usize) -> DomainResult<Vec<ValidationRun>>;

    async fn list_by_status(&self, status: ValidationStatus) -> DomainResult<Vec<ValidationRun>>;
}
