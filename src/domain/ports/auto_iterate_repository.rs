//! Auto-iterate state repository port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{AutoIterateState, AutoIterateStatus};

/// One row per project, upserted on every state mutation.
#[async_trait]
pub trait AutoIterateRepository: Send + Sync {
    async fn save(&self, state: &AutoIterateState) -> DomainResult<()>;

    async fn get(&self, project_id: &str) -> DomainResult<Option<AutoIterateState>>;

    async fn list_by_status(&self, status: AutoIterateStatus) -> DomainResult<Vec<AutoIterateState>>;

    async fn delete(&self, project_id: &str) -> DomainResult<bool>;
}
