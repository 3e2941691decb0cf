//! Project repository port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::Project;

#[async_trait]
pub trait ProjectRepository: Send + Sync {
    async fn create(&self, project: &Project) -> DomainResult<()>;

    async fn get(&self, id: &str) -> DomainResult<Option<Project>>;

    /// Replace the working prompt and bump `updated_at`.
    async fn update_prompt(&self, id: &str, prompt: &str) -> DomainResult<()>;

    async fn list(&self) -> DomainResult<Vec<Project>>;

    async fn delete(&self, id: &str) -> DomainResult<bool>;
}
