//! In-memory implementations of every repository port.
//!
//! Used by unit tests and by embedders that do not want SQLite. State lives
//! only as long as the repository value.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AutoIterateState, AutoIterateStatus, KnowledgeNote, KnowledgeRecord, Project, ValidationRun,
    ValidationStatus,
};
use crate::domain::ports::{
    AutoIterateRepository, KnowledgeRepository, ProjectRepository, ValidationRunRepository,
};

#[derive(Debug, Default)]
pub struct InMemoryKnowledgeRepository {
    records: RwLock<HashMap<String, Vec<KnowledgeRecord>>>,
    notes: RwLock<HashMap<String, Vec<KnowledgeNote>>>,
}

impl InMemoryKnowledgeRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KnowledgeRepository for InMemoryKnowledgeRepository {
    async fn append(&self, record: &KnowledgeRecord) -> DomainResult<()> {
        let mut records = self.records.write().await;
        let entries = records.entry(record.project_id.clone()).or_default();
        if entries.iter().any(|r| r.version == record.version) {
            return Err(DomainError::DatabaseError(format!(
                "knowledge record {} v{} already exists",
                record.project_id, record.version
            )));
        }
        entries.push(record.clone());
        entries.sort_by_key(|r| r.version);
        Ok(())
    }

    async fn latest_version(&self, project_id: &str) -> DomainResult<Option<u32>> {
        let records = self.records.read().await;
        Ok(records
            .get(project_id)
            .and_then(|entries| entries.last())
            .map(|r| r.version))
    }

    async fn list(&self, project_id: &str, limit: Option<usize>) -> DomainResult<Vec<KnowledgeRecord>> {
        let records = self.records.read().await;
        let mut out: Vec<KnowledgeRecord> = records
            .get(project_id)
            .map(|entries| entries.iter().rev().cloned().collect())
            .unwrap_or_default();
        if let Some(limit) = limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn backfill_latest_accuracy_after(
        &self,
        project_id: &str,
        accuracy: f64,
    ) -> DomainResult<Option<u32>> {
        let mut records = self.records.write().await;
        let pending = records
            .get_mut(project_id)
            .and_then(|entries| entries.iter_mut().rev().find(|r| r.accuracy_after.is_none()));
        Ok(pending.map(|record| {
            record.accuracy_after = Some(accuracy);
            record.version
        }))
    }

    async fn set_accuracy_after(
        &self,
        project_id: &str,
        version: u32,
        accuracy: f64,
    ) -> DomainResult<bool> {
        let mut records = self.records.write().await;
        let target = records.get_mut(project_id).and_then(|entries| {
            entries
                .iter_mut()
                .find(|r| r.version == version && r.accuracy_after.is_none())
        });
        Ok(target
            .map(|record| record.accuracy_after = Some(accuracy))
            .is_some())
    }

    async fn add_note(&self, note: &KnowledgeNote) -> DomainResult<()> {
        self.notes
            .write()
            .await
            .entry(note.project_id.clone())
            .or_default()
            .push(note.clone());
        Ok(())
    }

    async fn list_notes(&self, project_id: &str) -> DomainResult<Vec<KnowledgeNote>> {
        Ok(self
            .notes
            .read()
            .await
            .get(project_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_project(&self, project_id: &str) -> DomainResult<u64> {
        self.notes.write().await.remove(project_id);
        let removed = self.records.write().await.remove(project_id);
        Ok(removed.map_or(0, |entries| entries.len() as u64))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryAutoIterateRepository {
    states: RwLock<HashMap<String, AutoIterateState>>,
}

impl InMemoryAutoIterateRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AutoIterateRepository for InMemoryAutoIterateRepository {
    async fn save(&self, state: &AutoIterateState) -> DomainResult<()> {
        self.states
            .write()
            .await
            .insert(state.project_id.clone(), state.clone());
        Ok(())
    }

    async fn get(&self, project_id: &str) -> DomainResult<Option<AutoIterateState>> {
        Ok(self.states.read().await.get(project_id).cloned())
    }

    async fn list_by_status(&self, status: AutoIterateStatus) -> DomainResult<Vec<AutoIterateState>> {
        let mut out: Vec<AutoIterateState> = self
            .states
            .read()
            .await
            .values()
            .filter(|s| s.status == status)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.project_id.cmp(&b.project_id));
        Ok(out)
    }

    async fn delete(&self, project_id: &str) -> DomainResult<bool> {
        Ok(self.states.write().await.remove(project_id).is_some())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryValidationRunRepository {
    runs: RwLock<HashMap<String, ValidationRun>>,
}

impl InMemoryValidationRunRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ValidationRunRepository for InMemoryValidationRunRepository {
    async fn create(&self, run: &ValidationRun) -> DomainResult<()> {
        let mut runs = self.runs.write().await;
        if runs.contains_key(&run.id) {
            return Err(DomainError::DatabaseError(format!(
                "validation run {} already exists",
                run.id
            )));
        }
        runs.insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn update(&self, run: &ValidationRun) -> DomainResult<()> {
        let mut runs = self.runs.write().await;
        match runs.get_mut(&run.id) {
            Some(existing) => {
                *existing = run.clone();
                existing.updated_at = Utc::now();
                Ok(())
            }
            None => Err(DomainError::ValidationRunNotFound(run.id.clone())),
        }
    }

    async fn get(&self, id: &str) -> DomainResult<Option<ValidationRun>> {
        Ok(self.runs.read().await.get(id).cloned())
    }

    async fn list_by_project(&self, project_id: &str, limit: usize) -> DomainResult<Vec<ValidationRun>> {
        let mut out: Vec<ValidationRun> = self
            .runs
            .read()
            .await
            .values()
            .filter(|r| r.project_id == project_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out.truncate(limit);
        Ok(out)
    }

    async fn list_by_status(&self, status: ValidationStatus) -> DomainResult<Vec<ValidationRun>> {
        Ok(self
            .runs
            .read()
            .await
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryProjectRepository {
    projects: RwLock<HashMap<String, Project>>,
}

impl InMemoryProjectRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProjectRepository for InMemoryProjectRepository {
    async fn create(&self, project: &Project) -> DomainResult<()> {
        let mut projects = self.projects.write().await;
        if projects.contains_key(&project.id) {
            return Err(DomainError::DatabaseError(format!(
                "project {} already exists",
                project.id
            )));
        }
        projects.insert(project.id.clone(), project.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> DomainResult<Option<Project>> {
        Ok(self.projects.read().await.get(id).cloned())
    }

    async fn update_prompt(&self, id: &str, prompt: &str) -> DomainResult<()> {
        let mut projects = self.projects.write().await;
        let project = projects
            .get_mut(id)
            .ok_or_else(|| DomainError::ProjectNotFound(id.to_string()))?;
        project.prompt = prompt.to_string();
        project.updated_at = Utc::now();
        Ok(())
    }

    async fn list(&self) -> DomainResult<Vec<Project>> {
        let mut out: Vec<Project> = self.projects.read().await.values().cloned().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn delete(&self, id: &str) -> DomainResult<bool> {
        Ok(self.projects.write().await.remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(version: u32) -> KnowledgeRecord {
        KnowledgeRecord {
            project_id: "p".into(),
            version,
            timestamp: Utc::now(),
            prompt_before: "a".into(),
            prompt_after: "b".into(),
            diff: String::new(),
            applied_strategies: vec![],
            accuracy_before: 0.5,
            accuracy_after: None,
            newly_failed: vec![],
            error_indices: vec![],
        }
    }

    #[tokio::test]
    async fn test_backfill_targets_latest_pending() {
        let repo = InMemoryKnowledgeRepository::new();
        repo.append(&record(1)).await.unwrap();
        repo.append(&record(2)).await.unwrap();

        assert_eq!(repo.backfill_latest_accuracy_after("p", 0.9).await.unwrap(), Some(2));
        let history = repo.list("p", None).await.unwrap();
        assert_eq!(history[0].accuracy_after, Some(0.9));
        assert_eq!(history[1].accuracy_after, None);
    }

    #[tokio::test]
    async fn test_duplicate_version_rejected() {
        let repo = InMemoryKnowledgeRepository::new();
        repo.append(&record(1)).await.unwrap();
        assert!(repo.append(&record(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_update_unknown_run_fails() {
        let repo = InMemoryValidationRunRepository::new();
        let run = ValidationRun::new("p", "P", 1);
        assert!(matches!(
            repo.update(&run).await,
            Err(DomainError::ValidationRunNotFound(_))
        ));
    }
}
