//! Append-only, versioned log of optimization rounds per project.
//!
//! Each round appends one [`KnowledgeRecord`]. The only later mutation is the
//! `accuracy_after` back-fill, done once the prompt the round produced has
//! been validated. History is rendered into the next round's rewrite
//! requests so strategies can avoid repeating edits that did not help.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::domain::errors::DomainResult;
use crate::domain::models::{line_diff, KnowledgeNote, KnowledgeRecord, RecordInput};
use crate::domain::ports::KnowledgeRepository;

/// Changed diff lines shown per round in the history text.
const MAX_DIFF_LINES_IN_HISTORY: usize = 12;

#[derive(Clone)]
pub struct KnowledgeBase {
    repo: Arc<dyn KnowledgeRepository>,
    persistent_window: usize,
}

impl KnowledgeBase {
    pub fn new(repo: Arc<dyn KnowledgeRepository>, persistent_window: usize) -> Self {
        Self {
            repo,
            persistent_window: persistent_window.max(2),
        }
    }

    pub fn repository(&self) -> Arc<dyn KnowledgeRepository> {
        self.repo.clone()
    }

    /// Append the next version for `project_id`.
    pub async fn record(&self, project_id: &str, input: RecordInput) -> DomainResult<KnowledgeRecord> {
        let version = self.repo.latest_version(project_id).await?.unwrap_or(0) + 1;
        let record = KnowledgeRecord {
            project_id: project_id.to_string(),
            version,
            timestamp: Utc::now(),
            diff: line_diff(&input.prompt_before, &input.prompt_after),
            prompt_before: input.prompt_before,
            prompt_after: input.prompt_after,
            applied_strategies: input.applied_strategies,
            accuracy_before: input.accuracy_before,
            accuracy_after: None,
            newly_failed: input.newly_failed,
            error_indices: input.error_indices,
        };
        self.repo.append(&record).await?;
        info!(project_id, version, "recorded knowledge");
        Ok(record)
    }

    /// Most recent first.
    pub async fn get_history(&self, project_id: &str, limit: Option<usize>) -> DomainResult<Vec<KnowledgeRecord>> {
        self.repo.list(project_id, limit).await
    }

    /// Every round oldest-first, formatted for inclusion in rewrite requests.
    pub async fn get_full_history_text(&self, project_id: &str) -> DomainResult<String> {
        let mut records = self.repo.list(project_id, None).await?;
        records.reverse();
        Ok(render_history(&records))
    }

    /// Fill `accuracy_after` on the most recent record still lacking it.
    pub async fn backfill_latest_accuracy_after(&self, project_id: &str, accuracy: f64) -> DomainResult<Option<u32>> {
        let version = self
            .repo
            .backfill_latest_accuracy_after(project_id, accuracy)
            .await?;
        match version {
            Some(v) => debug!(project_id, version = v, accuracy, "back-filled accuracy"),
            None => debug!(project_id, "no knowledge record awaiting accuracy"),
        }
        Ok(version)
    }

    /// A round whose prompt was rejected leaves accuracy where it was.
    pub async fn mark_not_applied(
        &self,
        project_id: &str,
        version: u32,
        accuracy_before: f64,
        reason: &str,
    ) -> DomainResult<()> {
        self.repo
            .set_accuracy_after(project_id, version, accuracy_before)
            .await?;
        self.add_note(project_id, Some(version), format!("not applied: {reason}"))
            .await
    }

    pub async fn add_note(&self, project_id: &str, version: Option<u32>, note: impl Into<String>) -> DomainResult<()> {
        self.repo
            .add_note(&KnowledgeNote::new(project_id, version, note))
            .await
    }

    pub async fn notes(&self, project_id: &str) -> DomainResult<Vec<KnowledgeNote>> {
        self.repo.list_notes(project_id).await
    }

    /// Samples in `current_errors` that also failed in each of the previous
    /// `window - 1` recorded rounds.
    pub async fn persistent_errors(&self, project_id: &str, current_errors: &[usize]) -> DomainResult<Vec<usize>> {
        let needed = self.persistent_window - 1;
        let previous = self.repo.list(project_id, Some(needed)).await?;
        if previous.len() < needed {
            return Ok(Vec::new());
        }

        let mut persistent: BTreeSet<usize> = current_errors.iter().copied().collect();
        for record in &previous {
            let failed: BTreeSet<usize> = record.error_indices.iter().copied().collect();
            persistent = persistent.intersection(&failed).copied().collect();
        }
        Ok(persistent.into_iter().collect())
    }

    /// Drop every record and note of a project.
    pub async fn reset(&self, project_id: &str) -> DomainResult<u64> {
        let removed = self.repo.delete_project(project_id).await?;
        info!(project_id, removed, "knowledge base reset");
        Ok(removed)
    }
}

fn render_history(records: &[KnowledgeRecord]) -> String {
    records
        .iter()
        .map(|r| {
            let after = r
                .accuracy_after
                .map_or_else(|| "pending".to_string(), |a| format!("{:.1}%", a * 100.0));
            let mut lines = vec![format!(
                "Round {} ({}): strategies [{}]; accuracy {:.1}% -> {}",
                r.version,
                r.timestamp.format("%Y-%m-%d %H:%M"),
                r.applied_strategies.join(", "),
                r.accuracy_before * 100.0,
                after
            )];
            if !r.newly_failed.is_empty() {
                lines.push(format!("  newly failed: {:?}", r.newly_failed));
            }
            let changes: Vec<&str> = r
                .diff
                .lines()
                .filter(|l| l.starts_with("+ ") || l.starts_with("- "))
                .take(MAX_DIFF_LINES_IN_HISTORY)
                .collect();
            if !changes.is_empty() {
                lines.push("  change:".to_string());
                lines.extend(changes.iter().map(|l| format!("    {l}")));
            }
            lines.join("\n")
        })
        .collect::<Vec<_>>()
        .join("\n")
}
