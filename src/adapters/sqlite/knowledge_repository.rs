//! SQLite implementation of the KnowledgeRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{KnowledgeNote, KnowledgeRecord};
use crate::domain::ports::KnowledgeRepository;

use super::{parse_datetime, parse_json};

#[derive(Clone)]
pub struct SqliteKnowledgeRepository {
    pool: SqlitePool,
}

impl SqliteKnowledgeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// SQLite row mapping for the `knowledge_records` table.
#[derive(sqlx::FromRow)]
struct KnowledgeRecordRow {
    project_id: String,
    version: i64,
    timestamp: String,
    prompt_before: String,
    prompt_after: String,
    diff: String,
    strategies_json: String,
    accuracy_before: f64,
    accuracy_after: Option<f64>,
    newly_failed_json: String,
    error_indices_json: String,
}

impl TryFrom<KnowledgeRecordRow> for KnowledgeRecord {
    type Error = DomainError;

    fn try_from(row: KnowledgeRecordRow) -> Result<Self, Self::Error> {
        Ok(KnowledgeRecord {
            project_id: row.project_id,
            version: u32::try_from(row.version)
                .map_err(|e| DomainError::SerializationError(e.to_string()))?,
            timestamp: parse_datetime(&row.timestamp)?,
            prompt_before: row.prompt_before,
            prompt_after: row.prompt_after,
            diff: row.diff,
            applied_strategies: parse_json(&row.strategies_json)?,
            accuracy_before: row.accuracy_before,
            accuracy_after: row.accuracy_after,
            newly_failed: parse_json(&row.newly_failed_json)?,
            error_indices: parse_json(&row.error_indices_json)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct KnowledgeNoteRow {
    project_id: String,
    version: Option<i64>,
    note: String,
    created_at: String,
}

impl TryFrom<KnowledgeNoteRow> for KnowledgeNote {
    type Error = DomainError;

    fn try_from(row: KnowledgeNoteRow) -> Result<Self, Self::Error> {
        Ok(KnowledgeNote {
            project_id: row.project_id,
            version: row
                .version
                .map(u32::try_from)
                .transpose()
                .map_err(|e| DomainError::SerializationError(e.to_string()))?,
            note: row.note,
            created_at: parse_datetime(&row.created_at)?,
        })
    }
}

const RECORD_COLUMNS: &str = "project_id, version, timestamp, prompt_before, prompt_after, diff, \
     strategies_json, accuracy_before, accuracy_after, newly_failed_json, error_indices_json";

#[async_trait]
impl KnowledgeRepository for SqliteKnowledgeRepository {
    async fn append(&self, record: &KnowledgeRecord) -> DomainResult<()> {
        sqlx::query(&format!(
            "INSERT INTO knowledge_records ({RECORD_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&record.project_id)
        .bind(i64::from(record.version))
        .bind(record.timestamp.to_rfc3339())
        .bind(&record.prompt_before)
        .bind(&record.prompt_after)
        .bind(&record.diff)
        .bind(serde_json::to_string(&record.applied_strategies)?)
        .bind(record.accuracy_before)
        .bind(record.accuracy_after)
        .bind(serde_json::to_string(&record.newly_failed)?)
        .bind(serde_json::to_string(&record.error_indices)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_version(&self, project_id: &str) -> DomainResult<Option<u32>> {
        let row: (Option<i64>,) =
            sqlx::query_as("SELECT MAX(version) FROM knowledge_records WHERE project_id = ?")
                .bind(project_id)
                .fetch_one(&self.pool)
                .await?;
        row.0
            .map(u32::try_from)
            .transpose()
            .map_err(|e| DomainError::SerializationError(e.to_string()))
    }

    async fn list(&self, project_id: &str, limit: Option<usize>) -> DomainResult<Vec<KnowledgeRecord>> {
        // SQLite treats LIMIT -1 as unbounded.
        let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
        let rows: Vec<KnowledgeRecordRow> = sqlx::query_as(&format!(
            "SELECT {RECORD_COLUMNS} FROM knowledge_records WHERE project_id = ? \
             ORDER BY version DESC LIMIT ?"
        ))
        .bind(project_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(KnowledgeRecord::try_from).collect()
    }

    async fn backfill_latest_accuracy_after(
        &self,
        project_id: &str,
        accuracy: f64,
    ) -> DomainResult<Option<u32>> {
        let row: Option<(i64,)> = sqlx::query_as(
            "UPDATE knowledge_records SET accuracy_after = ?
             WHERE id = (
                 SELECT id FROM knowledge_records
                 WHERE project_id = ? AND accuracy_after IS NULL
                 ORDER BY version DESC LIMIT 1
             )
             RETURNING version",
        )
        .bind(accuracy)
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(v,)| u32::try_from(v))
            .transpose()
            .map_err(|e| DomainError::SerializationError(e.to_string()))
    }

    async fn set_accuracy_after(
        &self,
        project_id: &str,
        version: u32,
        accuracy: f64,
    ) -> DomainResult<bool> {
        let result = sqlx::query(
            "UPDATE knowledge_records SET accuracy_after = ?
             WHERE project_id = ? AND version = ? AND accuracy_after IS NULL",
        )
        .bind(accuracy)
        .bind(project_id)
        .bind(i64::from(version))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn add_note(&self, note: &KnowledgeNote) -> DomainResult<()> {
        sqlx::query(
            "INSERT INTO knowledge_notes (project_id, version, note, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&note.project_id)
        .bind(note.version.map(i64::from))
        .bind(&note.note)
        .bind(note.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_notes(&self, project_id: &str) -> DomainResult<Vec<KnowledgeNote>> {
        let rows: Vec<KnowledgeNoteRow> = sqlx::query_as(
            "SELECT project_id, version, note, created_at FROM knowledge_notes
             WHERE project_id = ? ORDER BY id ASC",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(KnowledgeNote::try_from).collect()
    }

    async fn delete_project(&self, project_id: &str) -> DomainResult<u64> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM knowledge_notes WHERE project_id = ?")
            .bind(project_id)
            .execute(&mut *tx)
            .await?;
        let removed = sqlx::query("DELETE FROM knowledge_records WHERE project_id = ?")
            .bind(project_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(removed)
    }
}
