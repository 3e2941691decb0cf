//! SQLite implementation of the AutoIterateRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AutoIterateState, AutoIterateStatus};
use crate::domain::ports::AutoIterateRepository;

use super::parse_datetime;

#[derive(Clone)]
pub struct SqliteAutoIterateRepository {
    pool: SqlitePool,
}

impl SqliteAutoIterateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct AutoIterateStateRow {
    project_id: String,
    status: String,
    current_round: i64,
    max_rounds: i64,
    target_accuracy: f64,
    current_accuracy: Option<f64>,
    stop_requested: bool,
    validation_task_id: Option<String>,
    message: String,
    updated_at: String,
}

impl TryFrom<AutoIterateStateRow> for AutoIterateState {
    type Error = DomainError;

    fn try_from(row: AutoIterateStateRow) -> Result<Self, Self::Error> {
        let to_u32 = |v: i64| u32::try_from(v).map_err(|e| DomainError::SerializationError(e.to_string()));
        Ok(AutoIterateState {
            project_id: row.project_id,
            status: row.status.parse().map_err(DomainError::SerializationError)?,
            current_round: to_u32(row.current_round)?,
            max_rounds: to_u32(row.max_rounds)?,
            target_accuracy: row.target_accuracy,
            current_accuracy: row.current_accuracy,
            stop_requested: row.stop_requested,
            validation_task_id: row.validation_task_id,
            message: row.message,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

const STATE_COLUMNS: &str = "project_id, status, current_round, max_rounds, target_accuracy, \
     current_accuracy, stop_requested, validation_task_id, message, updated_at";

#[async_trait]
impl AutoIterateRepository for SqliteAutoIterateRepository {
    async fn save(&self, state: &AutoIterateState) -> DomainResult<()> {
        sqlx::query(&format!(
            "INSERT INTO auto_iterate_states ({STATE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(project_id) DO UPDATE SET
                status = excluded.status,
                current_round = excluded.current_round,
                max_rounds = excluded.max_rounds,
                target_accuracy = excluded.target_accuracy,
                current_accuracy = excluded.current_accuracy,
                stop_requested = excluded.stop_requested,
                validation_task_id = excluded.validation_task_id,
                message = excluded.message,
                updated_at = excluded.updated_at"
        ))
        .bind(&state.project_id)
        .bind(state.status.as_str())
        .bind(i64::from(state.current_round))
        .bind(i64::from(state.max_rounds))
        .bind(state.target_accuracy)
        .bind(state.current_accuracy)
        .bind(state.stop_requested)
        .bind(&state.validation_task_id)
        .bind(&state.message)
        .bind(state.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, project_id: &str) -> DomainResult<Option<AutoIterateState>> {
        let row: Option<AutoIterateStateRow> = sqlx::query_as(&format!(
            "SELECT {STATE_COLUMNS} FROM auto_iterate_states WHERE project_id = ?"
        ))
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(AutoIterateState::try_from).transpose()
    }

    async fn list_by_status(&self, status: AutoIterateStatus) -> DomainResult<Vec<AutoIterateState>> {
        let rows: Vec<AutoIterateStateRow> = sqlx::query_as(&format!(
            "SELECT {STATE_COLUMNS} FROM auto_iterate_states WHERE status = ? ORDER BY project_id"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AutoIterateState::try_from).collect()
    }

    async fn delete(&self, project_id: &str) -> DomainResult<bool> {
        let result = sqlx::query("DELETE FROM auto_iterate_states WHERE project_id = ?")
            .bind(project_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
