//! SQLite implementation of the ValidationRunRepository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ValidationRun, ValidationStatus};
use crate::domain::ports::ValidationRunRepository;

use super::{parse_datetime, parse_json};

#[derive(Clone)]
pub struct SqliteValidationRunRepository {
    pool: SqlitePool,
}

impl SqliteValidationRunRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ValidationRunRow {
    id: String,
    project_id: String,
    prompt: String,
    status: String,
    total: i64,
    completed: i64,
    results_json: String,
    error: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<ValidationRunRow> for ValidationRun {
    type Error = DomainError;

    fn try_from(row: ValidationRunRow) -> Result<Self, Self::Error> {
        let to_usize = |v: i64| usize::try_from(v).map_err(|e| DomainError::SerializationError(e.to_string()));
        Ok(ValidationRun {
            id: row.id,
            project_id: row.project_id,
            prompt: row.prompt,
            status: row.status.parse().map_err(DomainError::SerializationError)?,
            total: to_usize(row.total)?,
            completed: to_usize(row.completed)?,
            results: parse_json(&row.results_json)?,
            error: row.error,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

const RUN_COLUMNS: &str =
    "id, project_id, prompt, status, total, completed, results_json, error, created_at, updated_at";

fn count(v: usize) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

#[async_trait]
impl ValidationRunRepository for SqliteValidationRunRepository {
    async fn create(&self, run: &ValidationRun) -> DomainResult<()> {
        sqlx::query(&format!(
            "INSERT INTO validation_runs ({RUN_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&run.id)
        .bind(&run.project_id)
        .bind(&run.prompt)
        .bind(run.status.as_str())
        .bind(count(run.total))
        .bind(count(run.completed))
        .bind(serde_json::to_string(&run.results)?)
        .bind(&run.error)
        .bind(run.created_at.to_rfc3339())
        .bind(run.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, run: &ValidationRun) -> DomainResult<()> {
        let result = sqlx::query(
            "UPDATE validation_runs
             SET status = ?, completed = ?, results_json = ?, error = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(run.status.as_str())
        .bind(count(run.completed))
        .bind(serde_json::to_string(&run.results)?)
        .bind(&run.error)
        .bind(Utc::now().to_rfc3339())
        .bind(&run.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::ValidationRunNotFound(run.id.clone()));
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> DomainResult<Option<ValidationRun>> {
        let row: Option<ValidationRunRow> =
            sqlx::query_as(&format!("SELECT {RUN_COLUMNS} FROM validation_runs WHERE id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(ValidationRun::try_from).transpose()
    }

    async fn list_by_project(&self, project_id: &str, limit: usize) -> DomainResult<Vec<ValidationRun>> {
        let rows: Vec<ValidationRunRow> = sqlx::query_as(&format!(
            "SELECT {RUN_COLUMNS} FROM validation_runs WHERE project_id = ?
             ORDER BY created_at DESC LIMIT ?"
        ))
        .bind(project_id)
        .bind(count(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ValidationRun::try_from).collect()
    }

    async fn list_by_status(&self, status: ValidationStatus) -> DomainResult<Vec<ValidationRun>> {
        let rows: Vec<ValidationRunRow> = sqlx::query_as(&format!(
            "SELECT {RUN_COLUMNS} FROM validation_runs WHERE status = ? ORDER BY created_at"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ValidationRun::try_from).collect()
    }
}
