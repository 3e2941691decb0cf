//! Embedded, versioned schema migrations.

use sqlx::SqlitePool;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Failed to execute migration {version}: {source}")]
    ExecutionError { version: i64, #[source] source: sqlx::Error },
    #[error("Failed to get schema version: {0}")]
    VersionCheckError(#[source] sqlx::Error),
}

#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    /// Executed in order inside one transaction.
    pub statements: &'static [&'static str],
}

pub struct Migrator {
    pool: SqlitePool,
}

impl Migrator {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Apply every migration newer than the recorded schema version.
    /// Returns how many were applied.
    pub async fn run_embedded_migrations(&self, migrations: &[Migration]) -> Result<usize, MigrationError> {
        self.ensure_migrations_table().await?;
        let current_version = self.get_current_version().await?;
        let pending: Vec<&Migration> = migrations.iter().filter(|m| m.version > current_version).collect();

        for migration in &pending {
            self.apply_migration(migration).await?;
            info!(version = migration.version, description = migration.description, "applied migration");
        }

        Ok(pending.len())
    }

    async fn ensure_migrations_table(&self) -> Result<(), MigrationError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now')),
                description TEXT
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MigrationError::ExecutionError { version: 0, source: e })?;
        Ok(())
    }

    pub async fn get_current_version(&self) -> Result<i64, MigrationError> {
        let result: Option<(i64,)> = sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
            .fetch_optional(&self.pool)
            .await
            .map_err(MigrationError::VersionCheckError)?;
        Ok(result.map_or(0, |(v,)| v))
    }

    async fn apply_migration(&self, migration: &Migration) -> Result<(), MigrationError> {
        let version = migration.version;
        let wrap = |source| MigrationError::ExecutionError { version, source };

        let mut tx = self.pool.begin().await.map_err(wrap)?;
        for statement in migration.statements {
            sqlx::query(statement).execute(&mut *tx).await.map_err(wrap)?;
        }
        sqlx::query("INSERT INTO schema_migrations (version, description) VALUES (?, ?)")
            .bind(version)
            .bind(migration.description)
            .execute(&mut *tx)
            .await
            .map_err(wrap)?;
        tx.commit().await.map_err(wrap)
    }
}

const KNOWLEDGE_SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS projects (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        prompt TEXT NOT NULL,
        dataset_json TEXT NOT NULL DEFAULT '[]',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS knowledge_records (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        project_id TEXT NOT NULL,
        version INTEGER NOT NULL,
        timestamp TEXT NOT NULL,
        prompt_before TEXT NOT NULL,
        prompt_after TEXT NOT NULL,
        diff TEXT NOT NULL DEFAULT '',
        strategies_json TEXT NOT NULL DEFAULT '[]',
        accuracy_before REAL NOT NULL,
        accuracy_after REAL,
        newly_failed_json TEXT NOT NULL DEFAULT '[]',
        error_indices_json TEXT NOT NULL DEFAULT '[]',
        UNIQUE(project_id, version)
    )",
    "CREATE INDEX IF NOT EXISTS idx_knowledge_records_project ON knowledge_records(project_id, version)",
    "CREATE TABLE IF NOT EXISTS knowledge_notes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        project_id TEXT NOT NULL,
        version INTEGER,
        note TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_knowledge_notes_project ON knowledge_notes(project_id)",
];

const RUN_STATE_SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS auto_iterate_states (
        project_id TEXT PRIMARY KEY,
        status TEXT NOT NULL,
        current_round INTEGER NOT NULL DEFAULT 0,
        max_rounds INTEGER NOT NULL DEFAULT 0,
        target_accuracy REAL NOT NULL DEFAULT 0,
        current_accuracy REAL,
        stop_requested INTEGER NOT NULL DEFAULT 0,
        validation_task_id TEXT,
        message TEXT NOT NULL DEFAULT '',
        updated_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_auto_iterate_states_status ON auto_iterate_states(status)",
    "CREATE TABLE IF NOT EXISTS validation_runs (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL,
        prompt TEXT NOT NULL,
        status TEXT NOT NULL,
        total INTEGER NOT NULL,
        completed INTEGER NOT NULL DEFAULT 0,
        results_json TEXT NOT NULL DEFAULT '[]',
        error TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_validation_runs_project ON validation_runs(project_id, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_validation_runs_status ON validation_runs(status)",
];

pub fn all_embedded_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Projects and knowledge base",
            statements: KNOWLEDGE_SCHEMA,
        },
        Migration {
            version: 2,
            description: "Auto-iterate state and validation runs",
            statements: RUN_STATE_SCHEMA,
        },
    ]
}
