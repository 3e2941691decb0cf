//! Wires configuration, storage and services for one CLI invocation.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::adapters::llm::OpenAiClient;
use crate::adapters::sqlite::{
    initialize_from_config, SqliteAutoIterateRepository, SqliteKnowledgeRepository,
    SqliteProjectRepository, SqliteValidationRunRepository,
};
use crate::adapters::verifier::LlmVerifier;
use crate::domain::models::{Config, Project};
use crate::domain::ports::{LlmClient, ProjectRepository, Verifier};
use crate::infrastructure::config::ConfigLoader;
use crate::services::{
    AutoIterateController, ConcurrencyController, KnowledgeBase, PromptOptimizer, ValidationRunner,
};

/// Load configuration from `path`, or from the default locations.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) => ConfigLoader::load_from_file(p),
        None => ConfigLoader::load(),
    }
}

pub struct App {
    pub config: Config,
    pub pool: SqlitePool,
    pub projects: Arc<dyn ProjectRepository>,
    pub knowledge: KnowledgeBase,
    pub validation: ValidationRunner,
    pub auto_iterate: AutoIterateController,
}

impl App {
    /// Open the database and build every service on top of it. All model
    /// calls share one concurrency gate.
    pub async fn open(config: Config) -> Result<Self> {
        let pool = initialize_from_config(&config.database)
            .await
            .with_context(|| format!("Failed to open database at {}", config.database.path))?;
        debug!(path = %config.database.path, "database ready");

        let llm: Arc<dyn LlmClient> = Arc::new(
            OpenAiClient::new(&config.llm, &config.rate_limit, &config.retry)
                .context("Failed to configure model client")?,
        );
        let verifier: Arc<dyn Verifier> = Arc::new(LlmVerifier::new(llm.clone()));
        let controller = ConcurrencyController::new(
            config.pipeline.max_concurrency,
            config.pipeline.poll_interval(),
        );

        let projects: Arc<dyn ProjectRepository> = Arc::new(SqliteProjectRepository::new(pool.clone()));
        let knowledge = KnowledgeBase::new(
            Arc::new(SqliteKnowledgeRepository::new(pool.clone())),
            config.pipeline.persistent_error_window,
        );
        let optimizer = PromptOptimizer::new(llm, knowledge.clone(), config.pipeline.clone())
            .with_verifier(verifier.clone())
            .with_controller(controller.clone());
        let validation = ValidationRunner::new(
            Arc::new(SqliteValidationRunRepository::new(pool.clone())),
            verifier,
            controller,
        );
        let auto_iterate = AutoIterateController::new(
            projects.clone(),
            Arc::new(SqliteAutoIterateRepository::new(pool.clone())),
            Arc::new(optimizer),
            validation.clone(),
        );

        Ok(Self {
            config,
            pool,
            projects,
            knowledge,
            validation,
            auto_iterate,
        })
    }

    /// Settle work a previous process left running. Only commands that
    /// launch work call this, so a read-only command never downgrades a
    /// loop another process still owns.
    pub async fn reconcile(&self) -> Result<()> {
        let interrupted = self
            .auto_iterate
            .reconcile_on_startup()
            .await
            .context("Failed to reconcile interrupted runs")?;
        if interrupted > 0 {
            info!(interrupted, "previous auto-iterate runs marked interrupted");
        }
        Ok(())
    }

    pub async fn project(&self, id: &str) -> Result<Project> {
        self.projects
            .get(id)
            .await?
            .with_context(|| format!("Project not found: {id}"))
    }
}
