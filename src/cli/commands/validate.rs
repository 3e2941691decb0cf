//! Validate command: run a prompt over a project's dataset.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use crate::cli::app::App;
use crate::cli::output::{create_spinner, output, percent, truncate, CommandOutput};
use crate::domain::models::{Config, ShouldStop, ValidationRun};

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Project id
    pub project: String,

    /// Validate this prompt instead of the project's working prompt
    #[arg(long)]
    pub prompt_file: Option<PathBuf>,

    /// Failing samples to list in the report
    #[arg(long, default_value = "10")]
    pub show_errors: usize,
}

#[derive(Debug, serde::Serialize)]
pub struct FailingSample {
    pub index: usize,
    pub query: String,
    pub target: String,
    pub output: String,
}

#[derive(Debug, serde::Serialize)]
pub struct ValidationOutput {
    pub run_id: String,
    pub project_id: String,
    pub status: String,
    pub completed: usize,
    pub total: usize,
    pub accuracy: f64,
    pub error_count: usize,
    pub failing: Vec<FailingSample>,
    pub error: Option<String>,
}

impl ValidationOutput {
    fn new(run: &ValidationRun, failing: Vec<FailingSample>) -> Self {
        Self {
            run_id: run.id.clone(),
            project_id: run.project_id.clone(),
            status: run.status.as_str().to_string(),
            completed: run.completed,
            total: run.total,
            accuracy: run.accuracy(),
            error_count: run.error_indices().len(),
            failing,
            error: run.error.clone(),
        }
    }
}

impl CommandOutput for ValidationOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Validation {} ({})", self.run_id, self.status),
            format!("Project:  {}", self.project_id),
            format!("Samples:  {}/{}", self.completed, self.total),
            format!("Accuracy: {}", percent(self.accuracy)),
            format!("Errors:   {}", self.error_count),
        ];
        if let Some(error) = &self.error {
            lines.push(format!("Failure:  {error}"));
        }
        if !self.failing.is_empty() {
            lines.push(String::new());
            for f in &self.failing {
                lines.push(format!(
                    "  #{:<4} expected {:<16} got {:<16} {}",
                    f.index,
                    truncate(&f.target, 16),
                    truncate(f.output.trim(), 16),
                    truncate(&f.query, 50)
                ));
            }
        }
        lines.join("\n")
    }
}

pub async fn execute(args: ValidateArgs, config: Config, json_mode: bool) -> Result<()> {
    let app = App::open(config).await?;
    app.reconcile().await?;
    let project = app.project(&args.project).await?;

    let prompt = match &args.prompt_file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => project.prompt.clone(),
    };

    let run = app
        .validation
        .start(&project.id, &prompt, project.dataset.clone())
        .await?;
    let spinner = create_spinner(format!("validating {} samples", run.total), json_mode);

    let never = ShouldStop::never();
    let wait = app.validation.wait(&run.id, &never);
    tokio::pin!(wait);
    let mut ticker = tokio::time::interval(app.config.pipeline.poll_interval());
    let mut stopping = false;

    let done = loop {
        tokio::select! {
            result = &mut wait => break result?,
            _ = tokio::signal::ctrl_c(), if !stopping => {
                stopping = true;
                spinner.set_message("stopping, waiting for in-flight samples");
                app.validation.cancel(&run.id).await;
            }
            _ = ticker.tick() => {
                if let Ok(current) = app.validation.get(&run.id).await {
                    spinner.set_message(format!("validated {}/{}", current.completed, current.total));
                }
            }
        }
    };
    spinner.finish_and_clear();

    let failing = done
        .error_records(&project.dataset)
        .into_iter()
        .take(args.show_errors)
        .map(|e| FailingSample {
            index: e.index,
            query: e.query,
            target: e.target,
            output: e.output,
        })
        .collect();
    output(&ValidationOutput::new(&done, failing), json_mode);
    Ok(())
}
