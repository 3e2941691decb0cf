//! Status command: where a project's auto-iterate loop stands.

use anyhow::Result;
use clap::Args;

use crate::cli::app::App;
use crate::cli::output::{output, percent, CommandOutput};
use crate::domain::models::{AutoIterateState, Config};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Project id
    pub project: String,
}

#[derive(Debug, serde::Serialize)]
pub struct StatusOutput {
    #[serde(flatten)]
    pub state: AutoIterateState,
    /// Rounds recorded in the knowledge base.
    pub recorded_rounds: usize,
}

impl CommandOutput for StatusOutput {
    fn to_human(&self) -> String {
        let s = &self.state;
        let mut lines = vec![format!("Project:  {}", s.project_id), format!("Status:   {}", s.status)];
        if s.max_rounds > 0 {
            lines.push(format!("Round:    {}/{}", s.current_round, s.max_rounds));
            lines.push(format!("Target:   {}", percent(s.target_accuracy)));
        }
        if let Some(accuracy) = s.current_accuracy {
            lines.push(format!("Accuracy: {}", percent(accuracy)));
        }
        if let Some(task) = &s.validation_task_id {
            lines.push(format!("Validation run: {task}"));
        }
        if s.stop_requested {
            lines.push("Stop requested".to_string());
        }
        if !s.message.is_empty() {
            lines.push(format!("Message:  {}", s.message));
        }
        lines.push(format!("Recorded rounds: {}", self.recorded_rounds));
        lines.push(format!("Updated:  {}", s.updated_at.format("%Y-%m-%d %H:%M:%S")));
        lines.join("\n")
    }
}

pub async fn execute(args: StatusArgs, config: Config, json_mode: bool) -> Result<()> {
    let app = App::open(config).await?;
    app.project(&args.project).await?;

    let state = app.auto_iterate.status(&args.project).await?;
    let recorded_rounds = app.knowledge.get_history(&args.project, None).await?.len();
    output(&StatusOutput { state, recorded_rounds }, json_mode);
    Ok(())
}
