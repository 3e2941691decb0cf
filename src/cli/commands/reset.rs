//! Reset command: forget a project's knowledge and loop state.

use anyhow::{bail, Result};
use clap::Args;

use crate::cli::app::App;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;

#[derive(Args, Debug)]
pub struct ResetArgs {
    /// Project id
    pub project: String,

    /// Confirm deletion of every recorded round
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Debug, serde::Serialize)]
pub struct ResetOutput {
    pub project_id: String,
    pub removed_records: u64,
}

impl CommandOutput for ResetOutput {
    fn to_human(&self) -> String {
        format!(
            "Reset {}: removed {} knowledge record(s) and the auto-iterate state",
            self.project_id, self.removed_records
        )
    }
}

pub async fn execute(args: ResetArgs, config: Config, json_mode: bool) -> Result<()> {
    if !args.yes {
        bail!("Refusing to reset {} without --yes", args.project);
    }
    let app = App::open(config).await?;
    app.project(&args.project).await?;

    let removed_records = app.auto_iterate.reset(&args.project).await?;
    output(
        &ResetOutput {
            project_id: args.project,
            removed_records,
        },
        json_mode,
    );
    Ok(())
}
