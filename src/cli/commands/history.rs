//! History command: the project's knowledge base, newest round first.

use anyhow::Result;
use clap::Args;

use crate::cli::app::App;
use crate::cli::output::{list_table, output, percent, render_list, truncate, CommandOutput};
use crate::domain::models::{Config, KnowledgeNote, KnowledgeRecord};

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Project id
    pub project: String,

    /// Show at most this many rounds
    #[arg(short, long)]
    pub limit: Option<usize>,

    /// Print the prompt diff of each round
    #[arg(long)]
    pub diff: bool,

    /// Include audit notes
    #[arg(long)]
    pub notes: bool,
}

#[derive(Debug, serde::Serialize)]
pub struct HistoryOutput {
    pub project_id: String,
    pub records: Vec<KnowledgeRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<KnowledgeNote>,
    #[serde(skip)]
    pub show_diff: bool,
}

fn join_indices(indices: &[usize]) -> String {
    if indices.is_empty() {
        return "-".to_string();
    }
    indices
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

impl CommandOutput for HistoryOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["version", "date", "strategies", "before", "after", "newly failed"]);
        for r in &self.records {
            table.add_row(vec![
                r.version.to_string(),
                r.timestamp.format("%Y-%m-%d %H:%M").to_string(),
                truncate(&r.applied_strategies.join(", "), 48),
                percent(r.accuracy_before),
                r.accuracy_after.map_or_else(|| "pending".to_string(), percent),
                truncate(&join_indices(&r.newly_failed), 24),
            ]);
        }
        let mut text = render_list("round", &table, self.records.len());

        if self.show_diff {
            for r in &self.records {
                text.push_str(&format!("\n\n--- version {} ---\n{}", r.version, r.diff));
            }
        }
        if !self.notes.is_empty() {
            text.push_str("\n\nNotes:");
            for n in &self.notes {
                let version = n.version.map_or_else(|| "-".to_string(), |v| format!("v{v}"));
                text.push_str(&format!("\n  [{version}] {}", n.note));
            }
        }
        text
    }
}

pub async fn execute(args: HistoryArgs, config: Config, json_mode: bool) -> Result<()> {
    let app = App::open(config).await?;
    app.project(&args.project).await?;

    let records = app.knowledge.get_history(&args.project, args.limit).await?;
    let notes = if args.notes {
        app.knowledge.notes(&args.project).await?
    } else {
        Vec::new()
    };
    let out = HistoryOutput {
        project_id: args.project,
        records,
        notes,
        show_diff: args.diff,
    };
    output(&out, json_mode);
    Ok(())
}
