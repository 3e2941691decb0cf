//! CLI type definitions
//!
//! Top-level clap structures; each subcommand's arguments live next to its
//! implementation in [`crate::cli::commands`].

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use super::commands::history::HistoryArgs;
use super::commands::iterate::IterateArgs;
use super::commands::project::ProjectArgs;
use super::commands::reset::ResetArgs;
use super::commands::status::StatusArgs;
use super::commands::validate::ValidateArgs;

#[derive(Parser)]
#[command(name = "promptloop")]
#[command(about = "promptloop - iterative prompt optimization against a labelled dataset", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to .promptloop/config.yaml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage projects (prompt plus labelled dataset)
    Project(ProjectArgs),

    /// Validate a prompt over a project's dataset
    Validate(ValidateArgs),

    /// Run the validate/optimize loop in the foreground (Ctrl+C stops it)
    Iterate(IterateArgs),

    /// Show a project's auto-iterate status
    Status(StatusArgs),

    /// Show a project's optimization history
    History(HistoryArgs),

    /// Delete a project's knowledge base and auto-iterate state
    Reset(ResetArgs),
}
