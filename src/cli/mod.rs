//! Command-line interface.

pub mod app;
pub mod commands;
pub mod output;
pub mod types;

pub use app::{load_config, App};
pub use types::{Cli, Commands};

use crate::domain::errors::DomainError;

/// Print a command failure and exit non-zero. In JSON mode the error is
/// written to stdout as an object so scripts can parse it.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    let code = match err.downcast_ref::<DomainError>() {
        Some(DomainError::ProjectNotFound(_) | DomainError::ValidationRunNotFound(_)) => 2,
        Some(DomainError::AlreadyRunning(_)) => 3,
        _ => 1,
    };
    if json_mode {
        let body = serde_json::json!({
            "success": false,
            "error": format!("{err:#}"),
        });
        println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("Error: {err:#}");
    }
    std::process::exit(code)
}
