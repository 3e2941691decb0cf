//! Output formatting for CLI commands.
//!
//! Every command builds a serializable output struct and hands it to
//! [`output`], which prints either the human rendering or pretty JSON.

pub mod progress;
pub mod table;

use serde::Serialize;

pub use progress::create_spinner;
pub use table::{list_table, render_list};

pub trait CommandOutput: Serialize {
    fn to_human(&self) -> String;

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub fn output<T: CommandOutput>(result: &T, json_mode: bool) {
    if json_mode {
        println!("{}", serde_json::to_string_pretty(&result.to_json()).unwrap_or_default());
    } else {
        println!("{}", result.to_human());
    }
}

/// Truncate to at most `max_len` characters, appending "..." if truncated.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

/// First line of a multi-line prompt, truncated for table cells.
pub fn first_line(s: &str, max_len: usize) -> String {
    truncate(s.lines().next().unwrap_or_default().trim(), max_len)
}

pub fn percent(value: f64) -> String {
    format!("{:.1}%", value * 100.0)
}
