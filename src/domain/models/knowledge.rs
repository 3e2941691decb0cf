//! Versioned per-project log of optimization rounds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One optimization round. Append-only; only `accuracy_after` is ever
/// written after creation, by the back-fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeRecord {
    pub project_id: String,
    /// Monotonic per project, starting at 1.
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    pub prompt_before: String,
    pub prompt_after: String,
    pub diff: String,
    pub applied_strategies: Vec<String>,
    pub accuracy_before: f64,
    /// Set once the next validation of `prompt_after` completes.
    pub accuracy_after: Option<f64>,
    /// Samples that passed in the previous round and failed in this one.
    pub newly_failed: Vec<usize>,
    /// Every failing sample index at the start of this round.
    pub error_indices: Vec<usize>,
}

/// Fields the caller supplies to `record()`; version and timestamp are
/// assigned by the knowledge base.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordInput {
    pub prompt_before: String,
    pub prompt_after: String,
    pub applied_strategies: Vec<String>,
    pub accuracy_before: f64,
    pub newly_failed: Vec<usize>,
    pub error_indices: Vec<usize>,
}

/// Audit note attached to a round, e.g. "not applied: lost {label}".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeNote {
    pub project_id: String,
    pub version: Option<u32>,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

impl KnowledgeNote {
    pub fn new(project_id: impl Into<String>, version: Option<u32>, note: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            version,
            note: note.into(),
            created_at: Utc::now(),
        }
    }
}

/// Line-level diff rendering used for the `diff` column.
///
/// Lines common to both prompts in order are kept with a two-space prefix,
/// removed lines get `- `, added lines get `+ `.
pub fn line_diff(before: &str, after: &str) -> String {
    let old: Vec<&str> = before.lines().collect();
    let new: Vec<&str> = after.lines().collect();

    // LCS table over lines; prompts are small enough for the quadratic table.
    let mut lcs = vec![vec![0usize; new.len() + 1]; old.len() + 1];
    for i in (0..old.len()).rev() {
        for j in (0..new.len()).rev() {
            lcs[i][j] = if old[i] == new[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < old.len() && j < new.len() {
        if old[i] == new[j] {
            out.push(format!("  {}", old[i]));
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            out.push(format!("- {}", old[i]));
            i += 1;
        } else {
            out.push(format!("+ {}", new[j]));
            j += 1;
        }
    }
    out.extend(old[i..].iter().map(|l| format!("- {l}")));
    out.extend(new[j..].iter().map(|l| format!("+ {l}")));
    out.join("\n")
}
