//! Validation runs: a prompt executed against every sample of a dataset.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::sample::{ErrorRecord, Sample};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl ValidationStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValidationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "stopped" => Ok(Self::Stopped),
            other => Err(format!("Unknown validation status: '{other}'")),
        }
    }
}

/// Outcome of verifying one sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleResult {
    pub index: usize,
    pub output: String,
    pub is_correct: bool,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRun {
    pub id: String,
    pub project_id: String,
    pub prompt: String,
    pub status: ValidationStatus,
    pub total: usize,
    pub completed: usize,
    /// Sorted by sample index once the run completes.
    pub results: Vec<SampleResult>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ValidationRun {
    pub fn new(project_id: impl Into<String>, prompt: impl Into<String>, total: usize) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.into(),
            prompt: prompt.into(),
            status: ValidationStatus::Pending,
            total,
            completed: 0,
            results: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Fraction of samples answered correctly; 0 for an empty run.
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.results.iter().filter(|r| r.is_correct).count() as f64 / self.total as f64
    }

    pub fn success_indices(&self) -> BTreeSet<usize> {
        self.results
            .iter()
            .filter(|r| r.is_correct)
            .map(|r| r.index)
            .collect()
    }

    pub fn error_indices(&self) -> BTreeSet<usize> {
        self.results
            .iter()
            .filter(|r| !r.is_correct)
            .map(|r| r.index)
            .collect()
    }

    /// Failing results joined back to their dataset samples.
    pub fn error_records(&self, dataset: &[Sample]) -> Vec<ErrorRecord> {
        self.results
            .iter()
            .filter(|r| !r.is_correct)
            .filter_map(|r| {
                dataset
                    .iter()
                    .find(|s| s.index == r.index)
                    .map(|s| ErrorRecord::from_sample(s, &r.output))
            })
            .collect()
    }

    pub fn progress(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}
