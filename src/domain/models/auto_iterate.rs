//! Auto-iterate controller state and round bookkeeping.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::config::AutoIterateDefaults;
use super::context::StrategyMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoIterateStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Stopped,
    Failed,
    /// Found `Running` in the durable store with no live task after a restart.
    Interrupted,
}

impl AutoIterateStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
            Self::Interrupted => "interrupted",
        }
    }

    pub const fn is_active(self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for AutoIterateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AutoIterateStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "stopped" => Ok(Self::Stopped),
            "failed" => Ok(Self::Failed),
            "interrupted" => Ok(Self::Interrupted),
            other => Err(format!("Unknown auto-iterate status: '{other}'")),
        }
    }
}

/// Per-project controller state, mirrored to durable storage on every mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoIterateState {
    pub project_id: String,
    pub status: AutoIterateStatus,
    pub current_round: u32,
    pub max_rounds: u32,
    pub target_accuracy: f64,
    pub current_accuracy: Option<f64>,
    pub stop_requested: bool,
    pub validation_task_id: Option<String>,
    pub message: String,
    pub updated_at: DateTime<Utc>,
}

impl AutoIterateState {
    pub fn new(project_id: impl Into<String>, config: &AutoIterateConfig) -> Self {
        Self {
            project_id: project_id.into(),
            status: AutoIterateStatus::Running,
            current_round: 0,
            max_rounds: config.max_rounds,
            target_accuracy: config.target_accuracy,
            current_accuracy: None,
            stop_requested: false,
            validation_task_id: None,
            message: "starting".to_string(),
            updated_at: Utc::now(),
        }
    }

    pub fn idle(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            status: AutoIterateStatus::Idle,
            current_round: 0,
            max_rounds: 0,
            target_accuracy: 0.0,
            current_accuracy: None,
            stop_requested: false,
            validation_task_id: None,
            message: String::new(),
            updated_at: Utc::now(),
        }
    }

    /// Move to a terminal status with a human-readable message.
    pub fn finish(&mut self, status: AutoIterateStatus, message: impl Into<String>) {
        self.status = status;
        self.message = message.into();
        self.validation_task_id = None;
        self.updated_at = Utc::now();
    }

    pub fn touch(&mut self, message: impl Into<String>) {
        self.message = message.into();
        self.updated_at = Utc::now();
    }
}

/// Parameters of one auto-iterate run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoIterateConfig {
    pub max_rounds: u32,
    pub target_accuracy: f64,
    pub strategy_mode: StrategyMode,
    pub max_strategies: usize,
    pub module_filter: Option<Vec<String>>,
}

impl From<&AutoIterateDefaults> for AutoIterateConfig {
    fn from(defaults: &AutoIterateDefaults) -> Self {
        Self {
            max_rounds: defaults.max_rounds,
            target_accuracy: defaults.target_accuracy,
            strategy_mode: defaults.strategy_mode,
            max_strategies: defaults.max_strategies,
            module_filter: None,
        }
    }
}

impl Default for AutoIterateConfig {
    fn default() -> Self {
        Self::from(&AutoIterateDefaults::default())
    }
}

/// Samples that passed last round and fail now. Empty when there is no
/// previous round.
pub fn regression_set(previous_success: &BTreeSet<usize>, current_error: &BTreeSet<usize>) -> Vec<usize> {
    previous_success.intersection(current_error).copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regression_set() {
        let prev: BTreeSet<usize> = [1, 2, 3].into_iter().collect();
        let cur: BTreeSet<usize> = [2, 4].into_iter().collect();
        assert_eq!(regression_set(&prev, &cur), vec![2]);
        assert!(regression_set(&BTreeSet::new(), &cur).is_empty());
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            AutoIterateStatus::Idle,
            AutoIterateStatus::Running,
            AutoIterateStatus::Completed,
            AutoIterateStatus::Stopped,
            AutoIterateStatus::Failed,
            AutoIterateStatus::Interrupted,
        ] {
            assert_eq!(status.as_str().parse::<AutoIterateStatus>(), Ok(status));
        }
    }

    #[test]
    fn test_finish_clears_validation_task() {
        let mut state = AutoIterateState::new("p", &AutoIterateConfig::default());
        state.validation_task_id = Some("v1".into());
        state.finish(AutoIterateStatus::Completed, "target reached");
        assert_eq!(state.status, AutoIterateStatus::Completed);
        assert!(state.validation_task_id.is_none());
        assert_eq!(state.message, "target reached");
    }
}
