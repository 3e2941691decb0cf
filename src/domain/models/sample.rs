//! Dataset samples, failing records, and the project that owns them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One labelled example of the classification task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    /// Position in the project's dataset; stable across rounds.
    pub index: usize,
    pub query: String,
    pub target: String,
}

impl Sample {
    pub fn new(index: usize, query: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            index,
            query: query.into(),
            target: target.into(),
        }
    }
}

/// A sample the current prompt got wrong, together with what the model said.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub index: usize,
    pub query: String,
    pub target: String,
    pub output: String,
}

impl ErrorRecord {
    pub fn new(
        index: usize,
        query: impl Into<String>,
        target: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            index,
            query: query.into(),
            target: target.into(),
            output: output.into(),
        }
    }

    pub fn from_sample(sample: &Sample, output: impl Into<String>) -> Self {
        Self::new(sample.index, &sample.query, &sample.target, output)
    }
}

/// Render failing records the way rewrite prompts present them to the model.
pub fn format_error_records(errors: &[ErrorRecord]) -> String {
    errors
        .iter()
        .map(|e| {
            format!(
                "- [#{}] input: {}\n  expected: {}\n  got: {}",
                e.index,
                e.query.trim(),
                e.target.trim(),
                if e.output.trim().is_empty() {
                    "(empty)"
                } else {
                    e.output.trim()
                }
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// A prompt under optimization plus the dataset it is validated against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub prompt: String,
    pub dataset: Vec<Sample>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        prompt: impl Into<String>,
        dataset: Vec<Sample>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            prompt: prompt.into(),
            dataset,
            created_at: now,
            updated_at: now,
        }
    }
}
