//! Diagnosis report produced at the start of every optimization pass.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Error category keys the built-in diagnoser emits.
pub const CATEGORY_EMPTY_OUTPUT: &str = "empty_output";
pub const CATEGORY_FORMAT_MISMATCH: &str = "format_mismatch";
pub const CATEGORY_LABEL_CONFUSION: &str = "label_confusion";

/// How often the model answered `actual` when `expected` was correct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionPair {
    pub expected: String,
    pub actual: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisReport {
    /// Fraction of the dataset the prompt currently gets right.
    pub accuracy: f64,
    pub total_count: usize,
    pub error_count: usize,
    /// Sorted by count, most frequent first.
    pub confusion_pairs: Vec<ConfusionPair>,
    /// Sample indices the diagnoser considers especially hard.
    pub hard_cases: Vec<usize>,
    pub error_categories: BTreeMap<String, usize>,
    /// Free-text task intent analysis from the model, when it succeeded.
    pub intent_analysis: Option<String>,
    /// Free-text root-cause analysis from the model, when it succeeded.
    pub advanced_analysis: Option<String>,
    /// Samples that passed last round and fail now.
    pub regression_indices: Vec<usize>,
    /// Samples failing across the configured window of rounds.
    pub persistent_indices: Vec<usize>,
}

impl DiagnosisReport {
    pub fn category_count(&self, category: &str) -> usize {
        self.error_categories.get(category).copied().unwrap_or(0)
    }

    /// Share of errors explained by the most frequent confusion pair.
    pub fn top_confusion_share(&self) -> f64 {
        match self.confusion_pairs.first() {
            Some(pair) if self.error_count > 0 => pair.count as f64 / self.error_count as f64,
            _ => 0.0,
        }
    }

    /// Compact text rendering used inside rewrite and ranking prompts.
    pub fn summary(&self) -> String {
        let mut lines = vec![format!(
            "accuracy {:.1}% ({} of {} samples failing)",
            self.accuracy * 100.0,
            self.error_count,
            self.total_count
        )];

        if !self.confusion_pairs.is_empty() {
            let pairs = self
                .confusion_pairs
                .iter()
                .take(5)
                .map(|p| format!("{} -> {} (x{})", p.expected, p.actual, p.count))
                .collect::<Vec<_>>()
                .join(", ");
            lines.push(format!("confusions: {pairs}"));
        }

        if !self.error_categories.is_empty() {
            let cats = self
                .error_categories
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(", ");
            lines.push(format!("categories: {cats}"));
        }

        if !self.regression_indices.is_empty() {
            lines.push(format!("regressions: {:?}", self.regression_indices));
        }
        if !self.persistent_indices.is_empty() {
            lines.push(format!("persistent failures: {:?}", self.persistent_indices));
        }
        if let Some(intent) = &self.intent_analysis {
            lines.push(format!("intent: {}", intent.trim()));
        }
        if let Some(analysis) = &self.advanced_analysis {
            lines.push(format!("root causes: {}", analysis.trim()));
        }

        lines.join("\n")
    }
}
