//! Heuristic diagnoser: pure, CPU-bound error analysis.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::domain::models::diagnosis::{
    CATEGORY_EMPTY_OUTPUT, CATEGORY_FORMAT_MISMATCH, CATEGORY_LABEL_CONFUSION,
};
use crate::domain::models::{ConfusionPair, DiagnosisReport, ErrorRecord};
use crate::domain::ports::Diagnoser;

/// Canonical label form: trimmed, lowercased, surrounding quotes and
/// punctuation removed.
pub fn normalize_label(s: &str) -> String {
    s.trim()
        .trim_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace() || c == '“' || c == '”')
        .to_lowercase()
}

/// Buckets each failing record as an empty answer, a known-but-wrong label,
/// or an answer outside the label set.
#[derive(Debug, Clone, Default)]
pub struct HeuristicDiagnoser {
    /// Labels known up front; targets seen in the errors are always added.
    labels: BTreeSet<String>,
}

impl HeuristicDiagnoser {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.labels
            .extend(labels.into_iter().map(|l| normalize_label(l.as_ref())));
        self
    }
}

impl Diagnoser for HeuristicDiagnoser {
    fn diagnose(&self, _prompt: &str, errors: &[ErrorRecord], total_count: usize) -> DiagnosisReport {
        let total = total_count.max(errors.len());
        let accuracy = if total == 0 {
            0.0
        } else {
            1.0 - errors.len() as f64 / total as f64
        };

        let mut labels = self.labels.clone();
        labels.extend(errors.iter().map(|e| normalize_label(&e.target)));

        let mut categories: BTreeMap<String, usize> = BTreeMap::new();
        let mut pairs: HashMap<(String, String), usize> = HashMap::new();
        let mut confused_with: HashMap<String, BTreeSet<String>> = HashMap::new();
        let mut empty = Vec::new();

        for error in errors {
            let output = normalize_label(&error.output);
            let target = normalize_label(&error.target);

            let category = if output.is_empty() {
                empty.push(error.index);
                CATEGORY_EMPTY_OUTPUT
            } else if labels.contains(&output) {
                *pairs.entry((target.clone(), output.clone())).or_default() += 1;
                confused_with.entry(target).or_default().insert(output);
                CATEGORY_LABEL_CONFUSION
            } else {
                CATEGORY_FORMAT_MISMATCH
            };
            *categories.entry(category.to_string()).or_default() += 1;
        }

        let mut confusion_pairs: Vec<ConfusionPair> = pairs
            .into_iter()
            .map(|((expected, actual), count)| ConfusionPair {
                expected,
                actual,
                count,
            })
            .collect();
        confusion_pairs.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.expected.cmp(&b.expected))
                .then_with(|| a.actual.cmp(&b.actual))
        });

        // Targets the model mixes up with two or more other labels.
        let scattered: BTreeSet<&String> = confused_with
            .iter()
            .filter(|(_, actuals)| actuals.len() >= 2)
            .map(|(target, _)| target)
            .collect();

        let mut hard_cases: BTreeSet<usize> = empty.into_iter().collect();
        hard_cases.extend(
            errors
                .iter()
                .filter(|e| scattered.contains(&normalize_label(&e.target)))
                .map(|e| e.index),
        );

        DiagnosisReport {
            accuracy,
            total_count: total,
            error_count: errors.len(),
            confusion_pairs,
            hard_cases: hard_cases.into_iter().collect(),
            error_categories: categories,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn errors() -> Vec<ErrorRecord> {
        vec![
            ErrorRecord::new(0, "refund me", "billing", "shipping"),
            ErrorRecord::new(1, "charged twice", "billing", "Shipping."),
            ErrorRecord::new(2, "wrong invoice", "billing", "account"),
            ErrorRecord::new(3, "where is box", "shipping", ""),
            ErrorRecord::new(4, "hi", "account", "I think this is about an account"),
        ]
    }

    #[test]
    fn test_normalize_label() {
        assert_eq!(normalize_label("  \"Billing.\" "), "billing");
        assert_eq!(normalize_label("'shipping'"), "shipping");
    }

    #[test]
    fn test_categories_and_accuracy() {
        let report = HeuristicDiagnoser::new().diagnose("P", &errors(), 10);
        assert!((report.accuracy - 0.5).abs() < 1e-9);
        assert_eq!(report.error_count, 5);
        assert_eq!(report.category_count(CATEGORY_EMPTY_OUTPUT), 1);
        assert_eq!(report.category_count(CATEGORY_LABEL_CONFUSION), 3);
        assert_eq!(report.category_count(CATEGORY_FORMAT_MISMATCH), 1);
    }

    #[test]
    fn test_confusion_pairs_sorted_by_count() {
        let report = HeuristicDiagnoser::new().diagnose("P", &errors(), 10);
        let first = &report.confusion_pairs[0];
        assert_eq!((first.expected.as_str(), first.actual.as_str(), first.count), ("billing", "shipping", 2));
        assert_eq!(report.confusion_pairs.len(), 2);
    }

    #[test]
    fn test_hard_cases_include_empty_and_scattered_targets() {
        let report = HeuristicDiagnoser::new().diagnose("P", &errors(), 10);
        // billing is confused with shipping and account; #3 answered nothing.
        assert_eq!(report.hard_cases, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_total_smaller_than_errors_is_clamped() {
        let report = HeuristicDiagnoser::new().diagnose("P", &errors(), 0);
        assert_eq!(report.total_count, 5);
        assert!(report.accuracy.abs() < 1e-9);
    }
}
