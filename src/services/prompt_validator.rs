//! Post-hoc check of an optimized prompt before it may replace the working one.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::domain::models::PromptVerdict;

use super::diff_patch::contains_markers;

fn template_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}|\{([A-Za-z_][A-Za-z0-9_]*)\}")
            .unwrap_or_else(|e| panic!("template regex is invalid: {e}"))
    })
}

/// Template variable names (`{name}` or `{{name}}`) used by a prompt.
pub fn template_variables(prompt: &str) -> BTreeSet<String> {
    template_regex()
        .captures_iter(prompt)
        .filter_map(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Rejects rewrites that corrupted the prompt's format.
#[derive(Debug, Clone)]
pub struct PromptValidator {
    max_growth: f64,
}

impl PromptValidator {
    pub const fn new(max_growth: f64) -> Self {
        Self { max_growth }
    }

    pub fn validate(&self, original: &str, optimized: &str) -> PromptVerdict {
        if optimized.trim().is_empty() {
            return PromptVerdict::fail("optimized prompt is empty");
        }

        if contains_markers(optimized) {
            return PromptVerdict::fail("optimized prompt still contains SEARCH/REPLACE markers");
        }

        let before = template_variables(original);
        let after = template_variables(optimized);
        let lost: Vec<&String> = before.difference(&after).collect();
        if !lost.is_empty() {
            let names = lost
                .iter()
                .map(|v| format!("{{{v}}}"))
                .collect::<Vec<_>>()
                .join(", ");
            return PromptVerdict::fail(format!("lost template variables: {names}"));
        }

        let limit = original.chars().count() as f64 * self.max_growth;
        let length = optimized.chars().count() as f64;
        if !original.is_empty() && length > limit {
            return PromptVerdict::fail(format!(
                "optimized prompt grew to {length} characters, limit is {limit:.0}"
            ));
        }

        PromptVerdict::pass()
    }
}

impl Default for PromptValidator {
    fn default() -> Self {
        Self::new(4.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_variables() {
        let vars = template_variables("Classify {query} into {{ labels }}. Not {1} or {}.");
        assert_eq!(
            vars.into_iter().collect::<Vec<_>>(),
            vec!["labels".to_string(), "query".to_string()]
        );
    }

    #[test]
    fn test_passes_clean_rewrite() {
        let v = PromptValidator::default().validate("Classify {query}.", "Carefully classify {query}.");
        assert!(v.passed);
    }

    #[test]
    fn test_rejects_lost_variable() {
        let v = PromptValidator::default().validate("Classify {query}.", "Classify the ticket.");
        assert!(!v.passed);
        assert_eq!(v.reason.as_deref(), Some("lost template variables: {query}"));
    }

    #[test]
    fn test_rejects_empty_markers_and_growth() {
        let validator = PromptValidator::new(2.0);
        assert!(!validator.validate("abc", "   ").passed);
        assert!(!validator
            .validate("abc", "<<<<<<< SEARCH\nabc\n=======\nx\n>>>>>>> REPLACE")
            .passed);
        assert!(!validator.validate("abc", "abcdefg").passed);
        assert!(validator.validate("abc", "abcdef").passed);
    }
}
