//! Property tests for the SEARCH/REPLACE patch engine.

use proptest::prelude::*;

use promptloop::services::diff_patch::{
    apply_model_edits, apply_patch, apply_patch_detailed, contains_markers, DiffEdit, MatchKind,
    DIVIDER_MARKER, REPLACE_MARKER, SEARCH_MARKER,
};

fn letters_text() -> impl Strategy<Value = String> {
    "[a-z .,\n]{0,200}"
}

fn digit_search() -> impl Strategy<Value = String> {
    "[0-9]{1,6}( [0-9]{1,6}){0,3}"
}

proptest! {
    #[test]
    fn no_edits_is_identity(text in ".{0,300}") {
        prop_assert_eq!(apply_patch(&text, &[]), text);
    }

    #[test]
    fn exact_match_replaces_first_occurrence(
        prefix in letters_text(),
        needle in "[A-Z]{1,10}",
        suffix in letters_text(),
        replace in "[a-z ]{0,20}",
    ) {
        let text = format!("{prefix}{needle}{suffix}{needle}");
        let report = apply_patch_detailed(&text, &[DiffEdit::new(needle.clone(), replace.clone())]);
        prop_assert_eq!(report.matches, vec![Some(MatchKind::Exact)]);
        prop_assert_eq!(report.text, text.replacen(&needle, &replace, 1));
    }

    #[test]
    fn unmatched_edits_leave_text_unchanged(
        text in letters_text(),
        search in digit_search(),
        replace in "[a-z]{0,10}",
    ) {
        let report = apply_patch_detailed(&text, &[DiffEdit::new(search, replace)]);
        prop_assert_eq!(report.dropped(), 1);
        prop_assert_eq!(report.text, text);
    }

    #[test]
    fn whitespace_drift_still_matches(
        words in prop::collection::vec("[a-z]{1,6}", 2..6),
        gap in "[ \n\t]{2,4}",
    ) {
        let text = format!("Intro.\n{}\nOutro.", words.join(&gap));
        let edit = DiffEdit::new(words.join(" "), "REPLACED");
        let report = apply_patch_detailed(&text, &[edit]);
        prop_assert_eq!(report.matches.clone(), vec![Some(MatchKind::WhitespaceNormalized)]);
        prop_assert!(report.text.starts_with("Intro.\n"));
        prop_assert!(report.text.ends_with("\nOutro."));
        prop_assert!(report.text.contains("REPLACED"));
    }

    #[test]
    fn edits_apply_sequentially(
        text in ".{0,200}",
        a in ".{1,20}",
        b in ".{0,20}",
        c in ".{1,20}",
        d in ".{0,20}",
    ) {
        let first = DiffEdit::new(a, b);
        let second = DiffEdit::new(c, d);
        let together = apply_patch(&text, &[first.clone(), second.clone()]);
        let stepwise = apply_patch(&apply_patch(&text, &[first]), &[second]);
        prop_assert_eq!(together, stepwise);
    }

    #[test]
    fn applied_output_never_carries_markers(
        text in letters_text(),
        search in "[a-z]{3,8}",
        replace in "[a-z ]{0,20}",
    ) {
        let output = format!("{SEARCH_MARKER}\n{search}\n{DIVIDER_MARKER}\n{replace}\n{REPLACE_MARKER}");
        prop_assert!(!contains_markers(&apply_model_edits(&text, &output)));
    }
}
