//! Diff-patch engine: applies model-authored SEARCH/REPLACE edits to a prompt.
//!
//! Models rarely reproduce the text they want to change byte for byte, so each
//! edit is tried against five progressively fuzzier matchers, in a fixed
//! order:
//!
//! 1. exact substring
//! 2. trimmed substring
//! 3. whitespace-normalized, mapped back onto the original span
//! 4. case-insensitive anchor built from the first few words
//! 5. first non-blank line, at line granularity
//!
//! Changing the order changes which ambiguous edits succeed. Edits apply
//! sequentially to the already-patched text. An edit that matches nothing is
//! logged and dropped; the engine never fails.

use std::fmt;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const SEARCH_MARKER: &str = "<<<<<<< SEARCH";
pub const DIVIDER_MARKER: &str = "=======";
pub const REPLACE_MARKER: &str = ">>>>>>> REPLACE";

/// Words taken from the start of the search text to build the anchor regex.
const ANCHOR_WORDS: usize = 5;
/// Fewer words than this is too weak an anchor to trust.
const MIN_ANCHOR_WORDS: usize = 2;

/// One find/replace instruction. Lives only inside a single apply call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEdit {
    pub search: String,
    pub replace: String,
}

impl DiffEdit {
    pub fn new(search: impl Into<String>, replace: impl Into<String>) -> Self {
        Self {
            search: search.into(),
            replace: replace.into(),
        }
    }
}

/// Which matcher located an edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Trimmed,
    WhitespaceNormalized,
    AnchorPrefix,
    FirstLineAnchor,
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact => write!(f, "exact"),
            Self::Trimmed => write!(f, "trimmed"),
            Self::WhitespaceNormalized => write!(f, "whitespace_normalized"),
            Self::AnchorPrefix => write!(f, "anchor_prefix"),
            Self::FirstLineAnchor => write!(f, "first_line_anchor"),
        }
    }
}

/// Result of applying a batch of edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchReport {
    pub text: String,
    /// One entry per edit; `None` for an edit that was dropped.
    pub matches: Vec<Option<MatchKind>>,
}

impl PatchReport {
    pub fn applied(&self) -> usize {
        self.matches.iter().filter(|m| m.is_some()).count()
    }

    pub fn dropped(&self) -> usize {
        self.matches.len() - self.applied()
    }
}

fn is_search_marker(line: &str) -> bool {
    let t = line.trim();
    t.starts_with("<<<<<<<") && t.trim_start_matches('<').trim().eq_ignore_ascii_case("SEARCH")
}

fn is_divider(line: &str) -> bool {
    let t = line.trim();
    t.len() >= 5 && t.chars().all(|c| c == '=')
}

fn is_replace_marker(line: &str) -> bool {
    let t = line.trim();
    t.starts_with(">>>>>>>") && t.trim_start_matches('>').trim().eq_ignore_ascii_case("REPLACE")
}

/// True if `text` still carries any edit delimiter.
pub fn contains_markers(text: &str) -> bool {
    text.lines()
        .any(|l| is_search_marker(l) || is_replace_marker(l))
}

/// Extract every well-formed SEARCH/REPLACE block from model output.
///
/// Text outside blocks is ignored. Unterminated blocks and blocks with a
/// blank search section are skipped.
pub fn parse_edits(model_output: &str) -> Vec<DiffEdit> {
    enum Section {
        Outside,
        Search,
        Replace,
    }

    let mut edits = Vec::new();
    let mut section = Section::Outside;
    let mut search: Vec<&str> = Vec::new();
    let mut replace: Vec<&str> = Vec::new();

    for line in model_output.lines() {
        match section {
            Section::Outside => {
                if is_search_marker(line) {
                    search.clear();
                    replace.clear();
                    section = Section::Search;
                }
            }
            Section::Search => {
                if is_divider(line) {
                    section = Section::Replace;
                } else if is_search_marker(line) {
                    search.clear();
                } else {
                    search.push(line);
                }
            }
            Section::Replace => {
                if is_replace_marker(line) {
                    let search_text = search.join("\n");
                    if search_text.trim().is_empty() {
                        debug!("skipping edit with blank search text");
                    } else {
                        edits.push(DiffEdit::new(search_text, replace.join("\n")));
                    }
                    section = Section::Outside;
                } else {
                    replace.push(line);
                }
            }
        }
    }

    if !matches!(section, Section::Outside) {
        debug!("ignoring unterminated SEARCH/REPLACE block");
    }
    edits
}

/// Collapse every whitespace run to a single space and trim.
pub fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn token_regex(words: &[&str], case_insensitive: bool) -> Option<Regex> {
    if words.is_empty() {
        return None;
    }
    let pattern = words
        .iter()
        .map(|w| regex::escape(w))
        .collect::<Vec<_>>()
        .join(r"\s+");
    RegexBuilder::new(&pattern)
        .case_insensitive(case_insensitive)
        .build()
        .ok()
}

fn splice(text: &str, start: usize, end: usize, insert: &str) -> String {
    let mut out = String::with_capacity(text.len() + insert.len());
    out.push_str(&text[..start]);
    out.push_str(insert);
    out.push_str(&text[end..]);
    out
}

/// Insert `replace` before the anchor, keeping the anchor after it.
fn insert_before(text: &str, at: usize, replace: &str) -> String {
    let sep = if replace.ends_with(char::is_whitespace) {
        ""
    } else {
        "\n"
    };
    splice(text, at, at, &format!("{replace}{sep}"))
}

fn try_exact(text: &str, edit: &DiffEdit) -> Option<String> {
    text.contains(edit.search.as_str())
        .then(|| text.replacen(edit.search.as_str(), &edit.replace, 1))
}

fn try_trimmed(text: &str, edit: &DiffEdit) -> Option<String> {
    let search = edit.search.trim();
    if search.is_empty() || !text.contains(search) {
        return None;
    }
    Some(text.replacen(search, edit.replace.trim(), 1))
}

fn try_whitespace_normalized(text: &str, edit: &DiffEdit) -> Option<String> {
    let needle = normalize_ws(&edit.search);
    if needle.is_empty() || !normalize_ws(text).contains(&needle) {
        return None;
    }
    let words: Vec<&str> = edit.search.split_whitespace().collect();
    let m = token_regex(&words, false)?.find(text)?;
    Some(splice(text, m.start(), m.end(), edit.replace.trim()))
}

fn try_anchor_prefix(text: &str, edit: &DiffEdit) -> Option<String> {
    let words: Vec<&str> = edit.search.split_whitespace().take(ANCHOR_WORDS).collect();
    if words.len() < MIN_ANCHOR_WORDS {
        return None;
    }
    let m = token_regex(&words, true)?.find(text)?;
    let span = m.as_str();
    if edit.replace.contains(span) {
        Some(splice(text, m.start(), m.end(), &edit.replace))
    } else {
        Some(insert_before(text, m.start(), &edit.replace))
    }
}

fn try_first_line_anchor(text: &str, edit: &DiffEdit) -> Option<String> {
    let anchor = edit.search.lines().map(str::trim).find(|l| !l.is_empty())?;
    let anchor_lower = anchor.to_lowercase();

    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let body = line.trim_end_matches(['\n', '\r']);
        if body.to_lowercase().contains(&anchor_lower) {
            let start = offset;
            let end = offset + body.len();
            return if edit.replace.contains(body.trim()) {
                Some(splice(text, start, end, edit.replace.trim_end_matches('\n')))
            } else {
                Some(insert_before(text, start, &edit.replace))
            };
        }
        offset += line.len();
    }
    None
}

/// Apply one edit with the first matcher that hits. A blank search never matches.
pub fn apply_edit(text: &str, edit: &DiffEdit) -> Option<(String, MatchKind)> {
    if edit.search.trim().is_empty() {
        return None;
    }
    if let Some(out) = try_exact(text, edit) {
        return Some((out, MatchKind::Exact));
    }
    if let Some(out) = try_trimmed(text, edit) {
        return Some((out, MatchKind::Trimmed));
    }
    if let Some(out) = try_whitespace_normalized(text, edit) {
        return Some((out, MatchKind::WhitespaceNormalized));
    }
    if let Some(out) = try_anchor_prefix(text, edit) {
        return Some((out, MatchKind::AnchorPrefix));
    }
    try_first_line_anchor(text, edit).map(|out| (out, MatchKind::FirstLineAnchor))
}

/// Apply `edits` in order, reporting which matcher located each one.
pub fn apply_patch_detailed(text: &str, edits: &[DiffEdit]) -> PatchReport {
    let mut current = text.to_string();
    let mut matches = Vec::with_capacity(edits.len());

    for (i, edit) in edits.iter().enumerate() {
        match apply_edit(&current, edit) {
            Some((patched, kind)) => {
                debug!(edit = i, match_kind = %kind, "applied edit");
                current = patched;
                matches.push(Some(kind));
            }
            None => {
                let preview: String = edit.search.chars().take(60).collect();
                warn!(edit = i, search = %preview, "edit matched nothing, dropping");
                matches.push(None);
            }
        }
    }

    PatchReport {
        text: current,
        matches,
    }
}

/// Apply `edits` in order. Zero edits or all misses return `text` unchanged.
pub fn apply_patch(text: &str, edits: &[DiffEdit]) -> String {
    apply_patch_detailed(text, edits).text
}

/// Parse model output and apply whatever edits it contains.
pub fn apply_model_edits(text: &str, model_output: &str) -> String {
    let edits = parse_edits(model_output);
    if edits.is_empty() {
        debug!("model output contained no SEARCH/REPLACE edits");
        return text.to_string();
    }
    apply_patch(text, &edits)
}
