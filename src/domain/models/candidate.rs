use serde::{Deserialize, Serialize};

/// A proposed rewritten prompt produced by one strategy application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub strategy: String,
    pub prompt: String,
    /// The prompt the strategy was applied to.
    pub source_prompt: String,
    /// Fraction of scored failing samples this candidate fixes, when scored.
    pub score: Option<f64>,
}

impl Candidate {
    pub fn new(
        strategy: impl Into<String>,
        prompt: impl Into<String>,
        source_prompt: impl Into<String>,
    ) -> Self {
        Self {
            strategy: strategy.into(),
            prompt: prompt.into(),
            source_prompt: source_prompt.into(),
            score: None,
        }
    }

    #[must_use]
    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn is_change(&self) -> bool {
        self.prompt != self.source_prompt
    }
}
