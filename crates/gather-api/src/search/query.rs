use gather_db::search::LikePattern;

/// Suggestions are not fetched for shorter input.
pub const SUGGESTION_MIN_CHARS: usize = 2;

/// A trimmed, non-empty search term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchTerm(String);

impl SearchTerm {
    /// `None` for blank input.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then(|| Self(trimmed.to_string()))
    }

    /// Like `parse`, but also rejects terms too short to suggest on.
    pub fn parse_for_suggestions(raw: &str) -> Option<Self> {
        Self::parse(raw).filter(|term| term.0.chars().count() >= SUGGESTION_MIN_CHARS)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn pattern(&self) -> LikePattern {
        LikePattern::contains(&self.0)
    }
}
