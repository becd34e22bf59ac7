//! Normalized query object shared by every backend

use crate::document::normalize_type_name;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Default similarity cutoff for suggestion candidates
pub const DEFAULT_SUGGEST_THRESHOLD: f32 = 0.5;

/// A normalized, immutable-once-built search query.
///
/// Built with consuming `with_*` methods; backends only ever read it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryObject {
    /// The raw search term (may contain `*`/`?` wildcards or a quoted-free
    /// multi-word phrase)
    pub term: String,

    /// Type names to search; empty means every type the entity has indexed
    #[serde(default)]
    pub search_on: BTreeSet<String>,

    /// Maximum hits to return
    #[serde(default)]
    pub limit: Option<usize>,

    /// Pagination offset
    #[serde(default)]
    pub start: usize,

    /// Suggestion similarity cutoff in `(0, 1]`
    #[serde(default = "default_threshold")]
    pub threshold: f32,

    /// Common-prefix length for suggestion candidates; `None` means the
    /// full term length
    #[serde(default)]
    pub prefix: Option<usize>,

    /// Whether backends should report relevance scores (uniform 1.0 when
    /// disabled)
    #[serde(default = "default_ranking")]
    pub ranking: bool,
}

fn default_threshold() -> f32 {
    DEFAULT_SUGGEST_THRESHOLD
}

fn default_ranking() -> bool {
    true
}

impl QueryObject {
    /// Create a query for the given term
    pub fn new(term: impl Into<String>) -> Self {
        Self {
            term: term.into().trim().to_string(),
            search_on: BTreeSet::new(),
            limit: None,
            start: 0,
            threshold: DEFAULT_SUGGEST_THRESHOLD,
            prefix: None,
            ranking: true,
        }
    }

    /// Restrict the query to the given type names (normalized on the way in)
    pub fn with_search_on<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.search_on = types
            .into_iter()
            .map(|t| normalize_type_name(t.as_ref()))
            .collect();
        self
    }

    /// Set the maximum number of hits
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the pagination offset
    pub fn with_start(mut self, start: usize) -> Self {
        self.start = start;
        self
    }

    /// Set the suggestion similarity cutoff
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Set the suggestion common-prefix length
    pub fn with_prefix(mut self, prefix: usize) -> Self {
        self.prefix = Some(prefix);
        self
    }

    /// Enable or disable relevance ranking
    pub fn with_ranking(mut self, ranking: bool) -> Self {
        self.ranking = ranking;
        self
    }

    /// Replace the term, keeping every other setting (used when a
    /// suggestion candidate is re-searched)
    pub fn with_term(mut self, term: impl Into<String>) -> Self {
        self.term = term.into().trim().to_string();
        self
    }

    /// True when there is nothing to search for
    pub fn is_empty(&self) -> bool {
        self.term.is_empty()
    }

    /// True when the term contains a glob wildcard
    pub fn is_wildcard(&self) -> bool {
        self.term.contains('*') || self.term.contains('?')
    }

    /// True when the term consists solely of wildcards ("match everything")
    pub fn is_all(&self) -> bool {
        !self.term.is_empty() && self.term.chars().all(|c| c == '*' || c == '?')
    }

    /// True when the term asks for prefix completion (`foo*`)
    pub fn is_prefix(&self) -> bool {
        self.term.ends_with('*') && !self.is_all()
    }

    /// True when the term is a multi-word phrase. Wildcard-only terms are
    /// never phrases, whatever whitespace they carry.
    pub fn is_phrase(&self) -> bool {
        self.term.split_whitespace().count() > 1 && !self.is_all()
    }

    /// Effective common-prefix length for suggestion lookups
    pub fn prefix_len(&self) -> usize {
        self.prefix.unwrap_or_else(|| self.term.chars().count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phrase_detection() {
        assert!(QueryObject::new("engulfing land").is_phrase());
        assert!(!QueryObject::new("strike").is_phrase());
        assert!(!QueryObject::new("* ?").is_all()); // whitespace breaks the all-glob
        assert!(QueryObject::new("*").is_all());
        assert!(QueryObject::new("?").is_all());
    }

    #[test]
    fn wildcard_and_prefix_detection() {
        assert!(QueryObject::new("ra*").is_prefix());
        assert!(QueryObject::new("ra*").is_wildcard());
        assert!(!QueryObject::new("*").is_prefix());
        assert!(!QueryObject::new("rain").is_wildcard());
    }

    #[test]
    fn search_on_is_normalized() {
        let q = QueryObject::new("x").with_search_on(["Notes", "REDACTIONS"]);
        assert!(q.search_on.contains("note"));
        assert!(q.search_on.contains("redaction"));
    }

    #[test]
    fn prefix_defaults_to_term_length() {
        assert_eq!(QueryObject::new("ra").prefix_len(), 2);
        assert_eq!(QueryObject::new("ra").with_prefix(1).prefix_len(), 1);
    }
}
