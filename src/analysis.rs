//! Word tokenization and content cleaning
//!
//! Everything that needs to agree on what a "word" is — the resolver, the
//! highlight engine, and the catalog backend — goes through this module.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// Words, keeping inner apostrophes/periods ("court's", "U.S") together
static WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\w+(?:['’.]\w+)*").expect("word pattern"));

/// Markup stripped before tokenization
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^<>]*>|&[A-Za-z]+;").expect("tag pattern"));

/// A token with half-open char offsets into the analyzed text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Lowercased token text
    pub text: String,
    pub start: usize,
    pub end: usize,
}

/// True when a char separates words (start/end-of-string is also a boundary)
pub fn is_boundary_char(c: char) -> bool {
    !(c.is_alphanumeric() || c == '_')
}

/// Strip markup and reduce a raw body to its word tokens joined by single
/// spaces. This is the canonical searchable text stored in indices and used
/// for snippets.
pub fn clean_content(text: &str) -> String {
    let stripped = TAG_RE.replace_all(text, " ");
    WORD_RE
        .find_iter(&stripped)
        .map(|m| m.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split text into lowercased word tokens (no offsets)
pub fn split_words(text: &str) -> Vec<String> {
    WORD_RE
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

/// Word-boundary tokenizer with an optional stopword list
#[derive(Debug, Clone, Default)]
pub struct Analyzer {
    stopwords: HashSet<String>,
}

impl Analyzer {
    pub fn new<I, S>(stopwords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            stopwords: stopwords
                .into_iter()
                .map(|s| s.as_ref().to_lowercase())
                .collect(),
        }
    }

    /// Tokenize with char offsets. When `remove_stops` is set, tokens in
    /// the stopword list are dropped.
    pub fn tokenize(&self, text: &str, remove_stops: bool) -> Vec<Token> {
        let mut tokens = Vec::new();
        // regex yields byte offsets; walk chars once to translate
        let mut char_at_byte = vec![0usize; text.len() + 1];
        for (count, (byte_idx, _)) in text.char_indices().enumerate() {
            char_at_byte[byte_idx] = count;
        }
        char_at_byte[text.len()] = text.chars().count();

        for m in WORD_RE.find_iter(text) {
            let lowered = m.as_str().to_lowercase();
            if remove_stops && self.stopwords.contains(&lowered) {
                continue;
            }
            tokens.push(Token {
                text: lowered,
                start: char_at_byte[m.start()],
                end: char_at_byte[m.end()],
            });
        }
        tokens
    }
}
