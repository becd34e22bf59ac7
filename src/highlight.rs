//! Snippet and match-range extraction
//!
//! Given a query and the stored searchable text, the engine produces the
//! best-scoring context fragments and, per fragment, the char ranges where
//! the query terms occur. Ranges are half-open char offsets into the
//! fragment's own text, aligned to word boundaries, with nested ranges
//! removed.

use crate::analysis::{is_boundary_char, Analyzer};
use crate::config::HighlightConfig;
use crate::query::QueryObject;
use std::collections::BTreeSet;

const FRAGMENT_SEPARATOR: &str = "...";

/// A contiguous excerpt of the source text plus the match ranges within it
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub text: String,
    /// Half-open char ranges into `text`, sorted by start
    pub matches: Vec<(usize, usize)>,
}

/// Query terms in the shape highlighting needs them: a set for ordinary
/// queries, an ordered sequence (duplicates kept) for phrases
enum TermSet {
    Words(BTreeSet<String>),
    Phrase(Vec<String>),
}

impl TermSet {
    fn contains(&self, word: &str) -> bool {
        match self {
            Self::Words(set) => set.contains(word),
            Self::Phrase(seq) => seq.iter().any(|t| t == word),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Self::Words(set) => set.is_empty(),
            Self::Phrase(seq) => seq.is_empty(),
        }
    }

    /// Distinct terms, used for the substring range search
    fn distinct(&self) -> BTreeSet<&str> {
        match self {
            Self::Words(set) => set.iter().map(String::as_str).collect(),
            Self::Phrase(seq) => seq.iter().map(String::as_str).collect(),
        }
    }
}

/// Produces snippets and match ranges for search hits
#[derive(Debug, Clone)]
pub struct HighlightEngine {
    analyzer: Analyzer,
    max_chars: usize,
    surround: usize,
    top: usize,
}

impl Default for HighlightEngine {
    fn default() -> Self {
        Self::new(&HighlightConfig::default())
    }
}

impl HighlightEngine {
    pub fn new(config: &HighlightConfig) -> Self {
        Self {
            analyzer: Analyzer::new(&config.stopwords),
            max_chars: config.max_chars,
            surround: config.surround,
            top: config.top_fragments,
        }
    }

    /// Word-tokenized highlighting.
    ///
    /// Returns the snippet (fragment texts joined by `"..."`) and the
    /// fragments themselves. When no context window lines up with the
    /// query terms, falls back to a single fragment spanning the whole
    /// text.
    pub fn highlight_word(&self, query: &QueryObject, text: &str) -> (String, Vec<Fragment>) {
        let chars: Vec<char> = text.chars().collect();
        if chars.is_empty() {
            return (String::new(), Vec::new());
        }

        let terms = self.term_set(query);
        if terms.is_empty() {
            return (text.to_string(), vec![Fragment {
                text: text.to_string(),
                matches: Vec::new(),
            }]);
        }

        let windows = self.build_windows(&chars, &terms);
        if windows.is_empty() {
            let fragment = self.fragment_for(&chars, 0, chars.len(), &terms, true);
            return (fragment.text.clone(), vec![fragment]);
        }

        let fragments: Vec<Fragment> = windows
            .into_iter()
            .map(|(start, end)| self.fragment_for(&chars, start, end, &terms, true))
            .collect();

        // phrase refinement: keep only match runs spelling out the phrase,
        // except for the degenerate single-term phrase
        if let TermSet::Phrase(seq) = &terms {
            if seq.len() > 1 {
                if let Some(pruned) = prune_to_phrase_runs(&fragments, &terms, seq) {
                    let snippet = join_snippet(&pruned);
                    return (snippet, pruned);
                }
            }
        }

        let snippet = join_snippet(&fragments);
        (snippet, fragments)
    }

    /// Prefix/substring highlighting: plain scanning with no word-boundary
    /// constraint and no phrase handling
    pub fn highlight_ngram(&self, query: &QueryObject, text: &str) -> (String, Vec<Fragment>) {
        let chars: Vec<char> = text.chars().collect();
        if chars.is_empty() {
            return (String::new(), Vec::new());
        }

        let needle = strip_wildcards(&query.term).to_lowercase();
        let occurrences = if needle.is_empty() {
            Vec::new()
        } else {
            find_occurrences(&chars, &needle, false)
        };
        if occurrences.is_empty() {
            return (text.to_string(), vec![Fragment {
                text: text.to_string(),
                matches: Vec::new(),
            }]);
        }

        let windows = self.merge_spans(&chars, &occurrences);
        let fragments: Vec<Fragment> = windows
            .into_iter()
            .take(self.top)
            .map(|(start, end)| {
                let fragment_text: String = chars[start..end].iter().collect();
                let fragment_chars = &chars[start..end];
                let matches = find_occurrences(fragment_chars, &needle, false);
                Fragment {
                    text: fragment_text,
                    matches,
                }
            })
            .collect();

        let snippet = join_snippet(&fragments);
        (snippet, fragments)
    }

    /// Convenience for backends that only need the snippet text
    pub fn snippet(&self, query: &QueryObject, text: &str) -> String {
        self.highlight_word(query, text).0
    }

    fn term_set(&self, query: &QueryObject) -> TermSet {
        let cleaned = strip_wildcards(&query.term);
        let tokens: Vec<String> = self
            .analyzer
            .tokenize(&cleaned, false)
            .into_iter()
            .map(|t| t.text)
            .collect();
        if query.is_phrase() {
            TermSet::Phrase(tokens)
        } else {
            TermSet::Words(tokens.into_iter().collect())
        }
    }

    /// Context windows around runs of matched tokens, merged while the
    /// combined span stays within the fragment size cap, scored by distinct
    /// matched terms, top-N kept in original position order
    fn build_windows(&self, chars: &[char], terms: &TermSet) -> Vec<(usize, usize)> {
        let text: String = chars.iter().collect();
        let matched: Vec<_> = self
            .analyzer
            .tokenize(&text, true)
            .into_iter()
            .filter(|t| terms.contains(&t.text))
            .collect();
        if matched.is_empty() {
            return Vec::new();
        }

        let mut windows: Vec<(usize, usize, BTreeSet<String>)> = Vec::new();
        for token in matched {
            let (start, end) = self.snap_window(chars, token.start, token.end);
            let mut absorbed = false;
            if let Some(last) = windows.last_mut() {
                if start <= last.1 && end.max(last.1) - last.0 <= self.max_chars {
                    last.1 = last.1.max(end);
                    last.2.insert(token.text.clone());
                    absorbed = true;
                }
            }
            if !absorbed {
                let mut seen = BTreeSet::new();
                seen.insert(token.text);
                windows.push((start, end, seen));
            }
        }

        // top-N by score, then back to positional order
        let mut ranked: Vec<(usize, usize, usize)> = windows
            .into_iter()
            .map(|(s, e, seen)| (s, e, seen.len()))
            .collect();
        ranked.sort_by(|a, b| b.2.cmp(&a.2).then(a.0.cmp(&b.0)));
        ranked.truncate(self.top);
        ranked.sort_by_key(|w| w.0);
        ranked.into_iter().map(|(s, e, _)| (s, e)).collect()
    }

    /// Expand ±surround around a token, snap outward to word boundaries,
    /// trim surrounding separators, and cap at the fragment size
    fn snap_window(&self, chars: &[char], tok_start: usize, tok_end: usize) -> (usize, usize) {
        let n = chars.len();
        let mut start = tok_start.saturating_sub(self.surround);
        let mut end = (tok_end + self.surround).min(n);

        while start > 0 && !is_boundary_char(chars[start - 1]) {
            start -= 1;
        }
        while end < n && !is_boundary_char(chars[end]) {
            end += 1;
        }
        while start < end && is_boundary_char(chars[start]) {
            start += 1;
        }
        while end > start && is_boundary_char(chars[end - 1]) {
            end -= 1;
        }
        if end - start > self.max_chars {
            end = start + self.max_chars;
            while end > start && !is_boundary_char(chars[end - 1]) {
                end -= 1;
            }
            while end > start && is_boundary_char(chars[end - 1]) {
                end -= 1;
            }
        }
        (start, end)
    }

    /// Windows for the ngram variant: same expansion/merge over raw
    /// occurrence spans instead of analyzer tokens
    fn merge_spans(&self, chars: &[char], spans: &[(usize, usize)]) -> Vec<(usize, usize)> {
        let mut windows: Vec<(usize, usize)> = Vec::new();
        for &(s, e) in spans {
            let (start, end) = self.snap_window(chars, s, e);
            let mut absorbed = false;
            if let Some(last) = windows.last_mut() {
                if start <= last.1 && end.max(last.1) - last.0 <= self.max_chars {
                    last.1 = last.1.max(end);
                    absorbed = true;
                }
            }
            if !absorbed {
                windows.push((start, end));
            }
        }
        windows
    }

    /// Build one fragment over chars[start..end], searching each distinct
    /// term with the boundary-constrained scan and dropping nested ranges
    fn fragment_for(
        &self,
        chars: &[char],
        start: usize,
        end: usize,
        terms: &TermSet,
        bounded: bool,
    ) -> Fragment {
        let fragment_chars = &chars[start..end];
        let mut ranges: Vec<(usize, usize, &str)> = Vec::new();
        for term in terms.distinct() {
            for (s, e) in find_occurrences(fragment_chars, term, bounded) {
                ranges.push((s, e, term));
            }
        }
        ranges.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));
        remove_nested(&mut ranges);
        Fragment {
            text: fragment_chars.iter().collect(),
            matches: ranges.iter().map(|&(s, e, _)| (s, e)).collect(),
        }
    }
}

fn strip_wildcards(term: &str) -> String {
    term.chars().filter(|&c| c != '*' && c != '?').collect()
}

fn join_snippet(fragments: &[Fragment]) -> String {
    fragments
        .iter()
        .map(|f| f.text.as_str())
        .collect::<Vec<_>>()
        .join(FRAGMENT_SEPARATOR)
}

/// Case-insensitive occurrences of `needle` in `haystack` as char ranges.
/// When `bounded`, both ends must sit on a word boundary.
fn find_occurrences(haystack: &[char], needle: &str, bounded: bool) -> Vec<(usize, usize)> {
    let needle: Vec<char> = needle.chars().flat_map(char::to_lowercase).collect();
    if needle.is_empty() || needle.len() > haystack.len() {
        return Vec::new();
    }
    let lowered: Vec<char> = haystack
        .iter()
        .flat_map(|c| c.to_lowercase())
        .collect();
    // lowercasing can change char counts in exotic scripts; bail out of the
    // offset math rather than report shifted ranges
    if lowered.len() != haystack.len() {
        return Vec::new();
    }

    let mut out = Vec::new();
    let n = needle.len();
    for i in 0..=lowered.len() - n {
        if lowered[i..i + n] != needle[..] {
            continue;
        }
        if bounded {
            let starts_ok = i == 0 || is_boundary_char(haystack[i - 1]);
            let ends_ok = i + n == haystack.len() || is_boundary_char(haystack[i + n]);
            if !starts_ok || !ends_ok {
                continue;
            }
        }
        out.push((i, i + n));
    }
    out
}

/// Drop ranges fully contained in another range (outer one wins).
/// Input must be sorted by (start asc, end desc).
fn remove_nested(ranges: &mut Vec<(usize, usize, &str)>) {
    let mut kept: Vec<(usize, usize, &str)> = Vec::with_capacity(ranges.len());
    for &(s, e, t) in ranges.iter() {
        if kept.iter().any(|&(ks, ke, _)| ks <= s && e <= ke && (ks, ke) != (s, e)) {
            continue;
        }
        kept.push((s, e, t));
    }
    *ranges = kept;
}

/// Phrase pruning over already-built fragments. Returns the surviving
/// fragments, or None when every fragment would be dropped (callers keep
/// the unpruned set in that case).
fn prune_to_phrase_runs(
    fragments: &[Fragment],
    terms: &TermSet,
    phrase: &[String],
) -> Option<Vec<Fragment>> {
    let mut survivors = Vec::new();
    for fragment in fragments {
        let frag_chars: Vec<char> = fragment.text.chars().collect();
        let mut tagged: Vec<(usize, usize, String)> = Vec::new();
        for term in terms.distinct() {
            for (s, e) in find_occurrences(&frag_chars, term, true) {
                tagged.push((s, e, term.to_string()));
            }
        }
        tagged.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));

        let mut runs = Vec::new();
        let mut i = 0;
        while i + phrase.len() <= tagged.len() {
            let matches_here = tagged[i..i + phrase.len()]
                .iter()
                .zip(phrase)
                .all(|(r, t)| r.2 == *t);
            if matches_here {
                runs.push((tagged[i].0, tagged[i + phrase.len() - 1].1));
                i += phrase.len();
            } else {
                i += 1;
            }
        }
        if !runs.is_empty() {
            survivors.push(Fragment {
                text: fragment.text.clone(),
                matches: runs,
            });
        }
    }
    if survivors.is_empty() {
        None
    } else {
        Some(survivors)
    }
}
