//! Search/suggest result containers and their merge semantics
//!
//! Result sets keep their invariants by construction: the hit count is the
//! size of the item map and the last-modified stamp is the max over the
//! contained hits (0 when empty). Merging is associative and commutative for
//! disjoint id sets, and the absent set is its identity element.

use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// A single search result, keyed by its stable id for dedup across merges
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    #[serde(skip_serializing, default)]
    pub id: String,

    #[serde(rename = "type")]
    pub doc_type: String,

    pub creator: String,

    pub container_id: String,

    pub snippet: String,

    pub last_modified: f64,

    pub score: f32,
}

impl SearchHit {
    pub fn new(id: impl Into<String>, doc_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            doc_type: doc_type.into(),
            creator: String::new(),
            container_id: String::new(),
            snippet: String::new(),
            last_modified: 0.0,
            score: 1.0,
        }
    }
}

/// Hits for one query, deduped by id
#[derive(Debug, Clone, Default)]
pub struct SearchResultSet {
    query: String,
    items: HashMap<String, SearchHit>,
}

impl SearchResultSet {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            items: HashMap::new(),
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// Insert a hit; an existing hit with the same id is replaced
    pub fn add(&mut self, hit: SearchHit) {
        self.items.insert(hit.id.clone(), hit);
    }

    pub fn extend<I: IntoIterator<Item = SearchHit>>(&mut self, hits: I) {
        for hit in hits {
            self.add(hit);
        }
    }

    pub fn get(&self, id: &str) -> Option<&SearchHit> {
        self.items.get(id)
    }

    pub fn hit_count(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Max last-modified over the contained hits, 0 when empty
    pub fn last_modified(&self) -> f64 {
        self.items
            .values()
            .map(|h| h.last_modified)
            .fold(0.0, f64::max)
    }

    pub fn hits(&self) -> impl Iterator<Item = &SearchHit> {
        self.items.values()
    }
}

impl Serialize for SearchResultSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(4))?;
        map.serialize_entry("query", &self.query)?;
        map.serialize_entry("hitCount", &self.hit_count())?;
        map.serialize_entry("lastModified", &self.last_modified())?;
        map.serialize_entry("items", &self.items)?;
        map.end()
    }
}

/// Fuzzy completion candidates for one query
#[derive(Debug, Clone, Default)]
pub struct SuggestResultSet {
    query: String,
    items: BTreeSet<String>,
}

impl SuggestResultSet {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            items: BTreeSet::new(),
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn add(&mut self, word: impl Into<String>) {
        self.items.insert(word.into());
    }

    pub fn extend<I: IntoIterator<Item = String>>(&mut self, words: I) {
        self.items.extend(words);
    }

    pub fn hit_count(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, word: &str) -> bool {
        self.items.contains(word)
    }

    /// Candidates in sorted order
    pub fn suggestions(&self) -> impl Iterator<Item = &String> {
        self.items.iter()
    }

    /// First candidate in sorted order, if any
    pub fn first(&self) -> Option<&str> {
        self.items.iter().next().map(String::as_str)
    }
}

impl Serialize for SuggestResultSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(4))?;
        map.serialize_entry("query", &self.query)?;
        map.serialize_entry("hitCount", &self.hit_count())?;
        map.serialize_entry("lastModified", &0.0)?;
        map.serialize_entry("items", &self.items)?;
        map.end()
    }
}

/// A search result set together with the suggestion candidates that were
/// consulted to produce it
#[derive(Debug, Clone, Default)]
pub struct SuggestAndSearchResultSet {
    pub search: SearchResultSet,
    pub suggestions: Vec<String>,
}

impl SuggestAndSearchResultSet {
    pub fn new(search: SearchResultSet, suggestions: Vec<String>) -> Self {
        Self {
            search,
            suggestions,
        }
    }
}

impl Serialize for SuggestAndSearchResultSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(5))?;
        map.serialize_entry("query", &self.search.query)?;
        map.serialize_entry("hitCount", &self.search.hit_count())?;
        map.serialize_entry("lastModified", &self.search.last_modified())?;
        map.serialize_entry("items", &self.search.items)?;
        map.serialize_entry("suggestions", &self.suggestions)?;
        map.end()
    }
}

/// Merge two optional search result sets. On id collision the right-hand
/// hit wins.
pub fn merge_search(
    a: Option<SearchResultSet>,
    b: Option<SearchResultSet>,
) -> Option<SearchResultSet> {
    match (a, b) {
        (None, None) => None,
        (Some(x), None) => Some(x),
        (None, Some(y)) => Some(y),
        (Some(mut x), Some(y)) => {
            x.items.extend(y.items);
            Some(x)
        }
    }
}

/// Merge two optional suggestion sets (set union)
pub fn merge_suggest(
    a: Option<SuggestResultSet>,
    b: Option<SuggestResultSet>,
) -> Option<SuggestResultSet> {
    match (a, b) {
        (None, None) => None,
        (Some(x), None) => Some(x),
        (None, Some(y)) => Some(y),
        (Some(mut x), Some(y)) => {
            x.items.extend(y.items);
            Some(x)
        }
    }
}

/// Merge combined results: search merge plus ordered, deduped suggestion
/// concatenation
pub fn merge_suggest_and_search(
    a: Option<SuggestAndSearchResultSet>,
    b: Option<SuggestAndSearchResultSet>,
) -> Option<SuggestAndSearchResultSet> {
    match (a, b) {
        (None, None) => None,
        (Some(x), None) => Some(x),
        (None, Some(y)) => Some(y),
        (Some(mut x), Some(y)) => {
            x.search.items.extend(y.search.items);
            for s in y.suggestions {
                if !x.suggestions.contains(&s) {
                    x.suggestions.push(s);
                }
            }
            Some(x)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, last_modified: f64) -> SearchHit {
        SearchHit {
            last_modified,
            ..SearchHit::new(id, "note")
        }
    }

    fn set(query: &str, hits: &[(&str, f64)]) -> SearchResultSet {
        let mut rs = SearchResultSet::new(query);
        rs.extend(hits.iter().map(|(id, lm)| hit(id, *lm)));
        rs
    }

    #[test]
    fn invariants_hold_by_construction() {
        let rs = set("q", &[("a", 3.0), ("b", 7.0)]);
        assert_eq!(rs.hit_count(), 2);
        assert_eq!(rs.last_modified(), 7.0);
        assert_eq!(SearchResultSet::new("q").last_modified(), 0.0);
    }

    #[test]
    fn merge_with_absent_is_identity() {
        let rs = set("q", &[("a", 1.0)]);
        let merged = merge_search(Some(rs.clone()), None).unwrap();
        assert_eq!(merged.hit_count(), rs.hit_count());
        let merged = merge_search(None, Some(rs)).unwrap();
        assert_eq!(merged.hit_count(), 1);
        assert!(merge_search(None, None).is_none());
    }

    #[test]
    fn merge_is_associative_for_disjoint_ids() {
        let a = || Some(set("q", &[("a", 1.0)]));
        let b = || Some(set("q", &[("b", 5.0)]));
        let c = || Some(set("q", &[("c", 3.0)]));

        let left = merge_search(merge_search(a(), b()), c()).unwrap();
        let right = merge_search(a(), merge_search(b(), c())).unwrap();
        assert_eq!(left.hit_count(), right.hit_count());
        assert_eq!(left.last_modified(), right.last_modified());
        for id in ["a", "b", "c"] {
            assert!(left.get(id).is_some() && right.get(id).is_some());
        }
    }

    #[test]
    fn collision_is_last_writer_wins() {
        let a = set("q", &[("a", 1.0)]);
        let mut b = SearchResultSet::new("q");
        b.add(SearchHit {
            snippet: "newer".into(),
            ..hit("a", 9.0)
        });
        let merged = merge_search(Some(a), Some(b)).unwrap();
        assert_eq!(merged.hit_count(), 1);
        assert_eq!(merged.get("a").unwrap().snippet, "newer");
        assert_eq!(merged.last_modified(), 9.0);
    }

    #[test]
    fn suggest_merge_is_set_union() {
        let mut a = SuggestResultSet::new("ra");
        a.extend(["rain".to_string(), "rage".to_string()]);
        let mut b = SuggestResultSet::new("ra");
        b.extend(["rain".to_string(), "raise".to_string()]);
        let merged = merge_suggest(Some(a), Some(b)).unwrap();
        assert_eq!(merged.hit_count(), 3);
    }

    #[test]
    fn wire_shape() {
        let mut rs = set("waves", &[("tag:n:1", 4.0)]);
        rs.items.get_mut("tag:n:1").unwrap().snippet = "All Waves".into();
        let value = serde_json::to_value(&rs).unwrap();
        assert_eq!(value["query"], "waves");
        assert_eq!(value["hitCount"], 1);
        assert_eq!(value["lastModified"], 4.0);
        let item = &value["items"]["tag:n:1"];
        assert_eq!(item["type"], "note");
        assert_eq!(item["snippet"], "All Waves");
        assert!(item.get("id").is_none());

        let combined = SuggestAndSearchResultSet::new(rs, vec!["wave".into()]);
        let value = serde_json::to_value(&combined).unwrap();
        assert_eq!(value["suggestions"][0], "wave");
    }
}
