//! In-process catalog backend
//!
//! A ranked field index per (entity, type) with an attached lexicon. The
//! postings map term -> doc id -> term frequency; the lexicon is the
//! postings key set and feeds similarity-based suggestion. Everything
//! lives behind one process-wide RwLock, which is also the write
//! serialization for this backend.

use super::{entity_key, BackendCapabilities, IndexBackend, IndexHandle};
use crate::analysis::split_words;
use crate::config::SearchConfig;
use crate::document::IndexableDocument;
use crate::error::Result;
use crate::highlight::HighlightEngine;
use crate::query::QueryObject;
use crate::results::SearchHit;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap, HashSet};

#[derive(Debug, Clone)]
struct StoredDoc {
    text: String,
    creator: String,
    container_id: String,
    last_modified: f64,
    terms: Vec<String>,
}

#[derive(Debug, Default)]
struct TypeCatalog {
    /// term -> doc id -> term frequency
    postings: HashMap<String, HashMap<String, usize>>,
    docs: HashMap<String, StoredDoc>,
}

impl TypeCatalog {
    fn insert(&mut self, doc: &IndexableDocument) {
        self.remove(&doc.id);
        let mut terms = split_words(&doc.text);
        terms.extend(doc.keywords.iter().cloned());
        terms.extend(doc.tags.iter().map(|t| t.to_lowercase()));
        for term in &terms {
            *self
                .postings
                .entry(term.clone())
                .or_default()
                .entry(doc.id.clone())
                .or_insert(0) += 1;
        }
        self.docs.insert(
            doc.id.clone(),
            StoredDoc {
                text: doc.text.clone(),
                creator: doc.creator.clone(),
                container_id: doc.container_id.clone(),
                last_modified: doc.last_modified,
                terms,
            },
        );
    }

    fn remove(&mut self, id: &str) {
        let Some(doc) = self.docs.remove(id) else {
            return;
        };
        for term in doc.terms {
            if let Some(ids) = self.postings.get_mut(&term) {
                ids.remove(id);
                if ids.is_empty() {
                    self.postings.remove(&term);
                }
            }
        }
    }

    /// Doc ids matching the query plus their rank weight
    fn matching_ids(&self, query: &QueryObject) -> HashMap<String, usize> {
        // a leading glob matches every stored document without consulting
        // the lexicon
        if query.is_all() || query.term.starts_with(['*', '?']) {
            return self.docs.keys().map(|id| (id.clone(), 1)).collect();
        }

        let terms: Vec<String> = if query.is_wildcard() {
            self.expand_glob(&query.term)
        } else {
            split_words(&query.term)
        };
        if terms.is_empty() {
            return HashMap::new();
        }

        let mut weights: HashMap<String, usize> = HashMap::new();
        if query.is_wildcard() {
            // glob expansion is a union over the expanded lexicon terms
            for term in &terms {
                if let Some(ids) = self.postings.get(term) {
                    for (id, tf) in ids {
                        *weights.entry(id.clone()).or_insert(0) += tf;
                    }
                }
            }
            return weights;
        }

        // plain and phrase terms must all be present (AND semantics)
        let mut candidates: Option<HashSet<&String>> = None;
        for term in &terms {
            let ids: HashSet<&String> = match self.postings.get(term) {
                Some(ids) => ids.keys().collect(),
                None => return HashMap::new(),
            };
            candidates = Some(match candidates {
                Some(prev) => prev.intersection(&ids).copied().collect(),
                None => ids,
            });
        }

        for id in candidates.unwrap_or_default() {
            let weight: usize = terms
                .iter()
                .filter_map(|t| self.postings.get(t).and_then(|ids| ids.get(id)))
                .sum();
            weights.insert(id.clone(), weight);
        }

        if query.is_phrase() {
            // pad with spaces so the phrase only matches on word seams
            let phrase = format!(" {} ", terms.join(" "));
            weights.retain(|id, _| {
                self.docs
                    .get(id)
                    .map(|d| format!(" {} ", split_words(&d.text).join(" ")).contains(&phrase))
                    .unwrap_or(false)
            });
        }
        weights
    }

    /// Lexicon terms matching a glob pattern (`*`/`?` only)
    fn expand_glob(&self, glob: &str) -> Vec<String> {
        let mut pattern = String::from("^");
        for c in glob.to_lowercase().chars() {
            match c {
                '*' => pattern.push_str("\\w*"),
                '?' => pattern.push_str("\\w"),
                other => pattern.push_str(&regex::escape(&other.to_string())),
            }
        }
        pattern.push('$');
        let Ok(re) = regex::Regex::new(&pattern) else {
            return Vec::new();
        };
        self.postings
            .keys()
            .filter(|term| re.is_match(term))
            .cloned()
            .collect()
    }

    fn suggest(&self, query: &QueryObject) -> BTreeSet<String> {
        let term: Vec<char> = query.term.to_lowercase().chars().collect();
        if term.is_empty() {
            return BTreeSet::new();
        }
        let prefix = query.prefix_len().min(term.len());
        let mut out = BTreeSet::new();
        for word in self.postings.keys() {
            let word_chars: Vec<char> = word.chars().collect();
            if word_chars.len() < prefix || word_chars[..prefix] != term[..prefix] {
                continue;
            }
            if similarity(&term, &word_chars) > query.threshold {
                out.insert(word.clone());
            }
        }
        out
    }
}

/// Similarity ratio in [0, 1]: twice the longest common subsequence over
/// the combined length
fn similarity(a: &[char], b: &[char]) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let mut prev = vec![0usize; b.len() + 1];
    let mut row = vec![0usize; b.len() + 1];
    for &ca in a {
        for (j, &cb) in b.iter().enumerate() {
            row[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                row[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut row);
    }
    (2 * prev[b.len()]) as f32 / (a.len() + b.len()) as f32
}

/// Ranked in-memory backend with suggestion support
pub struct CatalogBackend {
    highlighter: HighlightEngine,
    catalogs: RwLock<HashMap<String, TypeCatalog>>,
}

impl CatalogBackend {
    pub fn new(config: &SearchConfig) -> Self {
        Self {
            highlighter: HighlightEngine::new(&config.highlight),
            catalogs: RwLock::new(HashMap::new()),
        }
    }

    fn hits_for(
        &self,
        handle: &IndexHandle,
        query: &QueryObject,
        weights: HashMap<String, usize>,
        catalog: &TypeCatalog,
        ngram: bool,
    ) -> Vec<SearchHit> {
        let mut hits: Vec<SearchHit> = weights
            .into_iter()
            .filter_map(|(id, weight)| {
                let doc = catalog.docs.get(&id)?;
                let snippet = if ngram {
                    self.highlighter.highlight_ngram(query, &doc.text).0
                } else {
                    self.highlighter.snippet(query, &doc.text)
                };
                Some(SearchHit {
                    id,
                    doc_type: handle.type_name.clone(),
                    creator: doc.creator.clone(),
                    container_id: doc.container_id.clone(),
                    snippet,
                    last_modified: doc.last_modified,
                    score: if query.ranking { weight as f32 } else { 1.0 },
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        let start = query.start.min(hits.len());
        let end = query
            .limit
            .map(|l| (start + l).min(hits.len()))
            .unwrap_or(hits.len());
        hits.drain(..start);
        hits.truncate(end - start);
        hits
    }
}

#[async_trait]
impl IndexBackend for CatalogBackend {
    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            suggest: true,
            ngram: true,
        }
    }

    async fn index_doc(&self, handle: &IndexHandle, doc: &IndexableDocument) -> Result<()> {
        self.catalogs
            .write()
            .entry(handle.index_key())
            .or_default()
            .insert(doc);
        Ok(())
    }

    async fn update_doc(&self, handle: &IndexHandle, doc: &IndexableDocument) -> Result<()> {
        self.index_doc(handle, doc).await
    }

    async fn delete_doc(&self, handle: &IndexHandle, id: &str) -> Result<()> {
        if let Some(catalog) = self.catalogs.write().get_mut(&handle.index_key()) {
            catalog.remove(id);
        }
        Ok(())
    }

    async fn search(&self, handle: &IndexHandle, query: &QueryObject) -> Result<Vec<SearchHit>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let catalogs = self.catalogs.read();
        let Some(catalog) = catalogs.get(&handle.index_key()) else {
            return Ok(Vec::new());
        };
        let weights = catalog.matching_ids(query);
        Ok(self.hits_for(handle, query, weights, catalog, false))
    }

    async fn ngram_search(
        &self,
        handle: &IndexHandle,
        query: &QueryObject,
    ) -> Result<Vec<SearchHit>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let needle: String = query
            .term
            .to_lowercase()
            .chars()
            .filter(|&c| c != '*' && c != '?')
            .collect();
        let catalogs = self.catalogs.read();
        let Some(catalog) = catalogs.get(&handle.index_key()) else {
            return Ok(Vec::new());
        };
        let weights: HashMap<String, usize> = catalog
            .docs
            .iter()
            .filter(|(_, doc)| !needle.is_empty() && doc.text.to_lowercase().contains(&needle))
            .map(|(id, _)| (id.clone(), 1))
            .collect();
        Ok(self.hits_for(handle, query, weights, catalog, true))
    }

    async fn suggest(&self, handle: &IndexHandle, query: &QueryObject) -> Result<BTreeSet<String>> {
        let catalogs = self.catalogs.read();
        let Some(catalog) = catalogs.get(&handle.index_key()) else {
            return Ok(BTreeSet::new());
        };
        let mut words = catalog.suggest(query);
        if let Some(limit) = query.limit {
            while words.len() > limit {
                words.pop_last();
            }
        }
        Ok(words)
    }

    async fn has_documents(&self, handle: &IndexHandle) -> Result<bool> {
        Ok(self
            .catalogs
            .read()
            .get(&handle.index_key())
            .map(|c| !c.docs.is_empty())
            .unwrap_or(false))
    }

    async fn remove_index(&self, handle: &IndexHandle) -> Result<()> {
        self.catalogs.write().remove(&handle.index_key());
        Ok(())
    }

    async fn stored_types(&self, entity: &str) -> Result<BTreeSet<String>> {
        let prefix = format!("{}/", entity_key(entity));
        Ok(self
            .catalogs
            .read()
            .keys()
            .filter_map(|key| key.strip_prefix(&prefix))
            .map(String::from)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::clean_content;

    fn doc(id: &str, body: &str) -> IndexableDocument {
        IndexableDocument {
            id: id.into(),
            doc_type: "note".into(),
            creator: "aizen".into(),
            container_id: "tag:container:1".into(),
            text: clean_content(body),
            keywords: BTreeSet::new(),
            tags: Vec::new(),
            shared_with: BTreeSet::new(),
            last_modified: 10.0,
        }
    }

    fn backend() -> (CatalogBackend, IndexHandle) {
        (
            CatalogBackend::new(&SearchConfig::default()),
            IndexHandle::new("aizen", "note"),
        )
    }

    #[tokio::test]
    async fn index_then_search_round_trip() {
        let (backend, handle) = backend();
        backend
            .index_doc(&handle, &doc("n1", "All Waves, Rise now and Become my Shield"))
            .await
            .unwrap();

        let hits = backend
            .search(&handle, &QueryObject::new("shield"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "n1");
        assert!(hits[0].snippet.contains("Shield"));
    }

    #[tokio::test]
    async fn suggestion_uses_similarity_threshold() {
        let (backend, handle) = backend();
        backend
            .index_doc(&handle, &doc("n1", "rankle raise rain rage"))
            .await
            .unwrap();

        let query = QueryObject::new("ra").with_threshold(0.4999);
        let words = backend.suggest(&handle, &query).await.unwrap();
        let expected: BTreeSet<String> = ["rankle", "raise", "rain", "rage"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(words, expected);

        // at exactly 0.5 the strict comparison drops "rankle" (ratio 0.5)
        let query = QueryObject::new("ra").with_threshold(0.5);
        let words = backend.suggest(&handle, &query).await.unwrap();
        assert!(!words.contains("rankle"));
        assert_eq!(words.len(), 3);
    }

    #[tokio::test]
    async fn leading_glob_matches_every_document() {
        let (backend, handle) = backend();
        backend.index_doc(&handle, &doc("n1", "alpha")).await.unwrap();
        backend.index_doc(&handle, &doc("n2", "omega")).await.unwrap();

        for term in ["*", "?", "*ega"] {
            let hits = backend.search(&handle, &QueryObject::new(term)).await.unwrap();
            assert_eq!(hits.len(), 2, "term {term} should match all docs");
        }
    }

    #[tokio::test]
    async fn prefix_glob_expands_through_the_lexicon() {
        let (backend, handle) = backend();
        backend
            .index_doc(&handle, &doc("n1", "rain rage"))
            .await
            .unwrap();
        backend.index_doc(&handle, &doc("n2", "rose")).await.unwrap();

        let hits = backend.search(&handle, &QueryObject::new("ra*")).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "n1");
    }

    #[tokio::test]
    async fn phrase_search_requires_adjacency() {
        let (backend, handle) = backend();
        backend
            .index_doc(&handle, &doc("n1", "fire engulfing land and sea"))
            .await
            .unwrap();
        backend
            .index_doc(&handle, &doc("n2", "the land, then fire engulfing the sky"))
            .await
            .unwrap();

        let hits = backend
            .search(&handle, &QueryObject::new("engulfing land"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "n1");
    }

    #[tokio::test]
    async fn ranking_toggle_controls_scores() {
        let (backend, handle) = backend();
        backend
            .index_doc(&handle, &doc("n1", "wave wave wave"))
            .await
            .unwrap();

        let ranked = backend
            .search(&handle, &QueryObject::new("wave"))
            .await
            .unwrap();
        assert_eq!(ranked[0].score, 3.0);

        let unranked = backend
            .search(&handle, &QueryObject::new("wave").with_ranking(false))
            .await
            .unwrap();
        assert_eq!(unranked[0].score, 1.0);
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_updates_lexicon() {
        let (backend, handle) = backend();
        backend.index_doc(&handle, &doc("n1", "solitary wave")).await.unwrap();
        backend.delete_doc(&handle, "n1").await.unwrap();
        backend.delete_doc(&handle, "n1").await.unwrap();
        backend.delete_doc(&handle, "never-indexed").await.unwrap();

        assert!(!backend.has_documents(&handle).await.unwrap());
        let hits = backend.search(&handle, &QueryObject::new("wave")).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn ngram_search_matches_substrings() {
        let (backend, handle) = backend();
        backend
            .index_doc(&handle, &doc("n1", "Strike now and Become my Blade"))
            .await
            .unwrap();

        let hits = backend
            .ngram_search(&handle, &QueryObject::new("bec"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);

        let none = backend
            .search(&handle, &QueryObject::new("bec"))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn stored_types_reflect_live_indices() {
        let (backend, _) = backend();
        let notes = IndexHandle::new("aizen", "note");
        let posts = IndexHandle::new("aizen", "post");
        backend.index_doc(&notes, &doc("n1", "wave")).await.unwrap();
        backend.index_doc(&posts, &doc("p1", "wave")).await.unwrap();

        let types = backend.stored_types("aizen").await.unwrap();
        assert_eq!(
            types,
            ["note", "post"].into_iter().map(String::from).collect()
        );
        assert!(backend.stored_types("gin").await.unwrap().is_empty());

        backend.remove_index(&posts).await.unwrap();
        let types = backend.stored_types("aizen").await.unwrap();
        assert_eq!(types, ["note"].into_iter().map(String::from).collect());
    }
}
