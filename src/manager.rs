//! Per-entity index façade
//!
//! An [`EntityIndexManager`] owns the handle cache for one entity, fans
//! queries out across that entity's type indices, and merges the partial
//! results. A failing type during fan-out is logged and skipped so one
//! broken index cannot blank out every other type's results.

use crate::backend::{create_backend, IndexBackend, IndexHandle};
use crate::config::SearchConfig;
use crate::document::{ContentItem, DocumentResolver, IndexableDocument};
use crate::error::Result;
use crate::query::QueryObject;
use crate::results::{
    merge_search, SearchResultSet, SuggestAndSearchResultSet, SuggestResultSet,
};
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Search and indexing entry point for a single entity
pub struct EntityIndexManager {
    entity: String,
    backend: Arc<dyn IndexBackend>,
    handles: DashMap<String, IndexHandle>,
    resolver: DocumentResolver,
    known_types: BTreeSet<String>,
}

impl EntityIndexManager {
    /// Build a manager with its own backend from configuration
    pub fn new(entity: impl Into<String>, config: &SearchConfig) -> Result<Self> {
        let backend = create_backend(config)?;
        Ok(Self::with_backend(
            entity,
            backend,
            config.known_types.iter().cloned().collect(),
        ))
    }

    /// Build a manager over a shared backend instance. Managers for
    /// different entities can share one backend; each keeps its own
    /// handle cache.
    pub fn with_backend(
        entity: impl Into<String>,
        backend: Arc<dyn IndexBackend>,
        known_types: BTreeSet<String>,
    ) -> Self {
        Self {
            entity: entity.into(),
            backend,
            handles: DashMap::new(),
            resolver: DocumentResolver::new(),
            known_types,
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Handle lookup is create-or-get so concurrent first accesses cannot
    /// produce duplicate handles
    fn handle_for(&self, type_name: &str) -> IndexHandle {
        self.handles
            .entry(type_name.to_string())
            .or_insert_with(|| IndexHandle::new(self.entity.clone(), type_name))
            .clone()
    }

    /// Types a read fans out over: the caller's selection intersected with
    /// what this entity actually has indexed; an empty selection (or an
    /// empty intersection) falls back to everything stored
    async fn resolve_search_types(&self, query: &QueryObject) -> Result<BTreeSet<String>> {
        let stored = self.backend.stored_types(&self.entity).await?;
        if query.search_on.is_empty() {
            return Ok(stored);
        }
        let selected: BTreeSet<String> = query
            .search_on
            .iter()
            .filter(|t| stored.contains(*t))
            .cloned()
            .collect();
        Ok(if selected.is_empty() { stored } else { selected })
    }

    pub async fn search(&self, query: &QueryObject) -> Result<SearchResultSet> {
        self.fan_out(query, false).await
    }

    /// Prefix/substring search across the entity's indices
    pub async fn ngram_search(&self, query: &QueryObject) -> Result<SearchResultSet> {
        self.fan_out(query, true).await
    }

    async fn fan_out(&self, query: &QueryObject, ngram: bool) -> Result<SearchResultSet> {
        let mut merged: Option<SearchResultSet> = None;
        if query.is_empty() {
            return Ok(SearchResultSet::new(query.term.clone()));
        }
        for type_name in self.resolve_search_types(query).await? {
            let handle = self.handle_for(&type_name);
            let result = if ngram {
                self.backend.ngram_search(&handle, query).await
            } else {
                self.backend.search(&handle, query).await
            };
            match result {
                Ok(hits) => {
                    let mut partial = SearchResultSet::new(query.term.clone());
                    partial.extend(hits);
                    merged = merge_search(merged, Some(partial));
                }
                Err(err) => {
                    warn!(entity = %self.entity, %type_name, %err, "type index failed during search, skipping");
                }
            }
        }
        Ok(merged.unwrap_or_else(|| SearchResultSet::new(query.term.clone())))
    }

    /// Fuzzy term completion. A backend without the suggest capability
    /// yields an empty result set here; callers that need a hard failure
    /// use the backend's `suggest` directly.
    pub async fn suggest(&self, query: &QueryObject) -> Result<SuggestResultSet> {
        let mut merged = SuggestResultSet::new(query.term.clone());
        if query.is_empty() || !self.backend.capabilities().suggest {
            return Ok(merged);
        }
        for type_name in self.resolve_search_types(query).await? {
            let handle = self.handle_for(&type_name);
            match self.backend.suggest(&handle, query).await {
                Ok(words) => merged.extend(words),
                Err(err) => {
                    warn!(entity = %self.entity, %type_name, %err, "type index failed during suggest, skipping");
                }
            }
        }
        Ok(merged)
    }

    /// Suggestion-assisted search: single terms are completed first and
    /// the best candidate searched; phrases search directly
    pub async fn suggest_and_search(
        &self,
        query: &QueryObject,
    ) -> Result<SuggestAndSearchResultSet> {
        if query.term.contains(' ') {
            let search = self.search(query).await?;
            return Ok(SuggestAndSearchResultSet::new(search, Vec::new()));
        }

        let suggestions = self.suggest(query).await?;
        match suggestions.first() {
            Some(candidate) => {
                let candidate_query = query.clone().with_term(candidate);
                let search = self.search(&candidate_query).await?;
                Ok(SuggestAndSearchResultSet::new(
                    search,
                    suggestions.suggestions().cloned().collect(),
                ))
            }
            None => {
                let search = self.search(query).await?;
                Ok(SuggestAndSearchResultSet::new(search, Vec::new()))
            }
        }
    }

    /// Index a content item. Returns false (a no-op, not an error) when
    /// the item resolves to empty text or an unknown type.
    pub async fn index_content(
        &self,
        item: &dyn ContentItem,
        type_override: Option<&str>,
    ) -> Result<bool> {
        let doc = self.resolver.resolve(item, type_override)?;
        if doc.is_empty() {
            debug!(entity = %self.entity, id = %doc.id, "empty content, skipping index");
            return Ok(false);
        }
        if !self.type_is_indexable(&doc) {
            return Ok(false);
        }
        let handle = self.handle_for(&doc.doc_type);
        self.backend.index_doc(&handle, &doc).await?;
        Ok(true)
    }

    /// Re-index a changed item, same no-op rules as [`Self::index_content`]
    pub async fn update_content(
        &self,
        item: &dyn ContentItem,
        type_override: Option<&str>,
    ) -> Result<bool> {
        let doc = self.resolver.resolve(item, type_override)?;
        if doc.is_empty() {
            debug!(entity = %self.entity, id = %doc.id, "empty content, skipping update");
            return Ok(false);
        }
        if !self.type_is_indexable(&doc) {
            return Ok(false);
        }
        let handle = self.handle_for(&doc.doc_type);
        self.backend.update_doc(&handle, &doc).await?;
        Ok(true)
    }

    /// Delete an item from its type index. Unknown ids are a no-op.
    pub async fn delete_content(&self, item: &dyn ContentItem) -> Result<bool> {
        let doc = self.resolver.resolve(item, None)?;
        let handle = self.handle_for(&doc.doc_type);
        self.backend.delete_doc(&handle, &doc.id).await?;
        Ok(true)
    }

    /// Drop the whole index for one type
    pub async fn remove_index(&self, type_name: &str) -> Result<()> {
        let handle = self.handle_for(type_name);
        self.backend.remove_index(&handle).await?;
        self.handles.remove(&handle.type_name);
        Ok(())
    }

    pub async fn has_stored_indices(&self) -> Result<bool> {
        Ok(!self.backend.stored_types(&self.entity).await?.is_empty())
    }

    pub async fn get_stored_indices(&self) -> Result<BTreeSet<String>> {
        self.backend.stored_types(&self.entity).await
    }

    fn type_is_indexable(&self, doc: &IndexableDocument) -> bool {
        if self.known_types.is_empty() || self.known_types.contains(&doc.doc_type) {
            return true;
        }
        warn!(entity = %self.entity, doc_type = %doc.doc_type, "unknown content type, skipping");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::catalog::CatalogBackend;
    use crate::backend::local::LocalBackend;
    use crate::document::testing::Note;
    use tempfile::TempDir;

    fn catalog_manager() -> EntityIndexManager {
        let config = SearchConfig::default();
        let backend = Arc::new(CatalogBackend::new(&config));
        EntityIndexManager::with_backend(
            "aizen",
            backend,
            config.known_types.into_iter().collect(),
        )
    }

    #[tokio::test]
    async fn index_then_search_round_trip() {
        let manager = catalog_manager();
        let note = Note::new("tag:note:1", "All Waves, Rise now and Become my Shield");
        assert!(manager.index_content(&note, None).await.unwrap());

        let result = manager.search(&QueryObject::new("shield")).await.unwrap();
        assert_eq!(result.hit_count(), 1);
        assert!(result.get("tag:note:1").is_some());
        assert_eq!(result.last_modified(), 100.0);
    }

    #[tokio::test]
    async fn empty_content_is_a_silent_no_op() {
        let manager = catalog_manager();
        let note = Note::new("tag:note:1", "   <p></p>  ");
        assert!(!manager.index_content(&note, None).await.unwrap());
        assert!(!manager.has_stored_indices().await.unwrap());
    }

    #[tokio::test]
    async fn unknown_types_are_skipped_at_write_time() {
        let manager = catalog_manager();
        let note = Note::new("tag:note:1", "some body");
        let indexed = manager
            .index_content(&note, Some("Mysteries"))
            .await
            .unwrap();
        assert!(!indexed);
    }

    #[tokio::test]
    async fn search_on_intersects_with_stored_types() {
        let manager = catalog_manager();
        let note = Note::new("tag:note:1", "shield of waves");
        let post = Note::new("tag:post:1", "shield of blades");
        manager.index_content(&note, None).await.unwrap();
        manager.index_content(&post, Some("Posts")).await.unwrap();

        let only_notes = manager
            .search(&QueryObject::new("shield").with_search_on(["Notes"]))
            .await
            .unwrap();
        assert_eq!(only_notes.hit_count(), 1);
        assert!(only_notes.get("tag:note:1").is_some());

        // no overlap with stored types falls back to everything
        let unknown = manager
            .search(&QueryObject::new("shield").with_search_on(["mysteries"]))
            .await
            .unwrap();
        assert_eq!(unknown.hit_count(), 2);

        let unfiltered = manager.search(&QueryObject::new("shield")).await.unwrap();
        assert_eq!(unfiltered.hit_count(), 2);
    }

    #[tokio::test]
    async fn delete_content_is_idempotent() {
        let manager = catalog_manager();
        let note = Note::new("tag:note:1", "solitary wave");
        manager.index_content(&note, None).await.unwrap();
        assert!(manager.delete_content(&note).await.unwrap());
        assert!(manager.delete_content(&note).await.unwrap());

        let result = manager.search(&QueryObject::new("wave")).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn suggest_and_search_reruns_first_candidate() {
        let manager = catalog_manager();
        let note = Note::new("tag:note:1", "raise the banner");
        manager.index_content(&note, None).await.unwrap();

        let combined = manager
            .suggest_and_search(&QueryObject::new("ra"))
            .await
            .unwrap();
        assert_eq!(combined.suggestions, vec!["raise".to_string()]);
        assert_eq!(combined.search.hit_count(), 1);
        assert!(combined.search.get("tag:note:1").is_some());
    }

    #[tokio::test]
    async fn suggest_and_search_with_phrase_searches_directly() {
        let manager = catalog_manager();
        let note = Note::new("tag:note:1", "raise the banner high");
        manager.index_content(&note, None).await.unwrap();

        let combined = manager
            .suggest_and_search(&QueryObject::new("raise the"))
            .await
            .unwrap();
        assert!(combined.suggestions.is_empty());
        assert_eq!(combined.search.hit_count(), 1);
    }

    #[tokio::test]
    async fn suggest_without_capability_is_empty_not_an_error() {
        let root = TempDir::new().unwrap();
        let config = SearchConfig {
            index_root: root.path().to_path_buf(),
            ..Default::default()
        };
        let backend = Arc::new(LocalBackend::new(&config).unwrap());
        let manager = EntityIndexManager::with_backend(
            "aizen",
            backend,
            config.known_types.into_iter().collect(),
        );
        let note = Note::new("tag:note:1", "raise the banner");
        manager.index_content(&note, None).await.unwrap();

        let suggestions = manager.suggest(&QueryObject::new("ra")).await.unwrap();
        assert!(suggestions.is_empty());
    }

    #[tokio::test]
    async fn remove_index_drops_the_type() {
        let manager = catalog_manager();
        let note = Note::new("tag:note:1", "wave");
        manager.index_content(&note, None).await.unwrap();
        assert!(manager.has_stored_indices().await.unwrap());

        manager.remove_index("Notes").await.unwrap();
        assert!(!manager.has_stored_indices().await.unwrap());
        assert!(manager.get_stored_indices().await.unwrap().is_empty());
    }
}
