//! Pluggable index backends
//!
//! One backend instance serves every (entity, type) index of a deployment;
//! the [`IndexHandle`] names which index an operation touches. The concrete
//! backend is selected once from configuration, never per call.

pub mod catalog;
pub mod local;
pub mod remote;

use crate::config::{BackendKind, SearchConfig};
use crate::document::{normalize_type_name, IndexableDocument};
use crate::error::{Result, SearchError};
use crate::query::QueryObject;
use crate::results::SearchHit;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Names one (entity, type) index.
///
/// The type name is canonicalized on construction so two handles for the
/// same logical index always compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexHandle {
    pub entity: String,
    pub type_name: String,
}

impl IndexHandle {
    pub fn new(entity: impl Into<String>, type_name: &str) -> Self {
        Self {
            entity: entity.into(),
            type_name: normalize_type_name(type_name),
        }
    }

    /// Stable on-disk/remote name for the entity's index set. Entity names
    /// are user-supplied, so they are hashed rather than used as paths.
    pub fn entity_key(&self) -> String {
        entity_key(&self.entity)
    }

    /// Cache key for per-handle state
    pub fn index_key(&self) -> String {
        format!("{}/{}", self.entity_key(), self.type_name)
    }
}

/// Stable hashed directory/index name for an entity
pub fn entity_key(entity: &str) -> String {
    let digest = Sha256::digest(entity.trim().to_lowercase().as_bytes());
    format!("{digest:x}")
}

/// What a backend can do beyond plain document search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCapabilities {
    /// Fuzzy term suggestion via a lexicon
    pub suggest: bool,

    /// Prefix/substring matching not bound to whole-word tokens
    pub ngram: bool,
}

/// Storage and query engine for per-(entity, type) text indices
#[async_trait]
pub trait IndexBackend: Send + Sync {
    fn capabilities(&self) -> BackendCapabilities;

    /// Add a document. Replaces any stored document with the same id.
    async fn index_doc(&self, handle: &IndexHandle, doc: &IndexableDocument) -> Result<()>;

    /// Re-index a changed document
    async fn update_doc(&self, handle: &IndexHandle, doc: &IndexableDocument) -> Result<()>;

    /// Remove by id; unknown ids are a no-op
    async fn delete_doc(&self, handle: &IndexHandle, id: &str) -> Result<()>;

    async fn search(&self, handle: &IndexHandle, query: &QueryObject) -> Result<Vec<SearchHit>>;

    /// Prefix/substring search; fails with
    /// [`SearchError::Unsupported`] when the capability is absent
    async fn ngram_search(
        &self,
        handle: &IndexHandle,
        query: &QueryObject,
    ) -> Result<Vec<SearchHit>>;

    /// Fuzzy term completion; fails with [`SearchError::Unsupported`]
    /// when the capability is absent
    async fn suggest(&self, handle: &IndexHandle, query: &QueryObject) -> Result<BTreeSet<String>>;

    async fn has_documents(&self, handle: &IndexHandle) -> Result<bool>;

    /// Drop the whole (entity, type) index
    async fn remove_index(&self, handle: &IndexHandle) -> Result<()>;

    /// Type names for which the entity currently has an index
    async fn stored_types(&self, entity: &str) -> Result<BTreeSet<String>>;
}

/// Build the configured backend
pub fn create_backend(config: &SearchConfig) -> Result<Arc<dyn IndexBackend>> {
    match config.backend {
        BackendKind::Local => Ok(Arc::new(local::LocalBackend::new(config)?)),
        BackendKind::Catalog => Ok(Arc::new(catalog::CatalogBackend::new(config))),
        BackendKind::Remote => {
            let remote = config.remote.as_ref().ok_or_else(|| {
                SearchError::Configuration(
                    "remote backend selected but no remote endpoint configured".into(),
                )
            })?;
            Ok(Arc::new(remote::RemoteBackend::new(
                remote,
                &config.highlight,
            )?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_canonicalizes_type_names() {
        let a = IndexHandle::new("aizen", "Notes");
        let b = IndexHandle::new("aizen", "note");
        assert_eq!(a, b);
        assert_eq!(a.type_name, "note");
    }

    #[test]
    fn entity_key_ignores_case_and_padding() {
        assert_eq!(entity_key("Aizen"), entity_key(" aizen "));
        assert_ne!(entity_key("aizen"), entity_key("gin"));
        assert_eq!(entity_key("aizen").len(), 64);
    }

    #[test]
    fn index_key_separates_types() {
        let notes = IndexHandle::new("aizen", "note");
        let posts = IndexHandle::new("aizen", "post");
        assert_ne!(notes.index_key(), posts.index_key());
        assert!(notes.index_key().ends_with("/note"));
    }
}
