//! Indexable document model and content resolution

use crate::analysis::clean_content;
use crate::error::{Result, SearchError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Canonicalize a content type name: lowercase, singular.
///
/// A trailing `s` is stripped unless the name ends in `ss`, which keeps the
/// mapping idempotent (`Notes -> note`, `address -> address`).
pub fn normalize_type_name(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    if lower.ends_with('s') && !lower.ends_with("ss") {
        lower[..lower.len() - 1].to_string()
    } else {
        lower
    }
}

/// A content item the platform wants indexed.
///
/// Implemented by the (external) content model; the search layer only ever
/// reads through this trait.
pub trait ContentItem: Send + Sync {
    /// Stable, backend-independent identifier
    fn id(&self) -> String;

    /// Declared content type (any casing/plurality)
    fn type_name(&self) -> String;

    /// Username of the creator
    fn creator(&self) -> String;

    /// Identifier of the containing object
    fn container_id(&self) -> String;

    /// Raw searchable body (may contain markup)
    fn body(&self) -> String;

    /// Free-form keyword terms
    fn keywords(&self) -> Vec<String> {
        Vec::new()
    }

    /// Ordered tag list
    fn tags(&self) -> Vec<String> {
        Vec::new()
    }

    /// Usernames the item is shared with
    fn shared_with(&self) -> Vec<String> {
        Vec::new()
    }

    /// Last-modified time, seconds since the epoch
    fn last_modified(&self) -> f64;
}

/// The canonical unit of indexing. Produced fresh per call and never
/// mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexableDocument {
    pub id: String,
    pub doc_type: String,
    pub creator: String,
    pub container_id: String,
    /// Cleaned searchable body: markup stripped, tokens joined by spaces
    pub text: String,
    pub keywords: BTreeSet<String>,
    pub tags: Vec<String>,
    pub shared_with: BTreeSet<String>,
    pub last_modified: f64,
}

impl IndexableDocument {
    /// True when there is nothing searchable in the body
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Adapts arbitrary content items into [`IndexableDocument`]s.
#[derive(Debug, Default, Clone)]
pub struct DocumentResolver;

impl DocumentResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve an item, optionally overriding its declared type.
    ///
    /// An empty resolved body is not an error here; callers decide whether
    /// to skip the document.
    pub fn resolve(
        &self,
        item: &dyn ContentItem,
        type_override: Option<&str>,
    ) -> Result<IndexableDocument> {
        let id = item.id();
        if id.trim().is_empty() {
            return Err(SearchError::Resolution(
                "content item has no stable identifier".into(),
            ));
        }

        let declared = type_override
            .map(str::to_string)
            .unwrap_or_else(|| item.type_name());
        if declared.trim().is_empty() {
            return Err(SearchError::Resolution(format!(
                "content item {} has no type name",
                id
            )));
        }

        Ok(IndexableDocument {
            id,
            doc_type: normalize_type_name(&declared),
            creator: item.creator(),
            container_id: item.container_id(),
            text: clean_content(&item.body()),
            keywords: lower_set(item.keywords()),
            tags: item.tags(),
            shared_with: lower_set(item.shared_with()),
            last_modified: item.last_modified(),
        })
    }
}

fn lower_set(words: Vec<String>) -> BTreeSet<String> {
    words
        .into_iter()
        .filter(|w| !w.trim().is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}
