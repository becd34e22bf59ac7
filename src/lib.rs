//! Embedded per-entity full-text search and indexing layer
//!
//! Each entity (a user or similar principal) owns a set of type-scoped
//! text indices searchable by keyword, wildcard prefix, phrase, and
//! fuzzy suggestion, with pluggable storage:
//!
//! - **Local**: embedded Tantivy indices on the filesystem, one per
//!   (entity, type)
//! - **Catalog**: in-process ranked field index with a suggestion lexicon
//! - **Remote**: a managed search service reached over HTTP with
//!   versioned batch commits
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │          EntityIndexManager (per entity)         │
//! ├─────────────────────────────────────────────────┤
//! │  - search() / ngram_search()                     │
//! │  - suggest() / suggest_and_search()              │
//! │  - index_content() / update / delete             │
//! └─────────────────────────────────────────────────┘
//!                      │ fans out per type, merges
//!                      ▼
//! ┌─────────────────────────────────────────────────┐
//! │      IndexBackend (local | catalog | remote)     │
//! ├─────────────────────────────────────────────────┤
//! │  - per-(entity, type) document operations        │
//! │  - writer lock via bounded randomized retry      │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! Snippets and match ranges come from the [`highlight::HighlightEngine`];
//! the process-local entity directory stays coherent across workers via
//! the redis pub/sub protocol in [`directory`].
//!
//! # Example
//!
//! ```no_run
//! use contentsearch::{EntityIndexManager, QueryObject, SearchConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SearchConfig::default();
//!     let manager = EntityIndexManager::new("aizen", &config)?;
//!
//!     let query = QueryObject::new("lightning strike").with_limit(20);
//!     let results = manager.search(&query).await?;
//!     println!("{} hit(s)", results.hit_count());
//!
//!     Ok(())
//! }
//! ```

pub mod analysis;
pub mod backend;
pub mod config;
pub mod coordinator;
pub mod directory;
pub mod document;
pub mod error;
pub mod highlight;
pub mod manager;
pub mod query;
pub mod results;

pub use backend::{create_backend, BackendCapabilities, IndexBackend, IndexHandle};
pub use config::{BackendKind, SearchConfig};
pub use directory::{
    DirectoryEntry, DirectoryIndex, DirectoryInvalidation, DirectoryOp, EntityLoader,
    InvalidationMessage,
};
pub use document::{ContentItem, DocumentResolver, IndexableDocument};
pub use error::{Result, SearchError};
pub use highlight::{Fragment, HighlightEngine};
pub use manager::EntityIndexManager;
pub use query::QueryObject;
pub use results::{
    merge_search, merge_suggest, merge_suggest_and_search, SearchHit, SearchResultSet,
    SuggestAndSearchResultSet, SuggestResultSet,
};
