//! Embedded tantivy backend
//!
//! One physical index per (entity, type) under the configured root:
//! `<root>/<entity hash>/<type>/`. Opened indices are cached; creation on
//! first use is idempotent under concurrent callers via the cache's entry
//! API. Writers are short-lived, taken per write through the lock
//! coordinator, and rolled back on any mid-write failure.

use super::{entity_key, BackendCapabilities, IndexBackend, IndexHandle};
use crate::config::SearchConfig;
use crate::coordinator::{self, LockContention, RetryPolicy};
use crate::document::IndexableDocument;
use crate::error::{Result, SearchError};
use crate::highlight::HighlightEngine;
use crate::query::QueryObject;
use crate::results::SearchHit;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tantivy::collector::{Count, TopDocs};
use tantivy::query::{AllQuery, Query, QueryParser, RegexQuery};
use tantivy::schema::{Field, Schema, Value, FAST, STORED, STRING, TEXT};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};

const DEFAULT_SEARCH_LIMIT: usize = 1_000;

/// Resolved schema fields of one opened index
#[derive(Debug, Clone, Copy)]
struct IndexFields {
    id: Field,
    content: Field,
    keywords: Field,
    tags: Field,
    shared_with: Field,
    creator: Field,
    container_id: Field,
    last_modified: Field,
}

struct OpenIndex {
    index: Index,
    reader: IndexReader,
    fields: IndexFields,
}

fn build_schema() -> Schema {
    let mut builder = Schema::builder();
    builder.add_text_field("id", STRING | STORED);
    builder.add_text_field("content", TEXT | STORED);
    builder.add_text_field("keywords", TEXT);
    builder.add_text_field("tags", TEXT);
    builder.add_text_field("shared_with", TEXT);
    builder.add_text_field("creator", STRING | STORED);
    builder.add_text_field("container_id", STRING | STORED);
    builder.add_f64_field("last_modified", FAST | STORED);
    builder.build()
}

fn resolve_fields(schema: &Schema) -> Result<IndexFields> {
    Ok(IndexFields {
        id: schema.get_field("id")?,
        content: schema.get_field("content")?,
        keywords: schema.get_field("keywords")?,
        tags: schema.get_field("tags")?,
        shared_with: schema.get_field("shared_with")?,
        creator: schema.get_field("creator")?,
        container_id: schema.get_field("container_id")?,
        last_modified: schema.get_field("last_modified")?,
    })
}

/// Embedded full-text backend holding indices on the local filesystem
pub struct LocalBackend {
    root: PathBuf,
    heap_size: usize,
    retry: RetryPolicy,
    highlighter: HighlightEngine,
    indices: DashMap<String, Arc<OpenIndex>>,
}

impl LocalBackend {
    pub fn new(config: &SearchConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.index_root).map_err(|e| {
            SearchError::IndexInit(format!(
                "cannot create index root {}: {e}",
                config.index_root.display()
            ))
        })?;
        Ok(Self {
            root: config.index_root.clone(),
            heap_size: config.writer.heap_size,
            retry: RetryPolicy::from(&config.writer),
            highlighter: HighlightEngine::new(&config.highlight),
            indices: DashMap::new(),
        })
    }

    fn index_path(&self, handle: &IndexHandle) -> PathBuf {
        self.root.join(handle.entity_key()).join(&handle.type_name)
    }

    fn index_exists(path: &Path) -> bool {
        path.join("meta.json").exists()
    }

    /// Open the index, creating it when `create` is set. Returns None for a
    /// read against an index that was never created.
    fn open(&self, handle: &IndexHandle, create: bool) -> Result<Option<Arc<OpenIndex>>> {
        let key = handle.index_key();
        if let Some(opened) = self.indices.get(&key) {
            return Ok(Some(opened.clone()));
        }

        let path = self.index_path(handle);
        if !create && !Self::index_exists(&path) {
            return Ok(None);
        }

        let opened = self
            .indices
            .entry(key)
            .or_try_insert_with(|| -> Result<Arc<OpenIndex>> {
                let index = if Self::index_exists(&path) {
                    Index::open_in_dir(&path)?
                } else {
                    std::fs::create_dir_all(&path).map_err(|e| {
                        SearchError::IndexInit(format!(
                            "cannot create index directory {}: {e}",
                            path.display()
                        ))
                    })?;
                    Index::create_in_dir(&path, build_schema())?
                };
                let fields = resolve_fields(&index.schema())?;
                let reader = index
                    .reader_builder()
                    .reload_policy(ReloadPolicy::Manual)
                    .try_into()?;
                Ok(Arc::new(OpenIndex {
                    index,
                    reader,
                    fields,
                }))
            })?
            .clone();
        Ok(Some(opened))
    }

    /// Take a fresh exclusive writer through the retry coordinator
    async fn acquire_writer(&self, opened: &OpenIndex) -> Result<IndexWriter<TantivyDocument>> {
        let heap = self.heap_size;
        let index = opened.index.clone();
        coordinator::acquire(&self.retry, move || {
            match index.writer::<TantivyDocument>(heap) {
                Ok(writer) => Ok(Ok(writer)),
                Err(tantivy::TantivyError::LockFailure(err, _)) => {
                    Err(LockContention(err.to_string()))
                }
                Err(other) => Ok(Err(SearchError::from(other))),
            }
        })
        .await?
    }

    fn to_tantivy(fields: &IndexFields, doc: &IndexableDocument) -> TantivyDocument {
        let mut out = TantivyDocument::new();
        out.add_text(fields.id, &doc.id);
        out.add_text(fields.content, &doc.text);
        for keyword in &doc.keywords {
            out.add_text(fields.keywords, keyword);
        }
        for tag in &doc.tags {
            out.add_text(fields.tags, tag);
        }
        for name in &doc.shared_with {
            out.add_text(fields.shared_with, name);
        }
        out.add_text(fields.creator, &doc.creator);
        out.add_text(fields.container_id, &doc.container_id);
        out.add_f64(fields.last_modified, doc.last_modified);
        out
    }

    fn build_query(&self, opened: &OpenIndex, query: &QueryObject) -> Result<Box<dyn Query>> {
        let fields = &opened.fields;
        if query.is_all() {
            return Ok(Box::new(AllQuery));
        }
        if query.is_wildcard() {
            let pattern = glob_to_regex(&query.term);
            return Ok(Box::new(RegexQuery::from_pattern(&pattern, fields.content)?));
        }
        let parser = QueryParser::for_index(
            &opened.index,
            vec![fields.content, fields.keywords, fields.tags],
        );
        let text = if query.is_phrase() {
            format!("\"{}\"", query.term.replace('"', " "))
        } else {
            query.term.clone()
        };
        Ok(parser.parse_query(&text)?)
    }

    fn collect_hits(
        &self,
        opened: &OpenIndex,
        handle: &IndexHandle,
        query: &QueryObject,
        tantivy_query: &dyn Query,
        ngram: bool,
    ) -> Result<Vec<SearchHit>> {
        let searcher = opened.reader.searcher();
        let limit = query.limit.unwrap_or(DEFAULT_SEARCH_LIMIT).max(1);
        let collector = TopDocs::with_limit(limit).and_offset(query.start);
        let top = searcher.search(tantivy_query, &collector)?;

        let fields = &opened.fields;
        let mut hits = Vec::with_capacity(top.len());
        for (score, address) in top {
            let stored: TantivyDocument = searcher.doc(address)?;
            let text_of = |field: Field| {
                stored
                    .get_first(field)
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string()
            };
            let content = text_of(fields.content);
            let snippet = if ngram {
                self.highlighter.highlight_ngram(query, &content).0
            } else {
                self.highlighter.snippet(query, &content)
            };
            hits.push(SearchHit {
                id: text_of(fields.id),
                doc_type: handle.type_name.clone(),
                creator: text_of(fields.creator),
                container_id: text_of(fields.container_id),
                snippet,
                last_modified: stored
                    .get_first(fields.last_modified)
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.0),
                score: if query.ranking { score } else { 1.0 },
            });
        }
        Ok(hits)
    }

    async fn write_doc(
        &self,
        handle: &IndexHandle,
        doc: &IndexableDocument,
    ) -> Result<()> {
        let opened = self
            .open(handle, true)?
            .ok_or_else(|| SearchError::IndexInit("index unavailable".into()))?;
        let mut writer = self.acquire_writer(&opened).await?;

        writer.delete_term(Term::from_field_text(opened.fields.id, &doc.id));
        let staged = writer
            .add_document(Self::to_tantivy(&opened.fields, doc))
            .map_err(SearchError::from)
            .and_then(|_| writer.commit().map_err(SearchError::from));
        if let Err(err) = staged {
            let _ = writer.rollback();
            return Err(err);
        }
        opened.reader.reload()?;
        Ok(())
    }
}

/// Translate a `*`/`?` glob into a whole-token regex over lowercased terms
fn glob_to_regex(term: &str) -> String {
    let mut out = String::new();
    for c in term.to_lowercase().chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out
}

#[async_trait]
impl IndexBackend for LocalBackend {
    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            suggest: false,
            ngram: true,
        }
    }

    async fn index_doc(&self, handle: &IndexHandle, doc: &IndexableDocument) -> Result<()> {
        self.write_doc(handle, doc).await
    }

    async fn update_doc(&self, handle: &IndexHandle, doc: &IndexableDocument) -> Result<()> {
        self.write_doc(handle, doc).await
    }

    async fn delete_doc(&self, handle: &IndexHandle, id: &str) -> Result<()> {
        let Some(opened) = self.open(handle, false)? else {
            return Ok(());
        };
        let mut writer = self.acquire_writer(&opened).await?;
        writer.delete_term(Term::from_field_text(opened.fields.id, id));
        if let Err(err) = writer.commit() {
            let _ = writer.rollback();
            return Err(err.into());
        }
        opened.reader.reload()?;
        Ok(())
    }

    async fn search(&self, handle: &IndexHandle, query: &QueryObject) -> Result<Vec<SearchHit>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let Some(opened) = self.open(handle, false)? else {
            return Ok(Vec::new());
        };
        let tantivy_query = self.build_query(&opened, query)?;
        self.collect_hits(&opened, handle, query, tantivy_query.as_ref(), false)
    }

    async fn ngram_search(
        &self,
        handle: &IndexHandle,
        query: &QueryObject,
    ) -> Result<Vec<SearchHit>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let Some(opened) = self.open(handle, false)? else {
            return Ok(Vec::new());
        };
        let needle: String = query
            .term
            .to_lowercase()
            .chars()
            .filter(|&c| c != '*' && c != '?')
            .collect();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let pattern = format!(".*{}.*", regex::escape(&needle));
        let tantivy_query = RegexQuery::from_pattern(&pattern, opened.fields.content)?;
        self.collect_hits(&opened, handle, query, &tantivy_query, true)
    }

    async fn suggest(
        &self,
        _handle: &IndexHandle,
        _query: &QueryObject,
    ) -> Result<BTreeSet<String>> {
        Err(SearchError::Unsupported("suggest"))
    }

    async fn has_documents(&self, handle: &IndexHandle) -> Result<bool> {
        let Some(opened) = self.open(handle, false)? else {
            return Ok(false);
        };
        let count = opened.reader.searcher().search(&AllQuery, &Count)?;
        Ok(count > 0)
    }

    async fn remove_index(&self, handle: &IndexHandle) -> Result<()> {
        self.indices.remove(&handle.index_key());
        let path = self.index_path(handle);
        if path.exists() {
            std::fs::remove_dir_all(&path).map_err(|e| {
                SearchError::Indexing(format!("cannot remove index {}: {e}", path.display()))
            })?;
        }
        Ok(())
    }

    async fn stored_types(&self, entity: &str) -> Result<BTreeSet<String>> {
        let dir = self.root.join(entity_key(entity));
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return Ok(BTreeSet::new());
        };
        Ok(entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().into_string().ok())
            .collect())
    }
}
