//! Remote managed-search backend
//!
//! Documents are pushed over HTTP as versioned batch operations; every
//! add/delete carries a process-monotonic version so the service can
//! discard out-of-order writes. A batch response with a non-empty error
//! list always fails the call.

use super::{entity_key, BackendCapabilities, IndexBackend, IndexHandle};
use crate::config::{HighlightConfig, RemoteConfig};
use crate::document::IndexableDocument;
use crate::error::{Result, SearchError};
use crate::highlight::HighlightEngine;
use crate::query::QueryObject;
use crate::results::SearchHit;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct BatchEntry {
    #[serde(rename = "type")]
    op: &'static str,
    id: String,
    version: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<RemoteFields>,
}

#[derive(Debug, Serialize)]
struct RemoteFields {
    content: String,
    creator: String,
    container_id: String,
    keywords: Vec<String>,
    tags: Vec<String>,
    shared_with: Vec<String>,
    last_modified: f64,
}

impl From<&IndexableDocument> for RemoteFields {
    fn from(doc: &IndexableDocument) -> Self {
        Self {
            content: doc.text.clone(),
            creator: doc.creator.clone(),
            container_id: doc.container_id.clone(),
            keywords: doc.keywords.iter().cloned().collect(),
            tags: doc.tags.clone(),
            shared_with: doc.shared_with.iter().cloned().collect(),
            last_modified: doc.last_modified,
        }
    }
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    #[serde(default)]
    errors: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct HitFields {
    #[serde(default)]
    content: String,
    #[serde(default)]
    creator: String,
    #[serde(default)]
    container_id: String,
    #[serde(default)]
    last_modified: f64,
}

#[derive(Debug, Deserialize)]
struct RemoteHit {
    id: String,
    #[serde(default)]
    score: Option<f32>,
    #[serde(default)]
    fields: Option<HitFields>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Vec<RemoteHit>,
}

#[derive(Debug, Deserialize)]
struct StatsResponse {
    #[serde(default)]
    documents: u64,
}

#[derive(Debug, Deserialize)]
struct IndicesResponse {
    #[serde(default)]
    types: Vec<String>,
}

/// HTTP client for the managed search service
pub struct RemoteBackend {
    client: reqwest::Client,
    endpoint: String,
    highlighter: HighlightEngine,
    version: AtomicU64,
}

impl RemoteBackend {
    pub fn new(config: &RemoteConfig, highlight: &HighlightConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            highlighter: HighlightEngine::new(highlight),
            version: AtomicU64::new(0),
        })
    }

    fn index_url(&self, handle: &IndexHandle, suffix: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.endpoint,
            handle.entity_key(),
            handle.type_name,
            suffix
        )
    }

    /// Strictly increasing per process, anchored to wall-clock millis
    fn next_version(&self) -> u64 {
        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let prev = self
            .version
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(0);
        now.max(prev + 1)
    }

    async fn submit_batch(&self, handle: &IndexHandle, batch: &[BatchEntry]) -> Result<()> {
        let url = self.index_url(handle, "documents/batch");
        let response = self
            .client
            .post(&url)
            .json(batch)
            .send()
            .await?
            .error_for_status()?;
        let body: BatchResponse = response.json().await?;
        if !body.errors.is_empty() {
            return Err(SearchError::CommitFailed(body.errors.join("; ")));
        }
        Ok(())
    }

    async fn run_search(
        &self,
        handle: &IndexHandle,
        query: &QueryObject,
        ngram: bool,
    ) -> Result<Vec<SearchHit>> {
        let url = self.index_url(handle, "search");
        let mut request = self.client.get(&url).query(&[("q", query.term.as_str())]);
        request = request.query(&[("start", query.start.to_string())]);
        if let Some(limit) = query.limit {
            request = request.query(&[("size", limit.to_string())]);
        }
        if ngram {
            request = request.query(&[("ngram", "true")]);
        }

        let response = request.send().await?.error_for_status()?;
        let body: SearchResponse = response.json().await?;
        Ok(body
            .hits
            .into_iter()
            .map(|hit| {
                let fields = hit.fields.unwrap_or_default();
                let snippet = if ngram {
                    self.highlighter.highlight_ngram(query, &fields.content).0
                } else {
                    self.highlighter.snippet(query, &fields.content)
                };
                SearchHit {
                    id: hit.id,
                    doc_type: handle.type_name.clone(),
                    creator: fields.creator,
                    container_id: fields.container_id,
                    snippet,
                    last_modified: fields.last_modified,
                    score: if query.ranking {
                        hit.score.unwrap_or(1.0)
                    } else {
                        1.0
                    },
                }
            })
            .collect())
    }
}

#[async_trait]
impl IndexBackend for RemoteBackend {
    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            suggest: false,
            ngram: true,
        }
    }

    async fn index_doc(&self, handle: &IndexHandle, doc: &IndexableDocument) -> Result<()> {
        let batch = [BatchEntry {
            op: "add",
            id: doc.id.clone(),
            version: self.next_version(),
            fields: Some(RemoteFields::from(doc)),
        }];
        self.submit_batch(handle, &batch).await
    }

    async fn update_doc(&self, handle: &IndexHandle, doc: &IndexableDocument) -> Result<()> {
        self.index_doc(handle, doc).await
    }

    async fn delete_doc(&self, handle: &IndexHandle, id: &str) -> Result<()> {
        let batch = [BatchEntry {
            op: "delete",
            id: id.to_string(),
            version: self.next_version(),
            fields: None,
        }];
        self.submit_batch(handle, &batch).await
    }

    async fn search(&self, handle: &IndexHandle, query: &QueryObject) -> Result<Vec<SearchHit>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }
        self.run_search(handle, query, false).await
    }

    async fn ngram_search(
        &self,
        handle: &IndexHandle,
        query: &QueryObject,
    ) -> Result<Vec<SearchHit>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }
        // the service does its own fragment matching; the term goes through
        // unchanged
        self.run_search(handle, query, true).await
    }

    async fn suggest(
        &self,
        _handle: &IndexHandle,
        _query: &QueryObject,
    ) -> Result<BTreeSet<String>> {
        Err(SearchError::Unsupported("suggest"))
    }

    async fn has_documents(&self, handle: &IndexHandle) -> Result<bool> {
        let url = self.index_url(handle, "stats");
        let response = self.client.get(&url).send().await?.error_for_status()?;
        let body: StatsResponse = response.json().await?;
        Ok(body.documents > 0)
    }

    async fn remove_index(&self, handle: &IndexHandle) -> Result<()> {
        let url = format!(
            "{}/{}/{}",
            self.endpoint,
            handle.entity_key(),
            handle.type_name
        );
        self.client.delete(&url).send().await?.error_for_status()?;
        Ok(())
    }

    async fn stored_types(&self, entity: &str) -> Result<BTreeSet<String>> {
        let url = format!("{}/{}/indices", self.endpoint, entity_key(entity));
        let response = self.client.get(&url).send().await?.error_for_status()?;
        let body: IndicesResponse = response.json().await?;
        Ok(body.types.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn backend(url: &str) -> RemoteBackend {
        RemoteBackend::new(
            &RemoteConfig {
                endpoint: url.to_string(),
                timeout_secs: 5,
            },
            &HighlightConfig::default(),
        )
        .unwrap()
    }

    fn doc(id: &str, body: &str) -> IndexableDocument {
        IndexableDocument {
            id: id.into(),
            doc_type: "note".into(),
            creator: "aizen".into(),
            container_id: "tag:container:1".into(),
            text: body.into(),
            keywords: BTreeSet::new(),
            tags: Vec::new(),
            shared_with: BTreeSet::new(),
            last_modified: 10.0,
        }
    }

    fn batch_path(entity: &str, type_name: &str) -> String {
        format!("/{}/{}/documents/batch", entity_key(entity), type_name)
    }

    #[tokio::test]
    async fn batch_errors_fail_the_commit() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", batch_path("aizen", "note").as_str())
            .with_status(200)
            .with_body(r#"{"errors": ["document rejected: bad field"]}"#)
            .create_async()
            .await;

        let backend = backend(&server.url());
        let handle = IndexHandle::new("aizen", "note");
        let err = backend.index_doc(&handle, &doc("n1", "wave")).await.unwrap_err();

        assert!(matches!(err, SearchError::CommitFailed(_)));
        assert!(err.to_string().contains("document rejected"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn clean_batches_succeed_and_carry_versions() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", batch_path("aizen", "note").as_str())
            .match_body(Matcher::PartialJson(serde_json::json!([
                {"type": "add", "id": "n1"}
            ])))
            .with_status(200)
            .with_body(r#"{"errors": []}"#)
            .create_async()
            .await;

        let backend = backend(&server.url());
        let handle = IndexHandle::new("aizen", "note");
        backend.index_doc(&handle, &doc("n1", "wave")).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn search_round_trip_builds_snippets_locally() {
        let mut server = mockito::Server::new_async().await;
        let body = serde_json::json!({
            "hits": [{
                "id": "n1",
                "score": 2.5,
                "fields": {
                    "content": "Strike now and Become my Blade",
                    "creator": "aizen",
                    "container_id": "tag:container:1",
                    "last_modified": 10.0
                }
            }]
        });
        let _mock = server
            .mock(
                "GET",
                format!("/{}/note/search", entity_key("aizen")).as_str(),
            )
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(body.to_string())
            .create_async()
            .await;

        let backend = backend(&server.url());
        let handle = IndexHandle::new("aizen", "note");
        let hits = backend
            .search(&handle, &QueryObject::new("blade"))
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "n1");
        assert_eq!(hits[0].score, 2.5);
        assert!(hits[0].snippet.contains("Blade"));
    }

    #[tokio::test]
    async fn versions_strictly_increase() {
        let backend = backend("http://localhost:9");
        let mut last = 0;
        for _ in 0..100 {
            let version = backend.next_version();
            assert!(version > last);
            last = version;
        }
    }

    #[tokio::test]
    async fn stored_types_come_from_the_service() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", format!("/{}/indices", entity_key("aizen")).as_str())
            .with_status(200)
            .with_body(r#"{"types": ["note", "post"]}"#)
            .create_async()
            .await;

        let backend = backend(&server.url());
        let types = backend.stored_types("aizen").await.unwrap();
        assert_eq!(
            types,
            ["note", "post"].into_iter().map(String::from).collect()
        );
    }
}
