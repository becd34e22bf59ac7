//! Process-local entity directory with cross-process invalidation
//!
//! Every worker process keeps a small in-memory directory of entities
//! (key, display name, aliases) for prefix lookups. Writes happen in one
//! process and are announced over a redis pub/sub channel; every other
//! process re-fetches the entity and updates its own copy. Messages carry
//! the publisher's origin id so its own listener can ignore them.

use crate::config::InvalidationConfig;
use crate::error::{Result, SearchError};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::RwLock;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Bounded re-fetch of an entity announced by another process, covering
/// read-after-write lag on the origin's storage
const LOAD_RETRIES: u32 = 5;
const LOAD_RETRY_DELAY: Duration = Duration::from_millis(100);

/// One directory record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// In-memory secondary index over directory entries
#[derive(Debug, Default)]
pub struct DirectoryIndex {
    entries: RwLock<HashMap<String, DirectoryEntry>>,
}

impl DirectoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, entry: DirectoryEntry) {
        self.entries.write().insert(entry.key.clone(), entry);
    }

    pub fn remove(&self, key: &str) {
        self.entries.write().remove(key);
    }

    pub fn get(&self, key: &str) -> Option<DirectoryEntry> {
        self.entries.read().get(key).cloned()
    }

    /// Entries whose name or any alias starts with the prefix,
    /// case-insensitive, sorted by key
    pub fn lookup_prefix(&self, prefix: &str) -> Vec<DirectoryEntry> {
        let prefix = prefix.to_lowercase();
        let mut found: Vec<DirectoryEntry> = self
            .entries
            .read()
            .values()
            .filter(|e| {
                e.name.to_lowercase().starts_with(&prefix)
                    || e.aliases
                        .iter()
                        .any(|a| a.to_lowercase().starts_with(&prefix))
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| a.key.cmp(&b.key));
        found
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// What happened to an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectoryOp {
    Created,
    Modified,
    Deleted,
}

/// The wire message exchanged between processes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationMessage {
    pub op: DirectoryOp,
    pub key: String,
    pub origin: Uuid,
}

/// Source of truth for directory entries, consulted when another process
/// announces a change
#[async_trait]
pub trait EntityLoader: Send + Sync {
    async fn load(&self, key: &str) -> Option<DirectoryEntry>;
}

/// Apply one received message to the local index. Messages from `own`
/// are ignored; the publishing process already updated its index.
async fn apply_message(
    index: &DirectoryIndex,
    loader: &dyn EntityLoader,
    own: Uuid,
    message: InvalidationMessage,
) {
    if message.origin == own {
        return;
    }
    match message.op {
        DirectoryOp::Deleted => {
            index.remove(&message.key);
        }
        DirectoryOp::Created | DirectoryOp::Modified => {
            for attempt in 1..=LOAD_RETRIES {
                if let Some(entry) = loader.load(&message.key).await {
                    index.upsert(entry);
                    return;
                }
                if attempt < LOAD_RETRIES {
                    tokio::time::sleep(LOAD_RETRY_DELAY).await;
                }
            }
            warn!(key = %message.key, retries = LOAD_RETRIES, "entity not readable after invalidation, dropping event");
        }
    }
}

/// Pub/sub bridge keeping a [`DirectoryIndex`] coherent across processes
pub struct DirectoryInvalidation {
    origin: Uuid,
    channel: String,
    publisher: ConnectionManager,
    listener: JoinHandle<()>,
}

impl DirectoryInvalidation {
    /// Connect, subscribe, and start the background listener
    pub async fn start(
        config: &InvalidationConfig,
        index: Arc<DirectoryIndex>,
        loader: Arc<dyn EntityLoader>,
    ) -> Result<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let publisher = ConnectionManager::new(client.clone()).await?;

        let mut pubsub = client.get_async_connection().await?.into_pubsub();
        pubsub.subscribe(&config.channel).await?;
        let origin = Uuid::new_v4();
        let channel = config.channel.clone();

        let listener = tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(err) => {
                        warn!(%err, "unreadable invalidation payload");
                        continue;
                    }
                };
                match serde_json::from_str::<InvalidationMessage>(&payload) {
                    Ok(message) => {
                        debug!(op = ?message.op, key = %message.key, "invalidation received");
                        apply_message(&index, loader.as_ref(), origin, message).await;
                    }
                    Err(err) => warn!(%err, "malformed invalidation message"),
                }
            }
        });

        Ok(Self {
            origin,
            channel,
            publisher,
            listener,
        })
    }

    pub fn origin(&self) -> Uuid {
        self.origin
    }

    /// Announce a local directory change to every other process
    pub async fn publish(&self, op: DirectoryOp, key: &str) -> Result<()> {
        let message = InvalidationMessage {
            op,
            key: key.to_string(),
            origin: self.origin,
        };
        let payload = serde_json::to_string(&message)
            .map_err(|e| SearchError::Channel(format!("cannot encode invalidation: {e}")))?;
        let mut publisher = self.publisher.clone();
        let _receivers: i64 = publisher.publish(&self.channel, payload).await?;
        Ok(())
    }

    /// Stop the listener. The publisher connection dies with self.
    pub fn close(self) {
        self.listener.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MapLoader {
        entries: HashMap<String, DirectoryEntry>,
        calls: AtomicUsize,
    }

    impl MapLoader {
        fn new(entries: impl IntoIterator<Item = DirectoryEntry>) -> Self {
            Self {
                entries: entries.into_iter().map(|e| (e.key.clone(), e)).collect(),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EntityLoader for MapLoader {
        async fn load(&self, key: &str) -> Option<DirectoryEntry> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.entries.get(key).cloned()
        }
    }

    fn entry(key: &str, name: &str) -> DirectoryEntry {
        DirectoryEntry {
            key: key.into(),
            name: name.into(),
            aliases: vec![format!("{name}-alias")],
        }
    }

    #[tokio::test]
    async fn own_origin_messages_are_ignored() {
        let index = DirectoryIndex::new();
        let loader = MapLoader::new([entry("k1", "Aizen")]);
        let own = Uuid::new_v4();

        apply_message(
            &index,
            &loader,
            own,
            InvalidationMessage {
                op: DirectoryOp::Created,
                key: "k1".into(),
                origin: own,
            },
        )
        .await;

        assert!(index.is_empty());
        assert_eq!(loader.calls(), 0);
    }

    #[tokio::test]
    async fn created_refetches_and_upserts() {
        let index = DirectoryIndex::new();
        let loader = MapLoader::new([entry("k1", "Aizen")]);

        apply_message(
            &index,
            &loader,
            Uuid::new_v4(),
            InvalidationMessage {
                op: DirectoryOp::Created,
                key: "k1".into(),
                origin: Uuid::new_v4(),
            },
        )
        .await;

        assert_eq!(index.get("k1").unwrap().name, "Aizen");
        assert_eq!(loader.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unreadable_entity_is_dropped_after_bounded_retries() {
        let index = DirectoryIndex::new();
        let loader = MapLoader::new([]);

        apply_message(
            &index,
            &loader,
            Uuid::new_v4(),
            InvalidationMessage {
                op: DirectoryOp::Modified,
                key: "ghost".into(),
                origin: Uuid::new_v4(),
            },
        )
        .await;

        assert!(index.is_empty());
        assert_eq!(loader.calls(), LOAD_RETRIES as usize);
    }

    #[tokio::test]
    async fn deleted_removes_without_refetch() {
        let index = DirectoryIndex::new();
        index.upsert(entry("k1", "Aizen"));
        let loader = MapLoader::new([entry("k1", "Aizen")]);

        apply_message(
            &index,
            &loader,
            Uuid::new_v4(),
            InvalidationMessage {
                op: DirectoryOp::Deleted,
                key: "k1".into(),
                origin: Uuid::new_v4(),
            },
        )
        .await;

        assert!(index.is_empty());
        assert_eq!(loader.calls(), 0);
    }

    #[test]
    fn prefix_lookup_covers_names_and_aliases() {
        let index = DirectoryIndex::new();
        index.upsert(entry("k1", "Aizen"));
        index.upsert(entry("k2", "Gin"));
        index.upsert(DirectoryEntry {
            key: "k3".into(),
            name: "Tousen".into(),
            aliases: vec!["Ai-adjacent".into()],
        });

        let found = index.lookup_prefix("ai");
        let keys: Vec<&str> = found.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["k1", "k3"]);
        assert!(index.lookup_prefix("zzz").is_empty());
    }

    #[test]
    fn message_wire_shape_is_stable() {
        let origin = Uuid::new_v4();
        let message = InvalidationMessage {
            op: DirectoryOp::Created,
            key: "k1".into(),
            origin,
        };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["op"], "created");
        assert_eq!(value["key"], "k1");

        let parsed: InvalidationMessage = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.op, DirectoryOp::Created);
        assert_eq!(parsed.origin, origin);
    }
}
