use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which index backend a deployment uses.
///
/// Selected once at construction time; never resolved dynamically at call
/// time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Embedded tantivy index, one physical index per (entity, type)
    Local,
    /// In-process ranked field index with a suggestion lexicon
    Catalog,
    /// Remote managed search service over HTTP
    Remote,
}

impl Default for BackendKind {
    fn default() -> Self {
        Self::Local
    }
}

/// Main search layer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Backend selection
    #[serde(default)]
    pub backend: BackendKind,

    /// Root directory for local on-disk indices
    #[serde(default = "default_index_root")]
    pub index_root: PathBuf,

    /// Type names the system knows how to index (lowercase singular).
    /// Empty means any resolvable type is accepted at write time.
    #[serde(default = "default_known_types")]
    pub known_types: Vec<String>,

    /// Writer lock acquisition settings
    #[serde(default)]
    pub writer: WriterConfig,

    /// Snippet/highlight tuning
    #[serde(default)]
    pub highlight: HighlightConfig,

    /// Remote backend settings (required when `backend = "remote"`)
    #[serde(default)]
    pub remote: Option<RemoteConfig>,

    /// Cross-process directory invalidation settings
    #[serde(default)]
    pub invalidation: Option<InvalidationConfig>,
}

impl SearchConfig {
    /// Load configuration from an optional TOML file and environment
    /// variables (prefix: CONTENTSEARCH, separator `__`).
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("CONTENTSEARCH_CONFIG").unwrap_or_else(|_| "config/search.toml".into());

        config::Config::builder()
            .add_source(config::File::with_name(&config_path).required(false))
            .add_source(
                config::Environment::with_prefix("CONTENTSEARCH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            index_root: default_index_root(),
            known_types: default_known_types(),
            writer: WriterConfig::default(),
            highlight: HighlightConfig::default(),
            remote: None,
            invalidation: None,
        }
    }
}

/// Writer lock acquisition settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Consecutive lock failures tolerated before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Upper bound of the randomized backoff sleep, in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Heap budget handed to the local index writer, in bytes
    #[serde(default = "default_writer_heap")]
    pub heap_size: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            heap_size: default_writer_heap(),
        }
    }
}

/// Snippet/highlight tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HighlightConfig {
    /// Maximum characters per snippet fragment window
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,

    /// Context characters kept on either side of a match
    #[serde(default = "default_surround")]
    pub surround: usize,

    /// Number of best-scoring fragments kept per document
    #[serde(default = "default_top_fragments")]
    pub top_fragments: usize,

    /// Tokens excluded from match scoring
    #[serde(default)]
    pub stopwords: Vec<String>,
}

impl Default for HighlightConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            surround: default_surround(),
            top_fragments: default_top_fragments(),
            stopwords: Vec::new(),
        }
    }
}

/// Remote backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the managed search service
    pub endpoint: String,

    /// Request timeout in seconds
    #[serde(default = "default_remote_timeout_secs")]
    pub timeout_secs: u64,
}

/// Cross-process directory invalidation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationConfig {
    /// Redis connection URL
    pub redis_url: String,

    /// Pub/sub channel carrying invalidation events
    #[serde(default = "default_invalidation_channel")]
    pub channel: String,
}

fn default_index_root() -> PathBuf {
    PathBuf::from("indices")
}

fn default_known_types() -> Vec<String> {
    ["note", "highlight", "redaction", "messageinfo", "post"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_max_attempts() -> u32 {
    40
}

fn default_base_delay_ms() -> u64 {
    250
}

fn default_writer_heap() -> usize {
    32 * 1024 * 1024
}

fn default_max_chars() -> usize {
    300
}

fn default_surround() -> usize {
    50
}

fn default_top_fragments() -> usize {
    3
}

fn default_remote_timeout_secs() -> u64 {
    30
}

fn default_invalidation_channel() -> String {
    "contentsearch:entity-directory".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_selects_local_backend() {
        let config = SearchConfig::default();
        assert_eq!(config.backend, BackendKind::Local);
        assert_eq!(config.writer.max_attempts, 40);
        assert_eq!(config.highlight.max_chars, 300);
        assert!(config.known_types.contains(&"note".to_string()));
    }

    #[test]
    fn backend_kind_deserializes_lowercase() {
        let kind: BackendKind = serde_json::from_str("\"catalog\"").unwrap();
        assert_eq!(kind, BackendKind::Catalog);
    }
}
