//! Error types for index and search operations

/// Result type for search operations
pub type Result<T> = std::result::Result<T, SearchError>;

/// Errors that can occur during indexing, querying, or coordination
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// Index initialization failed
    #[error("Index initialization failed: {0}")]
    IndexInit(String),

    /// Query parsing failed
    #[error("Query parsing failed: {0}")]
    QueryParsing(String),

    /// Search execution failed
    #[error("Search execution failed: {0}")]
    SearchFailed(String),

    /// Document indexing failed
    #[error("Document indexing failed: {0}")]
    Indexing(String),

    /// Content could not be resolved into an indexable document
    #[error("Content resolution failed: {0}")]
    Resolution(String),

    /// Exclusive writer lock not obtained within the retry budget
    #[error("Writer lock not acquired after {attempts} attempt(s): {reason}")]
    LockTimeout { attempts: u32, reason: String },

    /// Remote batch commit reported per-document errors
    #[error("Batch commit reported errors: {0}")]
    CommitFailed(String),

    /// Backend does not implement the requested operation
    #[error("Operation not supported by this backend: {0}")]
    Unsupported(&'static str),

    /// Remote search service error
    #[error("Remote service error: {0}")]
    Remote(String),

    /// Invalidation channel error
    #[error("Invalidation channel error: {0}")]
    Channel(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tantivy::TantivyError> for SearchError {
    fn from(err: tantivy::TantivyError) -> Self {
        SearchError::SearchFailed(err.to_string())
    }
}

impl From<tantivy::query::QueryParserError> for SearchError {
    fn from(err: tantivy::query::QueryParserError) -> Self {
        SearchError::QueryParsing(err.to_string())
    }
}

impl From<redis::RedisError> for SearchError {
    fn from(err: redis::RedisError) -> Self {
        SearchError::Channel(err.to_string())
    }
}

impl From<reqwest::Error> for SearchError {
    fn from(err: reqwest::Error) -> Self {
        SearchError::Remote(err.to_string())
    }
}

impl From<config::ConfigError> for SearchError {
    fn from(err: config::ConfigError) -> Self {
        SearchError::Configuration(err.to_string())
    }
}
