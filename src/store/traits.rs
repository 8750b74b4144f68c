//! Collaborator trait definitions

use crate::graph::RawGraph;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Errors raised by external collaborators
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for collaborator calls
pub type StoreResult<T> = Result<T, StoreError>;

/// Pattern queries against the knowledge-graph store
///
/// Used for the initial snapshot fetch and for focused lookups while
/// building comprehensive context.
#[async_trait]
pub trait GraphQuery: Send + Sync {
    async fn query(&self, pattern: &str, params: &Value) -> StoreResult<RawGraph>;
}

/// The document/object store
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document; `Ok(None)` when it does not exist
    async fn get_by_id(&self, id: &str) -> StoreResult<Option<Value>>;

    /// Apply a partial (possibly dot-path) update to a stored document
    async fn update(&self, id: &str, partial: &Value) -> StoreResult<()>;

    /// Replace a document wholesale
    async fn store(&self, id: &str, document: &Value) -> StoreResult<()>;
}

/// Third-party page the synthesis is appended to
#[async_trait]
pub trait PublishTarget: Send + Sync {
    async fn append_content(&self, target_id: &str, content: &str) -> StoreResult<()>;
}
