//! Remote document store contract and clients.
//!
//! The remote store is the authoritative copy of every character. It is
//! document oriented: per-document get/set/delete, an owner-scoped query, and
//! atomic multi-document batches of at most [`MAX_BATCH_WRITES`] writes.

mod disconnected;
mod http;
mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::models::{OperationKind, OwnerId, QueueEntry};

pub use disconnected::DisconnectedRemoteStore;
pub use http::HttpRemoteStore;
pub use memory::MemoryRemoteStore;

/// Largest number of writes a single atomic batch may carry
pub const MAX_BATCH_WRITES: usize = 500;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Remote HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Remote API error: {message} ({status})")]
    Api { status: u16, message: String },
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),
    #[error("Batch of {size} writes exceeds the limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },
    #[error("Invalid remote document: {0}")]
    InvalidDocument(String),
    #[error("Invalid remote configuration: {0}")]
    InvalidConfiguration(String),
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// A document as returned by an owner query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDocument {
    pub id: String,
    pub data: Value,
}

/// One write inside an atomic batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum RemoteWrite {
    /// Create or fully replace a document
    Set {
        collection: String,
        document_id: String,
        data: Value,
    },
    Delete {
        collection: String,
        document_id: String,
    },
}

impl RemoteWrite {
    /// Translate a queue entry into the write it stands for
    pub fn from_entry(entry: &QueueEntry) -> RemoteResult<Self> {
        match (entry.kind, &entry.data) {
            (OperationKind::Delete, _) => Ok(Self::Delete {
                collection: entry.collection.clone(),
                document_id: entry.document_id.clone(),
            }),
            (_, Some(data)) => Ok(Self::Set {
                collection: entry.collection.clone(),
                document_id: entry.document_id.clone(),
                data: data.clone(),
            }),
            (kind, None) => Err(RemoteError::InvalidDocument(format!(
                "{kind} for {} has no payload",
                entry.document_id
            ))),
        }
    }

    pub fn collection(&self) -> &str {
        match self {
            Self::Set { collection, .. } | Self::Delete { collection, .. } => collection,
        }
    }

    pub fn document_id(&self) -> &str {
        match self {
            Self::Set { document_id, .. } | Self::Delete { document_id, .. } => document_id,
        }
    }
}

/// Authoritative document store the sync engine reconciles with
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch one document, `None` if it does not exist
    async fn get_document(&self, collection: &str, id: &str) -> RemoteResult<Option<Value>>;

    /// Create or replace one document
    async fn set_document(&self, collection: &str, id: &str, data: &Value) -> RemoteResult<()>;

    /// Delete one document; deleting a missing document succeeds
    async fn delete_document(&self, collection: &str, id: &str) -> RemoteResult<()>;

    /// Every document of a collection whose owner field matches `owner`
    async fn query_by_owner(
        &self,
        collection: &str,
        owner: &OwnerId,
    ) -> RemoteResult<Vec<RemoteDocument>>;

    /// Apply all writes atomically: either every write lands or none does
    async fn commit_batch(&self, writes: &[RemoteWrite]) -> RemoteResult<()>;
}

/// Whether a stored document belongs to `owner`, honouring the legacy key
pub(crate) fn document_owned_by(data: &Value, owner: &OwnerId) -> bool {
    data.get("ownerId")
        .or_else(|| data.get("userId"))
        .and_then(Value::as_str)
        == Some(owner.as_str())
}
