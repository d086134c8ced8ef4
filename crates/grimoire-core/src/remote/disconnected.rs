use async_trait::async_trait;
use serde_json::Value;

use super::{RemoteDocument, RemoteError, RemoteResult, RemoteStore, RemoteWrite};
use crate::models::OwnerId;

/// Remote store used when no remote endpoint is configured.
///
/// Every call fails with [`RemoteError::Unavailable`], so writes stay queued.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisconnectedRemoteStore;

impl DisconnectedRemoteStore {
    fn unavailable<T>() -> RemoteResult<T> {
        Err(RemoteError::Unavailable("no remote store configured".into()))
    }
}

#[async_trait]
impl RemoteStore for DisconnectedRemoteStore {
    async fn get_document(&self, _collection: &str, _id: &str) -> RemoteResult<Option<Value>> {
        Self::unavailable()
    }

    async fn set_document(&self, _collection: &str, _id: &str, _data: &Value) -> RemoteResult<()> {
        Self::unavailable()
    }

    async fn delete_document(&self, _collection: &str, _id: &str) -> RemoteResult<()> {
        Self::unavailable()
    }

    async fn query_by_owner(
        &self,
        _collection: &str,
        _owner: &OwnerId,
    ) -> RemoteResult<Vec<RemoteDocument>> {
        Self::unavailable()
    }

    async fn commit_batch(&self, _writes: &[RemoteWrite]) -> RemoteResult<()> {
        Self::unavailable()
    }
}
