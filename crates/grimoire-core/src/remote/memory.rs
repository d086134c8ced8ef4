//! In-memory remote store for tests and offline demos.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use super::{
    document_owned_by, RemoteDocument, RemoteError, RemoteResult, RemoteStore, RemoteWrite,
    MAX_BATCH_WRITES,
};
use crate::models::OwnerId;

type Collections = BTreeMap<String, BTreeMap<String, Value>>;

/// Remote store that keeps documents in process memory.
///
/// Batches are all-or-nothing. Failures can be injected to exercise the
/// retry path: [`fail_next_batches`](Self::fail_next_batches) rejects a
/// number of upcoming batches, [`set_unavailable`](Self::set_unavailable)
/// rejects every call until cleared. Clones share the same documents.
#[derive(Clone, Default)]
pub struct MemoryRemoteStore {
    collections: Arc<Mutex<Collections>>,
    failing_batches: Arc<AtomicUsize>,
    unavailable: Arc<AtomicBool>,
    writes: Arc<AtomicUsize>,
    batches: Arc<AtomicUsize>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Collections> {
        self.collections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Reject the next `count` batch commits
    pub fn fail_next_batches(&self, count: usize) {
        self.failing_batches.store(count, Ordering::SeqCst);
    }

    /// Reject every call while `unavailable` is set
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of document writes (set or delete) that landed
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of batches committed successfully
    pub fn batch_count(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    /// Peek at a stored document without going through the async API
    pub fn document(&self, collection: &str, id: &str) -> Option<Value> {
        self.lock()
            .get(collection)
            .and_then(|documents| documents.get(id))
            .cloned()
    }

    /// Seed a document without counting it as a write
    pub fn insert_document(&self, collection: &str, id: &str, data: Value) {
        self.lock()
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), data);
    }

    fn check_available(&self) -> RemoteResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("memory remote is offline".into()));
        }
        Ok(())
    }

    fn apply(collections: &mut Collections, write: &RemoteWrite) {
        match write {
            RemoteWrite::Set {
                collection,
                document_id,
                data,
            } => {
                collections
                    .entry(collection.clone())
                    .or_default()
                    .insert(document_id.clone(), data.clone());
            }
            RemoteWrite::Delete {
                collection,
                document_id,
            } => {
                if let Some(documents) = collections.get_mut(collection) {
                    documents.remove(document_id);
                }
            }
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn get_document(&self, collection: &str, id: &str) -> RemoteResult<Option<Value>> {
        self.check_available()?;
        Ok(self.document(collection, id))
    }

    async fn set_document(&self, collection: &str, id: &str, data: &Value) -> RemoteResult<()> {
        self.check_available()?;
        if !data.is_object() {
            return Err(RemoteError::InvalidDocument(format!(
                "{collection}/{id} must be a JSON object"
            )));
        }
        Self::apply(
            &mut self.lock(),
            &RemoteWrite::Set {
                collection: collection.to_string(),
                document_id: id.to_string(),
                data: data.clone(),
            },
        );
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_document(&self, collection: &str, id: &str) -> RemoteResult<()> {
        self.check_available()?;
        Self::apply(
            &mut self.lock(),
            &RemoteWrite::Delete {
                collection: collection.to_string(),
                document_id: id.to_string(),
            },
        );
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn query_by_owner(
        &self,
        collection: &str,
        owner: &OwnerId,
    ) -> RemoteResult<Vec<RemoteDocument>> {
        self.check_available()?;
        let collections = self.lock();
        let Some(documents) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        Ok(documents
            .iter()
            .filter(|(_, data)| document_owned_by(data, owner))
            .map(|(id, data)| RemoteDocument {
                id: id.clone(),
                data: data.clone(),
            })
            .collect())
    }

    async fn commit_batch(&self, writes: &[RemoteWrite]) -> RemoteResult<()> {
        self.check_available()?;
        if writes.len() > MAX_BATCH_WRITES {
            return Err(RemoteError::BatchTooLarge {
                size: writes.len(),
                limit: MAX_BATCH_WRITES,
            });
        }

        let injected = self
            .failing_batches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok();
        if injected {
            return Err(RemoteError::Unavailable("injected batch failure".into()));
        }

        // Stage on a copy so a bad write leaves nothing applied
        let mut collections = self.lock();
        let mut staged = collections.clone();
        for write in writes {
            if let RemoteWrite::Set { data, .. } = write {
                if !data.is_object() {
                    return Err(RemoteError::InvalidDocument(format!(
                        "{}/{} must be a JSON object",
                        write.collection(),
                        write.document_id()
                    )));
                }
            }
            Self::apply(&mut staged, write);
        }
        *collections = staged;
        drop(collections);

        self.writes.fetch_add(writes.len(), Ordering::SeqCst);
        self.batches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn set(id: &str, data: Value) -> RemoteWrite {
        RemoteWrite::Set {
            collection: "characters".into(),
            document_id: id.into(),
            data,
        }
    }

    #[tokio::test]
    async fn batch_applies_all_writes() {
        let store = MemoryRemoteStore::new();
        store
            .commit_batch(&[
                set("a", json!({ "ownerId": "o" })),
                set("b", json!({ "ownerId": "o" })),
                RemoteWrite::Delete {
                    collection: "characters".into(),
                    document_id: "a".into(),
                },
            ])
            .await
            .unwrap();

        assert!(store.document("characters", "a").is_none());
        assert!(store.document("characters", "b").is_some());
        assert_eq!(store.write_count(), 3);
        assert_eq!(store.batch_count(), 1);
    }

    #[tokio::test]
    async fn invalid_write_rolls_back_whole_batch() {
        let store = MemoryRemoteStore::new();
        let result = store
            .commit_batch(&[set("a", json!({ "ownerId": "o" })), set("b", json!(42))])
            .await;

        assert!(matches!(result, Err(RemoteError::InvalidDocument(_))));
        assert!(store.document("characters", "a").is_none());
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let store = MemoryRemoteStore::new();
        store.fail_next_batches(1);

        assert!(store.commit_batch(&[set("a", json!({}))]).await.is_err());
        assert!(store.commit_batch(&[set("a", json!({}))]).await.is_ok());
    }

    #[tokio::test]
    async fn oversized_batch_is_rejected() {
        let store = MemoryRemoteStore::new();
        let writes = (0..=MAX_BATCH_WRITES)
            .map(|i| set(&i.to_string(), json!({})))
            .collect::<Vec<_>>();

        let result = store.commit_batch(&writes).await;
        assert!(matches!(result, Err(RemoteError::BatchTooLarge { .. })));
    }

    #[tokio::test]
    async fn unavailable_rejects_every_call() {
        let store = MemoryRemoteStore::new();
        store.set_unavailable(true);
        assert!(store.get_document("characters", "a").await.is_err());
        assert!(store
            .query_by_owner("characters", &OwnerId::new("o"))
            .await
            .is_err());

        store.set_unavailable(false);
        assert_eq!(store.get_document("characters", "a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn query_filters_by_owner() {
        let store = MemoryRemoteStore::new();
        store.insert_document("characters", "a", json!({ "ownerId": "o" }));
        store.insert_document("characters", "b", json!({ "ownerId": "x" }));
        store.insert_document("characters", "c", json!({ "userId": "o" }));

        let ids = store
            .query_by_owner("characters", &OwnerId::new("o"))
            .await
            .unwrap()
            .into_iter()
            .map(|document| document.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(store.write_count(), 0);
    }
}
