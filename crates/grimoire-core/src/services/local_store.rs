//! Shared local store wrapper used by the sync engine and character service.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{Map, Value};

use crate::db::{
    CharacterRepository, Database, QueueRepository, SqliteCharacterRepository,
    SqliteQueueRepository,
};
use crate::models::{
    Character, CharacterId, EnqueueOutcome, OwnerId, QueueEntry, QueuedOperation, SyncStatus,
};
use crate::{Error, Result};

/// Thread-safe handle to the durable character and queue tables.
///
/// Every call holds the connection lock for one short synchronous
/// repository call, so nothing awaits while the lock is held.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
}

impl LocalStore {
    /// Open a local store at the given filesystem path.
    pub fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        tracing::debug!("Opening local store at {}", db_path.display());
        let db = Database::open(&db_path)?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory local store (primarily for tests).
    pub fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
        })
    }

    /// Path of the backing database file, if any.
    pub fn path(&self) -> Option<&PathBuf> {
        self.db_path.as_ref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Database>> {
        self.db
            .lock()
            .map_err(|_| Error::Database("local store lock poisoned".into()))
    }

    /// Fetch a character by id.
    pub fn get_character(&self, id: &CharacterId) -> Result<Option<Character>> {
        let db = self.lock()?;
        SqliteCharacterRepository::new(db.connection()).get(id)
    }

    /// Insert or replace a character.
    pub fn put_character(&self, character: &Character) -> Result<()> {
        let db = self.lock()?;
        SqliteCharacterRepository::new(db.connection()).put(character)
    }

    /// Merge changed top-level fields into a stored character.
    pub fn update_character(
        &self,
        id: &CharacterId,
        changes: &Map<String, Value>,
    ) -> Result<Character> {
        let db = self.lock()?;
        SqliteCharacterRepository::new(db.connection()).update(id, changes)
    }

    /// Delete a character, returning whether it existed.
    pub fn delete_character(&self, id: &CharacterId) -> Result<bool> {
        let db = self.lock()?;
        SqliteCharacterRepository::new(db.connection()).delete(id)
    }

    /// List an owner's characters.
    pub fn list_characters(&self, owner: &OwnerId) -> Result<Vec<Character>> {
        let db = self.lock()?;
        SqliteCharacterRepository::new(db.connection()).list_by_owner(owner)
    }

    /// Count an owner's characters.
    pub fn count_characters(&self, owner: &OwnerId) -> Result<usize> {
        let db = self.lock()?;
        SqliteCharacterRepository::new(db.connection()).count_by_owner(owner)
    }

    /// Change only the sync status of a character.
    pub fn set_sync_status(&self, id: &CharacterId, status: SyncStatus) -> Result<bool> {
        let db = self.lock()?;
        SqliteCharacterRepository::new(db.connection()).set_sync_status(id, status)
    }

    /// Mark a character synced unless it changed after `expected_last_modified`.
    pub fn mark_synced_if_unchanged(
        &self,
        id: &CharacterId,
        expected_last_modified: i64,
        now: i64,
    ) -> Result<bool> {
        let db = self.lock()?;
        SqliteCharacterRepository::new(db.connection()).mark_synced_if_unchanged(
            id,
            expected_last_modified,
            now,
        )
    }

    /// Fold an operation into the owner's queue.
    pub fn enqueue_operation(
        &self,
        owner: &OwnerId,
        op: &QueuedOperation,
        now: i64,
    ) -> Result<EnqueueOutcome> {
        let db = self.lock()?;
        SqliteQueueRepository::new(db.connection()).enqueue(owner, op, now)
    }

    /// Pending entries of an owner in enqueue order.
    pub fn queued_operations(&self, owner: &OwnerId) -> Result<Vec<QueueEntry>> {
        let db = self.lock()?;
        SqliteQueueRepository::new(db.connection()).list_for_owner(owner)
    }

    /// Number of pending entries of an owner.
    pub fn queued_count(&self, owner: &OwnerId) -> Result<usize> {
        let db = self.lock()?;
        SqliteQueueRepository::new(db.connection()).count_for_owner(owner)
    }

    /// Set the retry counter of a queue entry. Returns `false` when the
    /// entry was rewritten since it was read.
    pub fn set_retry_count(&self, entry: &QueueEntry, retry_count: u32) -> Result<bool> {
        let db = self.lock()?;
        SqliteQueueRepository::new(db.connection()).set_retry_count(entry, retry_count)
    }

    /// Remove queue entries that are unchanged since they were read.
    pub fn remove_queued(&self, entries: &[QueueEntry]) -> Result<usize> {
        let db = self.lock()?;
        SqliteQueueRepository::new(db.connection()).remove(entries)
    }

    /// Remove every pending entry targeting one document.
    pub fn remove_queued_for_document(
        &self,
        owner: &OwnerId,
        collection: &str,
        document_id: &str,
    ) -> Result<usize> {
        let db = self.lock()?;
        SqliteQueueRepository::new(db.connection()).remove_for_document(
            owner,
            collection,
            document_id,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_open_path_creates_parent_directory() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("nested").join("grimoire.db");

        let store = LocalStore::open_path(&path).unwrap();
        assert!(path.exists());
        assert_eq!(store.path(), Some(&path));
    }

    #[test]
    fn test_data_survives_reopen() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("grimoire.db");
        let owner = OwnerId::new("owner-1");
        let character = Character::new(owner.clone(), 1);

        {
            let store = LocalStore::open_path(&path).unwrap();
            store.put_character(&character).unwrap();
            store
                .enqueue_operation(
                    &owner,
                    &QueuedOperation::create("characters", character.id.as_str(), json!({})),
                    1,
                )
                .unwrap();
        }

        let store = LocalStore::open_path(&path).unwrap();
        assert_eq!(store.get_character(&character.id).unwrap(), Some(character));
        assert_eq!(store.queued_count(&owner).unwrap(), 1);
    }

    #[test]
    fn test_clones_share_connection() {
        let store = LocalStore::open_in_memory().unwrap();
        let clone = store.clone();
        let character = Character::new(OwnerId::new("owner-1"), 1);

        store.put_character(&character).unwrap();
        assert!(clone.get_character(&character.id).unwrap().is_some());
    }
}
