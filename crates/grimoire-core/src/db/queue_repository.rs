//! Sync queue repository implementation

#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // COUNT(*) is never negative

use crate::error::{Error, Result};
use crate::models::{CoalescePlan, EnqueueOutcome, OwnerId, QueueEntry, QueuedOperation};
use rusqlite::{params, Connection, OptionalExtension};

const ENTRY_COLUMNS: &str =
    "id, op, collection, document_id, data, timestamp, retry_count, owner_id, revision";

/// Trait for pending mutation storage
pub trait QueueRepository {
    /// Fold an operation into the owner's queue in one transaction
    fn enqueue(&self, owner: &OwnerId, op: &QueuedOperation, now: i64) -> Result<EnqueueOutcome>;

    /// Latest pending entry for a document of one owner
    fn latest_for(
        &self,
        owner: &OwnerId,
        collection: &str,
        document_id: &str,
    ) -> Result<Option<QueueEntry>>;

    /// All pending entries of an owner in enqueue order
    fn list_for_owner(&self, owner: &OwnerId) -> Result<Vec<QueueEntry>>;

    /// Number of pending entries of an owner
    fn count_for_owner(&self, owner: &OwnerId) -> Result<usize>;

    /// Set the retry counter of an entry, unless it was rewritten since read.
    /// Returns whether the entry was updated.
    fn set_retry_count(&self, entry: &QueueEntry, retry_count: u32) -> Result<bool>;

    /// Remove entries still at the revision they were read at, returning how
    /// many were removed
    fn remove(&self, entries: &[QueueEntry]) -> Result<usize>;

    /// Remove every pending entry for a document of one owner
    fn remove_for_document(
        &self,
        owner: &OwnerId,
        collection: &str,
        document_id: &str,
    ) -> Result<usize>;
}

/// `SQLite` implementation of `QueueRepository`
pub struct SqliteQueueRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteQueueRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn insert(&self, owner: &OwnerId, op: &QueuedOperation, now: i64) -> Result<i64> {
        let data = op.data.as_ref().map(serde_json::to_string).transpose()?;
        self.conn.execute(
            "INSERT INTO sync_queue (op, collection, document_id, data, timestamp, retry_count, owner_id)
             VALUES (?, ?, ?, ?, ?, 0, ?)",
            params![
                op.kind.as_str(),
                op.collection,
                op.document_id,
                data,
                now,
                owner.as_str(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn rewrite(&self, id: i64, op: &QueuedOperation, now: i64) -> Result<()> {
        let data = op.data.as_ref().map(serde_json::to_string).transpose()?;
        self.conn.execute(
            "UPDATE sync_queue
             SET op = ?, data = ?, timestamp = ?, retry_count = 0, revision = revision + 1
             WHERE id = ?",
            params![op.kind.as_str(), data, now, id],
        )?;
        Ok(())
    }

    /// Parse an entry from a database row
    fn parse_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEntry> {
        Ok(RawEntry {
            id: row.get(0)?,
            op: row.get(1)?,
            collection: row.get(2)?,
            document_id: row.get(3)?,
            data: row.get(4)?,
            timestamp: row.get(5)?,
            retry_count: row.get(6)?,
            owner_id: row.get(7)?,
            revision: row.get(8)?,
        })
    }
}

/// Row as stored, before the op and payload are decoded
struct RawEntry {
    id: i64,
    op: String,
    collection: String,
    document_id: String,
    data: Option<String>,
    timestamp: i64,
    retry_count: i64,
    owner_id: String,
    revision: i64,
}

impl TryFrom<RawEntry> for QueueEntry {
    type Error = Error;

    fn try_from(raw: RawEntry) -> Result<Self> {
        Ok(Self {
            id: raw.id,
            kind: raw.op.parse()?,
            collection: raw.collection,
            document_id: raw.document_id,
            data: raw.data.as_deref().map(serde_json::from_str).transpose()?,
            timestamp: raw.timestamp,
            retry_count: u32::try_from(raw.retry_count).unwrap_or(u32::MAX),
            owner_id: OwnerId::new(raw.owner_id),
            revision: raw.revision,
        })
    }
}

impl QueueRepository for SqliteQueueRepository<'_> {
    fn enqueue(&self, owner: &OwnerId, op: &QueuedOperation, now: i64) -> Result<EnqueueOutcome> {
        op.validate()?;

        let tx = self.conn.unchecked_transaction()?;
        let latest = self.latest_for(owner, &op.collection, &op.document_id)?;

        let outcome = match op.plan_against(latest.as_ref()) {
            CoalescePlan::Append => EnqueueOutcome::Appended(self.insert(owner, op, now)?),
            CoalescePlan::Rewrite(id) => {
                self.rewrite(id, op, now)?;
                EnqueueOutcome::Coalesced(id)
            }
            CoalescePlan::Keep(id) => EnqueueOutcome::Unchanged(id),
        };

        tx.commit()?;
        Ok(outcome)
    }

    fn latest_for(
        &self,
        owner: &OwnerId,
        collection: &str,
        document_id: &str,
    ) -> Result<Option<QueueEntry>> {
        let raw = self
            .conn
            .query_row(
                &format!(
                    "SELECT {ENTRY_COLUMNS} FROM sync_queue
                     WHERE owner_id = ? AND collection = ? AND document_id = ?
                     ORDER BY timestamp DESC, id DESC LIMIT 1"
                ),
                params![owner.as_str(), collection, document_id],
                Self::parse_entry,
            )
            .optional()?;

        raw.map(QueueEntry::try_from).transpose()
    }

    fn list_for_owner(&self, owner: &OwnerId) -> Result<Vec<QueueEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM sync_queue WHERE owner_id = ? ORDER BY timestamp ASC, id ASC"
        ))?;

        let rows = stmt
            .query_map(params![owner.as_str()], Self::parse_entry)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter().map(QueueEntry::try_from).collect()
    }

    fn count_for_owner(&self, owner: &OwnerId) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sync_queue WHERE owner_id = ?",
            params![owner.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn set_retry_count(&self, entry: &QueueEntry, retry_count: u32) -> Result<bool> {
        let affected = self.conn.execute(
            "UPDATE sync_queue SET retry_count = ? WHERE id = ? AND revision = ?",
            params![retry_count, entry.id, entry.revision],
        )?;
        Ok(affected > 0)
    }

    fn remove(&self, entries: &[QueueEntry]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.unchecked_transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM sync_queue WHERE id = ? AND revision = ?")?;
            for entry in entries {
                removed += stmt.execute(params![entry.id, entry.revision])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    fn remove_for_document(
        &self,
        owner: &OwnerId,
        collection: &str,
        document_id: &str,
    ) -> Result<usize> {
        let affected = self.conn.execute(
            "DELETE FROM sync_queue WHERE owner_id = ? AND collection = ? AND document_id = ?",
            params![owner.as_str(), collection, document_id],
        )?;
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::OperationKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn owner() -> OwnerId {
        OwnerId::new("owner-1")
    }

    #[test]
    fn test_enqueue_appends_first_operation() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());

        let op = QueuedOperation::create("characters", "a", json!({ "name": "Vax" }));
        let outcome = repo.enqueue(&owner(), &op, 100).unwrap();
        assert!(matches!(outcome, EnqueueOutcome::Appended(_)));

        let entries = repo.list_for_owner(&owner()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, OperationKind::Create);
        assert_eq!(entries[0].data, Some(json!({ "name": "Vax" })));
        assert_eq!(entries[0].timestamp, 100);
        assert_eq!(entries[0].retry_count, 0);
    }

    #[test]
    fn test_enqueue_coalesces_per_document() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());

        let first = repo
            .enqueue(&owner(), &QueuedOperation::update("characters", "a", json!({ "v": 1 })), 1)
            .unwrap();
        assert!(matches!(first, EnqueueOutcome::Appended(_)));
        let read = repo.list_for_owner(&owner()).unwrap().remove(0);
        assert!(repo.set_retry_count(&read, 2).unwrap());

        let second = repo
            .enqueue(&owner(), &QueuedOperation::update("characters", "a", json!({ "v": 2 })), 5)
            .unwrap();
        assert!(matches!(second, EnqueueOutcome::Coalesced(_)));

        let entries = repo.list_for_owner(&owner()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].data, Some(json!({ "v": 2 })));
        assert_eq!(entries[0].timestamp, 5);
        assert_eq!(entries[0].retry_count, 0);
        assert_eq!(entries[0].revision, read.revision + 1);
    }

    #[test]
    fn test_enqueue_write_overrides_pending_delete() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());

        repo.enqueue(&owner(), &QueuedOperation::delete("characters", "a"), 1)
            .unwrap();
        repo.enqueue(&owner(), &QueuedOperation::update("characters", "a", json!({})), 2)
            .unwrap();

        let entries = repo.list_for_owner(&owner()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, OperationKind::Update);
    }

    #[test]
    fn test_enqueue_repeated_delete_is_unchanged() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());

        repo.enqueue(&owner(), &QueuedOperation::delete("characters", "a"), 1)
            .unwrap();
        let outcome = repo
            .enqueue(&owner(), &QueuedOperation::delete("characters", "a"), 2)
            .unwrap();
        assert!(matches!(outcome, EnqueueOutcome::Unchanged(_)));
        assert_eq!(repo.list_for_owner(&owner()).unwrap()[0].timestamp, 1);
    }

    #[test]
    fn test_enqueue_rejects_invalid_operation() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());

        let mut op = QueuedOperation::update("characters", "a", json!({}));
        op.data = None;
        assert!(repo.enqueue(&owner(), &op, 1).is_err());
        assert_eq!(repo.count_for_owner(&owner()).unwrap(), 0);
    }

    #[test]
    fn test_queues_are_scoped_by_owner() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());

        let other = OwnerId::new("owner-2");
        repo.enqueue(&owner(), &QueuedOperation::delete("characters", "a"), 1)
            .unwrap();
        repo.enqueue(&other, &QueuedOperation::delete("characters", "a"), 1)
            .unwrap();

        assert_eq!(repo.count_for_owner(&owner()).unwrap(), 1);
        assert_eq!(repo.count_for_owner(&other).unwrap(), 1);
        assert_eq!(repo.list_for_owner(&other).unwrap()[0].owner_id, other);
    }

    #[test]
    fn test_list_orders_by_timestamp_then_id() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());

        repo.enqueue(&owner(), &QueuedOperation::delete("characters", "late"), 9)
            .unwrap();
        repo.enqueue(&owner(), &QueuedOperation::delete("characters", "early"), 3)
            .unwrap();
        repo.enqueue(&owner(), &QueuedOperation::delete("characters", "tie"), 3)
            .unwrap();

        let order = repo
            .list_for_owner(&owner())
            .unwrap()
            .into_iter()
            .map(|entry| entry.document_id)
            .collect::<Vec<_>>();
        assert_eq!(order, vec!["early", "tie", "late"]);
    }

    #[test]
    fn test_remove_and_remove_for_document() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());

        repo.enqueue(&owner(), &QueuedOperation::delete("characters", "a"), 1)
            .unwrap();
        repo.enqueue(&owner(), &QueuedOperation::delete("characters", "b"), 2)
            .unwrap();
        let entries = repo.list_for_owner(&owner()).unwrap();

        assert_eq!(repo.remove(&entries[..1]).unwrap(), 1);
        assert_eq!(repo.remove(&[]).unwrap(), 0);
        assert_eq!(repo.remove_for_document(&owner(), "characters", "b").unwrap(), 1);
        assert_eq!(repo.count_for_owner(&owner()).unwrap(), 0);
    }

    #[test]
    fn test_rewritten_entry_survives_stale_bookkeeping() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());

        repo.enqueue(&owner(), &QueuedOperation::update("characters", "a", json!({ "v": 1 })), 1)
            .unwrap();
        let read = repo.list_for_owner(&owner()).unwrap().remove(0);
        repo.enqueue(&owner(), &QueuedOperation::update("characters", "a", json!({ "v": 2 })), 2)
            .unwrap();

        assert!(!repo.set_retry_count(&read, 1).unwrap());
        assert_eq!(repo.remove(std::slice::from_ref(&read)).unwrap(), 0);

        let entries = repo.list_for_owner(&owner()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].data, Some(json!({ "v": 2 })));
        assert_eq!(entries[0].retry_count, 0);
    }
}
