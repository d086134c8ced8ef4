//! Character repository implementation
//!
//! The full record is stored as JSON in `data`; `owner_id`, `sync_status`,
//! `updated_at` and `last_modified` are kept alongside it for indexed lookups.

#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // COUNT(*) is never negative

use crate::error::{Error, Result};
use crate::models::{Character, CharacterId, OwnerId, SyncStatus};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};

/// Trait for character storage operations
pub trait CharacterRepository {
    /// Get a character by ID
    fn get(&self, id: &CharacterId) -> Result<Option<Character>>;

    /// Insert or replace a character
    fn put(&self, character: &Character) -> Result<()>;

    /// Merge top-level fields into a stored character and return the result
    fn update(&self, id: &CharacterId, changes: &Map<String, Value>) -> Result<Character>;

    /// Delete a character, returning whether it existed
    fn delete(&self, id: &CharacterId) -> Result<bool>;

    /// List an owner's characters, oldest first
    fn list_by_owner(&self, owner: &OwnerId) -> Result<Vec<Character>>;

    /// Number of characters stored for an owner
    fn count_by_owner(&self, owner: &OwnerId) -> Result<usize>;

    /// Set only the sync status of a stored character
    fn set_sync_status(&self, id: &CharacterId, status: SyncStatus) -> Result<bool>;

    /// Mark a character synced at `now`, but only while its `last_modified`
    /// still equals `expected_last_modified`
    fn mark_synced_if_unchanged(
        &self,
        id: &CharacterId,
        expected_last_modified: i64,
        now: i64,
    ) -> Result<bool>;
}

/// `SQLite` implementation of `CharacterRepository`
pub struct SqliteCharacterRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteCharacterRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn decode(data: &str) -> Result<Character> {
        Ok(serde_json::from_str(data)?)
    }

    fn write(&self, character: &Character) -> Result<()> {
        let data = serde_json::to_string(character)?;
        self.conn.execute(
            "INSERT INTO characters (id, owner_id, sync_status, updated_at, last_modified, data)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                owner_id = excluded.owner_id,
                sync_status = excluded.sync_status,
                updated_at = excluded.updated_at,
                last_modified = excluded.last_modified,
                data = excluded.data",
            params![
                character.id.as_str(),
                character.owner_id.as_str(),
                character.sync_status.as_str(),
                character.updated_at,
                character.last_modified,
                data,
            ],
        )?;
        Ok(())
    }
}

impl CharacterRepository for SqliteCharacterRepository<'_> {
    fn get(&self, id: &CharacterId) -> Result<Option<Character>> {
        let data: Option<String> = self
            .conn
            .query_row(
                "SELECT data FROM characters WHERE id = ?",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        data.as_deref().map(Self::decode).transpose()
    }

    fn put(&self, character: &Character) -> Result<()> {
        self.write(character)
    }

    fn update(&self, id: &CharacterId, changes: &Map<String, Value>) -> Result<Character> {
        let tx = self.conn.unchecked_transaction()?;

        let current = self
            .get(id)?
            .ok_or_else(|| Error::NotFound(format!("character {id}")))?;

        let Value::Object(mut fields) = serde_json::to_value(&current)? else {
            return Err(Error::Database("stored character is not an object".into()));
        };
        for (key, value) in changes {
            fields.insert(key.clone(), value.clone());
        }

        // Decoding again rejects changes that break the record shape
        let mut updated: Character = serde_json::from_value(Value::Object(fields))?;
        updated.id = current.id;

        self.write(&updated)?;
        tx.commit()?;

        Ok(updated)
    }

    fn delete(&self, id: &CharacterId) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM characters WHERE id = ?", params![id.as_str()])?;
        Ok(affected > 0)
    }

    fn list_by_owner(&self, owner: &OwnerId) -> Result<Vec<Character>> {
        let mut stmt = self.conn.prepare(
            "SELECT data FROM characters WHERE owner_id = ? ORDER BY rowid ASC",
        )?;

        let rows = stmt
            .query_map(params![owner.as_str()], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.iter().map(|data| Self::decode(data)).collect()
    }

    fn count_by_owner(&self, owner: &OwnerId) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM characters WHERE owner_id = ?",
            params![owner.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn set_sync_status(&self, id: &CharacterId, status: SyncStatus) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        let Some(mut character) = self.get(id)? else {
            return Ok(false);
        };
        character.sync_status = status;
        self.write(&character)?;
        tx.commit()?;
        Ok(true)
    }

    fn mark_synced_if_unchanged(
        &self,
        id: &CharacterId,
        expected_last_modified: i64,
        now: i64,
    ) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        let Some(mut character) = self.get(id)? else {
            return Ok(false);
        };
        if character.last_modified != expected_last_modified {
            return Ok(false);
        }

        character.sync_status = SyncStatus::Synced;
        character.last_synced_at = Some(now);
        self.write(&character)?;
        tx.commit()?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn character(owner: &str, now: i64) -> Character {
        Character::new(OwnerId::new(owner), now)
    }

    #[test]
    fn test_put_and_get() {
        let db = setup();
        let repo = SqliteCharacterRepository::new(db.connection());

        let stored = character("owner-1", 10);
        repo.put(&stored).unwrap();

        let fetched = repo.get(&stored.id).unwrap().unwrap();
        assert_eq!(fetched, stored);
    }

    #[test]
    fn test_get_missing() {
        let db = setup();
        let repo = SqliteCharacterRepository::new(db.connection());
        assert!(repo.get(&CharacterId::new()).unwrap().is_none());
    }

    #[test]
    fn test_put_replaces_existing() {
        let db = setup();
        let repo = SqliteCharacterRepository::new(db.connection());

        let mut stored = character("owner-1", 10);
        repo.put(&stored).unwrap();
        stored.name = "Keyleth".to_string();
        repo.put(&stored).unwrap();

        assert_eq!(repo.get(&stored.id).unwrap().unwrap().name, "Keyleth");
        assert_eq!(repo.count_by_owner(&stored.owner_id).unwrap(), 1);
    }

    #[test]
    fn test_update_merges_fields() {
        let db = setup();
        let repo = SqliteCharacterRepository::new(db.connection());

        let stored = character("owner-1", 10);
        repo.put(&stored).unwrap();

        let mut changes = Map::new();
        changes.insert("armorClass".into(), json!(17));
        changes.insert("lastModified".into(), json!(20));
        let updated = repo.update(&stored.id, &changes).unwrap();

        assert_eq!(updated.armor_class, 17);
        assert_eq!(updated.last_modified, 20);
        assert_eq!(updated.name, stored.name);
        assert_eq!(repo.get(&stored.id).unwrap().unwrap(), updated);
    }

    #[test]
    fn test_update_rejects_malformed_fields() {
        let db = setup();
        let repo = SqliteCharacterRepository::new(db.connection());

        let stored = character("owner-1", 10);
        repo.put(&stored).unwrap();

        let mut changes = Map::new();
        changes.insert("armorClass".into(), json!("very high"));
        assert!(repo.update(&stored.id, &changes).is_err());
        assert_eq!(repo.get(&stored.id).unwrap().unwrap().armor_class, 10);
    }

    #[test]
    fn test_update_missing() {
        let db = setup();
        let repo = SqliteCharacterRepository::new(db.connection());
        let result = repo.update(&CharacterId::new(), &Map::new());
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_delete() {
        let db = setup();
        let repo = SqliteCharacterRepository::new(db.connection());

        let stored = character("owner-1", 10);
        repo.put(&stored).unwrap();

        assert!(repo.delete(&stored.id).unwrap());
        assert!(!repo.delete(&stored.id).unwrap());
        assert!(repo.get(&stored.id).unwrap().is_none());
    }

    #[test]
    fn test_list_and_count_by_owner() {
        let db = setup();
        let repo = SqliteCharacterRepository::new(db.connection());

        let first = character("owner-1", 1);
        let second = character("owner-1", 2);
        repo.put(&first).unwrap();
        repo.put(&second).unwrap();
        repo.put(&character("owner-2", 3)).unwrap();

        let owner = OwnerId::new("owner-1");
        let listed = repo.list_by_owner(&owner).unwrap();
        assert_eq!(listed, vec![first, second]);
        assert_eq!(repo.count_by_owner(&owner).unwrap(), 2);
        assert_eq!(repo.count_by_owner(&OwnerId::new("nobody")).unwrap(), 0);
    }

    #[test]
    fn test_mark_synced_if_unchanged() {
        let db = setup();
        let repo = SqliteCharacterRepository::new(db.connection());

        let stored = character("owner-1", 10);
        repo.put(&stored).unwrap();

        assert!(!repo.mark_synced_if_unchanged(&stored.id, 9, 50).unwrap());
        assert_eq!(
            repo.get(&stored.id).unwrap().unwrap().sync_status,
            SyncStatus::Local
        );

        assert!(repo.mark_synced_if_unchanged(&stored.id, 10, 50).unwrap());
        let synced = repo.get(&stored.id).unwrap().unwrap();
        assert_eq!(synced.sync_status, SyncStatus::Synced);
        assert_eq!(synced.last_synced_at, Some(50));
    }

    #[test]
    fn test_set_sync_status() {
        let db = setup();
        let repo = SqliteCharacterRepository::new(db.connection());

        let stored = character("owner-1", 10);
        repo.put(&stored).unwrap();

        assert!(repo.set_sync_status(&stored.id, SyncStatus::Syncing).unwrap());
        assert_eq!(
            repo.get(&stored.id).unwrap().unwrap().sync_status,
            SyncStatus::Syncing
        );
        assert!(!repo
            .set_sync_status(&CharacterId::new(), SyncStatus::Synced)
            .unwrap());
    }
}
