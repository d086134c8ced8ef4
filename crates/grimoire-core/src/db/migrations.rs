//! Database migrations

use crate::error::Result;
use rusqlite::{Connection, OptionalExtension};

/// Current schema version
#[cfg(test)]
const CURRENT_VERSION: i32 = 4;

/// Run all pending migrations
pub fn run(conn: &mut Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        apply(conn, 1, MIGRATION_V1)?;
    }
    if version < 2 {
        apply(conn, 2, MIGRATION_V2)?;
    }
    if version < 3 {
        apply(conn, 3, MIGRATION_V3)?;
    }
    if version < 4 {
        apply(conn, 4, MIGRATION_V4)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get::<_, Option<i32>>(0)
        })
        .optional()?
        .flatten()
        .unwrap_or(0);

    Ok(version)
}

/// Version 1: character table
const MIGRATION_V1: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY
    )",
    // Full record lives in `data`; the other columns are indexed projections of it
    "CREATE TABLE IF NOT EXISTS characters (
        id TEXT PRIMARY KEY,
        owner_id TEXT NOT NULL,
        sync_status TEXT NOT NULL CHECK (sync_status IN ('synced', 'local', 'syncing')),
        updated_at INTEGER NOT NULL,
        data TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_characters_owner ON characters(owner_id)",
    "CREATE INDEX IF NOT EXISTS idx_characters_sync_status ON characters(sync_status)",
];

/// Version 2: pending mutation queue
const MIGRATION_V2: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS sync_queue (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        op TEXT NOT NULL CHECK (op IN ('create', 'update', 'delete')),
        collection TEXT NOT NULL,
        document_id TEXT NOT NULL,
        data TEXT,
        timestamp INTEGER NOT NULL,
        retry_count INTEGER NOT NULL DEFAULT 0,
        owner_id TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_sync_queue_owner_timestamp ON sync_queue(owner_id, timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_sync_queue_target ON sync_queue(collection, document_id, owner_id)",
];

/// Version 3: conflict-resolution clock on characters
const MIGRATION_V3: &[&str] = &[
    "ALTER TABLE characters ADD COLUMN last_modified INTEGER NOT NULL DEFAULT 0",
    "UPDATE characters SET last_modified = COALESCE(json_extract(data, '$.lastModified'), updated_at)",
    "CREATE INDEX IF NOT EXISTS idx_characters_last_modified ON characters(last_modified)",
];

/// Version 4: entry revision, bumped whenever a later operation is folded in
const MIGRATION_V4: &[&str] =
    &["ALTER TABLE sync_queue ADD COLUMN revision INTEGER NOT NULL DEFAULT 0"];

fn apply(conn: &mut Connection, version: i32, statements: &[&str]) -> Result<()> {
    let tx = conn.transaction()?;
    for stmt in statements {
        tx.execute(stmt, [])?;
    }
    tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    tx.commit()?;

    tracing::info!("Migrated database to version {version}");
    Ok(())
}
