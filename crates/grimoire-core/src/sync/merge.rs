//! Reconciliation of local and remote snapshots.
//!
//! Local wins when it holds unsynced edits or is strictly newer; otherwise
//! the remote copy wins. Remote-only records are appended in remote order.

use std::collections::HashMap;

use crate::models::{Character, SyncStatus};

/// What the merge needs to know about a record
pub trait SyncRecord {
    fn record_id(&self) -> &str;
    fn sync_status(&self) -> SyncStatus;
    fn last_modified(&self) -> i64;
}

impl SyncRecord for Character {
    fn record_id(&self) -> &str {
        self.id.as_str()
    }

    fn sync_status(&self) -> SyncStatus {
        self.sync_status
    }

    fn last_modified(&self) -> i64 {
        self.last_modified
    }
}

/// Which copy of a record survives a merge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    Local,
    Remote,
}

/// Pick the surviving copy of one record present on both sides
pub fn resolve<T: SyncRecord>(local: &T, remote: &T) -> Winner {
    if local.sync_status() == SyncStatus::Local || local.last_modified() > remote.last_modified() {
        Winner::Local
    } else {
        Winner::Remote
    }
}

/// Merge local and remote snapshots into one list.
///
/// Local order is preserved; remote records with no local counterpart follow
/// in the order the remote returned them.
pub fn merge<T: SyncRecord>(local: Vec<T>, remote: Vec<T>) -> Vec<T> {
    let index: HashMap<String, usize> = remote
        .iter()
        .enumerate()
        .map(|(position, record)| (record.record_id().to_string(), position))
        .collect();
    let mut remote: Vec<Option<T>> = remote.into_iter().map(Some).collect();

    let mut merged = Vec::with_capacity(local.len() + remote.len());
    for local_record in local {
        let counterpart = index
            .get(local_record.record_id())
            .and_then(|position| remote[*position].take());

        match counterpart {
            Some(remote_record) if resolve(&local_record, &remote_record) == Winner::Remote => {
                merged.push(remote_record);
            }
            _ => merged.push(local_record),
        }
    }

    merged.extend(remote.into_iter().flatten());
    merged
}
