//! Mutation queue entries

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use super::owner::OwnerId;
use crate::error::{Error, Result};

/// Kind of remote write a queue entry stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Create and update both carry a full payload
    pub const fn carries_data(self) -> bool {
        matches!(self, Self::Create | Self::Update)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!("unknown operation '{other}'"))),
        }
    }
}

/// An intended remote write, as handed to the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedOperation {
    pub kind: OperationKind,
    pub collection: String,
    pub document_id: String,
    /// Full entity payload for create/update, `None` for delete
    pub data: Option<Value>,
}

impl QueuedOperation {
    pub fn create(collection: impl Into<String>, document_id: impl Into<String>, data: Value) -> Self {
        Self {
            kind: OperationKind::Create,
            collection: collection.into(),
            document_id: document_id.into(),
            data: Some(data),
        }
    }

    pub fn update(collection: impl Into<String>, document_id: impl Into<String>, data: Value) -> Self {
        Self {
            kind: OperationKind::Update,
            collection: collection.into(),
            document_id: document_id.into(),
            data: Some(data),
        }
    }

    pub fn delete(collection: impl Into<String>, document_id: impl Into<String>) -> Self {
        Self {
            kind: OperationKind::Delete,
            collection: collection.into(),
            document_id: document_id.into(),
            data: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.collection.trim().is_empty() || self.document_id.trim().is_empty() {
            return Err(Error::InvalidInput(
                "queued operation needs a collection and a document id".into(),
            ));
        }
        match (self.kind.carries_data(), self.data.is_some()) {
            (true, false) => Err(Error::InvalidInput(format!(
                "{} operation for {} requires data",
                self.kind, self.document_id
            ))),
            (false, true) => Err(Error::InvalidInput(format!(
                "delete operation for {} must not carry data",
                self.document_id
            ))),
            _ => Ok(()),
        }
    }
}

/// How a new operation folds into the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoalescePlan {
    /// No pending entry targets the document
    Append,
    /// Overwrite the pending entry in place
    Rewrite(i64),
    /// A pending delete already covers a new delete
    Keep(i64),
}

/// Result of handing an operation to the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Appended(i64),
    Coalesced(i64),
    Unchanged(i64),
    /// No owner was signed in; nothing was queued
    NoOwner,
}

impl QueuedOperation {
    /// Decide how this operation combines with the latest pending entry for
    /// the same `(collection, document_id, owner)`.
    ///
    /// A pending delete absorbs a new delete. Any other combination rewrites
    /// the pending entry, so a write after a delete overrides the delete.
    pub fn plan_against(&self, latest: Option<&QueueEntry>) -> CoalescePlan {
        match latest {
            None => CoalescePlan::Append,
            Some(entry)
                if entry.kind == OperationKind::Delete && self.kind == OperationKind::Delete =>
            {
                CoalescePlan::Keep(entry.id)
            }
            Some(entry) => CoalescePlan::Rewrite(entry.id),
        }
    }
}

/// A persisted, pending queue entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    /// Monotonically assigned local sequence id
    pub id: i64,
    pub kind: OperationKind,
    pub collection: String,
    pub document_id: String,
    pub data: Option<Value>,
    /// Enqueue time (Unix ms)
    pub timestamp: i64,
    pub retry_count: u32,
    pub owner_id: OwnerId,
    /// Bumped each time a later operation is coalesced into this entry
    pub revision: i64,
}

impl QueueEntry {
    /// `lastModified` of the carried payload, if any
    pub fn payload_last_modified(&self) -> Option<i64> {
        self.data
            .as_ref()
            .and_then(|data| data.get("lastModified"))
            .and_then(Value::as_i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn validate_requires_data_for_writes() {
        let mut op = QueuedOperation::update("characters", "a", json!({}));
        assert!(op.validate().is_ok());
        op.data = None;
        assert!(op.validate().is_err());
    }

    #[test]
    fn validate_rejects_data_on_delete() {
        let mut op = QueuedOperation::delete("characters", "a");
        assert!(op.validate().is_ok());
        op.data = Some(json!({}));
        assert!(op.validate().is_err());
    }

    #[test]
    fn validate_rejects_blank_target() {
        assert!(QueuedOperation::delete(" ", "a").validate().is_err());
        assert!(QueuedOperation::delete("characters", "").validate().is_err());
    }

    #[test]
    fn operation_kind_roundtrips_through_str() {
        for kind in [OperationKind::Create, OperationKind::Update, OperationKind::Delete] {
            assert_eq!(kind.as_str().parse::<OperationKind>().unwrap(), kind);
        }
        assert!("upsert".parse::<OperationKind>().is_err());
    }

    #[test]
    fn payload_last_modified_reads_payload_clock() {
        let entry = QueueEntry {
            id: 1,
            kind: OperationKind::Update,
            collection: "characters".into(),
            document_id: "a".into(),
            data: Some(json!({ "lastModified": 150 })),
            timestamp: 10,
            retry_count: 0,
            owner_id: OwnerId::new("o"),
            revision: 0,
        };
        assert_eq!(entry.payload_last_modified(), Some(150));
    }

    fn pending(kind: OperationKind) -> QueueEntry {
        QueueEntry {
            id: 7,
            kind,
            collection: "characters".into(),
            document_id: "a".into(),
            data: kind.carries_data().then(|| json!({})),
            timestamp: 1,
            retry_count: 3,
            owner_id: OwnerId::new("o"),
            revision: 0,
        }
    }

    #[test]
    fn plan_appends_without_pending_entry() {
        let op = QueuedOperation::update("characters", "a", json!({}));
        assert_eq!(op.plan_against(None), CoalescePlan::Append);
    }

    #[test]
    fn plan_keeps_pending_delete_for_new_delete() {
        let op = QueuedOperation::delete("characters", "a");
        let latest = pending(OperationKind::Delete);
        assert_eq!(op.plan_against(Some(&latest)), CoalescePlan::Keep(7));
    }

    #[test]
    fn plan_write_overrides_pending_delete() {
        let op = QueuedOperation::update("characters", "a", json!({}));
        let latest = pending(OperationKind::Delete);
        assert_eq!(op.plan_against(Some(&latest)), CoalescePlan::Rewrite(7));
    }

    #[test]
    fn plan_rewrites_pending_write() {
        let op = QueuedOperation::delete("characters", "a");
        let latest = pending(OperationKind::Create);
        assert_eq!(op.plan_against(Some(&latest)), CoalescePlan::Rewrite(7));
    }
}
