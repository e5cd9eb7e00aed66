//! Change notifications delivered to table subscribers.

use serde::{Deserialize, Serialize};

use crate::{OperationKind, Record};

/// What happened to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// A record was created.
    Insert,
    /// A record was modified.
    Update,
    /// A record was removed.
    Delete,
}

impl ChangeKind {
    /// The change produced by a write operation; `None` for selects.
    pub fn from_operation(kind: OperationKind) -> Option<Self> {
        match kind {
            OperationKind::Insert => Some(Self::Insert),
            OperationKind::Update => Some(Self::Update),
            OperationKind::Delete => Some(Self::Delete),
            OperationKind::Select => None,
        }
    }
}

/// How authoritative a change is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    /// Applied to the local cache only; the remote store has not confirmed it.
    Optimistic,
    /// Confirmed by the remote store.
    Confirmed,
    /// A previously optimistic change failed terminally and was rolled back.
    /// The record carries the restored state.
    Reverted,
}

/// A change to one record in one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Kind of change.
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    /// Table the record belongs to.
    pub table: String,
    /// The record after the change (the removed record for deletes).
    pub record: Record,
    /// Whether the change is optimistic, confirmed or reverted.
    pub status: ChangeStatus,
}

impl ChangeEvent {
    /// A change confirmed by the remote store.
    pub fn confirmed(kind: ChangeKind, table: impl Into<String>, record: Record) -> Self {
        Self {
            kind,
            table: table.into(),
            record,
            status: ChangeStatus::Confirmed,
        }
    }

    /// A change applied locally ahead of confirmation.
    pub fn optimistic(kind: ChangeKind, table: impl Into<String>, record: Record) -> Self {
        Self {
            kind,
            table: table.into(),
            record,
            status: ChangeStatus::Optimistic,
        }
    }

    /// A change that was rolled back.
    pub fn reverted(kind: ChangeKind, table: impl Into<String>, record: Record) -> Self {
        Self {
            kind,
            table: table.into(),
            record,
            status: ChangeStatus::Reverted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn select_produces_no_change() {
        assert_eq!(ChangeKind::from_operation(OperationKind::Select), None);
        assert_eq!(
            ChangeKind::from_operation(OperationKind::Delete),
            Some(ChangeKind::Delete)
        );
    }

    #[test]
    fn change_serializes_with_type_field() {
        let record = json!({"id": "t1"}).as_object().cloned().unwrap();
        let change = ChangeEvent::confirmed(ChangeKind::Insert, "tasks", record);
        let value = serde_json::to_value(&change).unwrap();
        assert_eq!(value["type"], "insert");
        assert_eq!(value["status"], "confirmed");
        assert_eq!(value["table"], "tasks");
    }
}
