//! Local record cache.
//!
//! Each cached row keeps two views:
//! - `current`: what readers see, including optimistic writes
//! - `confirmed`: the last version the remote store acknowledged
//!
//! Reverting a failed write rebuilds `current` from `confirmed` and replays
//! the writes still pending for that row, so one failure never discards
//! unrelated optimistic state.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use sync_core::QueuedOperation;
use sync_types::{
    matches_predicate, ChangeKind, OperationDescriptor, OperationKind, Record,
};

use crate::backend::VersionedRecord;

#[derive(Debug, Clone)]
struct ConfirmedRow {
    /// `None` when the store reports the row deleted.
    record: Option<Record>,
    version: u64,
}

#[derive(Debug, Clone, Default)]
struct CachedRow {
    current: Option<Record>,
    confirmed: Option<ConfirmedRow>,
}

/// Result of applying a write locally.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalChange {
    /// Kind of change.
    pub kind: ChangeKind,
    /// The row after the change (the removed row for deletes).
    pub record: Record,
}

/// Table -> id -> row cache with freshness tracking.
#[derive(Debug, Default)]
pub struct LocalCache {
    tables: BTreeMap<String, BTreeMap<String, CachedRow>>,
    refreshed: BTreeMap<String, Instant>,
}

impl LocalCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn row(&self, table: &str, id: &str) -> Option<&CachedRow> {
        self.tables.get(table)?.get(id)
    }

    fn row_mut(&mut self, table: &str, id: &str) -> &mut CachedRow {
        self.tables
            .entry(table.to_string())
            .or_default()
            .entry(id.to_string())
            .or_default()
    }

    /// The row as readers see it.
    pub fn get(&self, table: &str, id: &str) -> Option<&Record> {
        self.row(table, id)?.current.as_ref()
    }

    /// Whether readers would see the row.
    pub fn exists(&self, table: &str, id: &str) -> bool {
        self.get(table, id).is_some()
    }

    /// Visible rows of `table` matching `predicate`, ordered by id.
    pub fn select(&self, table: &str, predicate: Option<&Record>) -> Vec<Record> {
        self.tables
            .get(table)
            .map(|rows| {
                rows.values()
                    .filter_map(|row| row.current.as_ref())
                    .filter(|r| predicate.map_or(true, |p| matches_predicate(p, r)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of visible rows in `table`.
    pub fn len(&self, table: &str) -> usize {
        self.tables
            .get(table)
            .map_or(0, |rows| rows.values().filter(|r| r.current.is_some()).count())
    }

    /// Last version confirmed by the store, if any.
    pub fn known_version(&self, table: &str, id: &str) -> Option<u64> {
        self.row(table, id)?.confirmed.as_ref().map(|c| c.version)
    }

    /// Last confirmed contents, if any (and not deleted).
    pub fn confirmed(&self, table: &str, id: &str) -> Option<&Record> {
        self.row(table, id)?.confirmed.as_ref()?.record.as_ref()
    }

    /// Apply a write to the visible view only.
    ///
    /// Returns `None` for selects and for writes without a record id.
    pub fn apply_local(&mut self, descriptor: &OperationDescriptor) -> Option<LocalChange> {
        let kind = ChangeKind::from_operation(descriptor.operation)?;
        let id = descriptor.target_id()?;
        let row = self.row_mut(&descriptor.table, &id);
        let record = apply_to(&mut row.current, descriptor);
        Some(LocalChange { kind, record })
    }

    /// Record a version confirmed by the store, then replay `pending` writes
    /// for the same row on top. Returns the new visible row.
    pub fn confirm(
        &mut self,
        table: &str,
        remote: &VersionedRecord,
        pending: &[QueuedOperation],
    ) -> Option<Record> {
        let id = sync_types::record_id(&remote.record)?;
        let row = self.row_mut(table, &id);
        let confirmed = (!remote.deleted).then(|| remote.record.clone());
        row.confirmed = Some(ConfirmedRow {
            record: confirmed.clone(),
            version: remote.version,
        });
        row.current = confirmed;
        for op in pending {
            apply_to(&mut row.current, &op.descriptor);
        }
        row.current.clone()
    }

    /// Roll the visible row back to its confirmed state and replay the
    /// writes still `pending` for it. Returns the restored visible row.
    pub fn revert(&mut self, table: &str, id: &str, pending: &[QueuedOperation]) -> Option<Record> {
        let row = self.row_mut(table, id);
        row.current = row.confirmed.as_ref().and_then(|c| c.record.clone());
        for op in pending {
            apply_to(&mut row.current, &op.descriptor);
        }
        let restored = row.current.clone();

        if restored.is_none() && row.confirmed.is_none() {
            if let Some(rows) = self.tables.get_mut(table) {
                rows.remove(id);
            }
        }
        restored
    }

    /// Note that `table` was refreshed from the store at `at`.
    pub fn mark_refreshed(&mut self, table: &str, at: Instant) {
        self.refreshed.insert(table.to_string(), at);
    }

    /// Whether `table` was refreshed within `ttl` of `now`.
    pub fn is_fresh(&self, table: &str, ttl: Duration, now: Instant) -> bool {
        self.refreshed
            .get(table)
            .map_or(false, |at| now.saturating_duration_since(*at) < ttl)
    }
}

/// Apply a write to a visible row. Returns the record to report.
fn apply_to(current: &mut Option<Record>, descriptor: &OperationDescriptor) -> Record {
    match descriptor.operation {
        OperationKind::Insert => {
            let data = descriptor.data.clone().unwrap_or_default();
            *current = Some(data.clone());
            data
        }
        OperationKind::Update => {
            let mut merged = current.take().unwrap_or_default();
            for (key, value) in descriptor.data.iter().flatten() {
                merged.insert(key.clone(), value.clone());
            }
            *current = Some(merged.clone());
            merged
        }
        OperationKind::Delete => current
            .take()
            .or_else(|| descriptor.predicate.clone())
            .unwrap_or_default(),
        OperationKind::Select => current.clone().unwrap_or_default(),
    }
}
