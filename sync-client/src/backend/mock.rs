//! Mock backend for testing.
//!
//! An in-memory versioned store. Tests can force failures, drop the
//! connection, and edit records "from another client" to provoke conflicts.

use super::{Backend, BackendError, ChangeBatch, RemoteWrite, VersionedRecord, WriteOutcome};
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use sync_types::{
    matches_predicate, record_id, Cursor, OperationDescriptor, OperationKind, Record,
};

/// Mock backend for testing.
///
/// Clones share state, so a test can keep a handle while the coordinator
/// owns another.
#[derive(Debug, Default)]
pub struct MockBackend {
    inner: Arc<Mutex<MockBackendInner>>,
}

#[derive(Debug, Default)]
struct MockBackendInner {
    connected: bool,
    connect_count: usize,
    tables: BTreeMap<String, BTreeMap<String, VersionedRecord>>,
    last_cursor: u64,
    applied: Vec<OperationDescriptor>,
    fail_next_connect: Option<String>,
    connect_delay: Option<Duration>,
    apply_failures: VecDeque<BackendError>,
    select_failures: VecDeque<BackendError>,
}

impl MockBackendInner {
    fn next_cursor(&mut self) -> Cursor {
        self.last_cursor += 1;
        Cursor::new(self.last_cursor)
    }

    /// Store a new version of `id`, bumping its version and the cursor.
    fn write(&mut self, table: &str, id: &str, record: Record, deleted: bool) -> VersionedRecord {
        let cursor = self.next_cursor();
        let rows = self.tables.entry(table.to_string()).or_default();
        let version = rows.get(id).map_or(1, |r| r.version + 1);
        let stored = VersionedRecord {
            record,
            version,
            cursor,
            deleted,
        };
        rows.insert(id.to_string(), stored.clone());
        stored
    }

    fn live(&self, table: &str, id: &str) -> Option<VersionedRecord> {
        self.tables
            .get(table)
            .and_then(|rows| rows.get(id))
            .filter(|r| !r.deleted)
            .cloned()
    }

    fn apply(&mut self, write: &RemoteWrite) -> Result<WriteOutcome, BackendError> {
        let desc = &write.descriptor;
        let id = desc
            .target_id()
            .ok_or_else(|| BackendError::Rejected("write has no record id".into()))?;
        let existing = self.live(&desc.table, &id);

        if let (Some(current), Some(expected)) = (&existing, write.expected_version) {
            if current.version != expected {
                return Ok(WriteOutcome::Conflict {
                    current: current.clone(),
                });
            }
        }

        let record = match desc.operation {
            OperationKind::Insert => {
                if let Some(current) = existing {
                    return Ok(WriteOutcome::Conflict { current });
                }
                let data = desc
                    .data
                    .clone()
                    .ok_or_else(|| BackendError::Rejected("insert without data".into()))?;
                self.write(&desc.table, &id, data, false)
            }
            OperationKind::Update => {
                let current = existing
                    .ok_or_else(|| BackendError::Rejected(format!("no {} row {id}", desc.table)))?;
                let mut merged = current.record;
                for (key, value) in desc.data.iter().flatten() {
                    merged.insert(key.clone(), value.clone());
                }
                self.write(&desc.table, &id, merged, false)
            }
            OperationKind::Delete => {
                let current = existing
                    .ok_or_else(|| BackendError::Rejected(format!("no {} row {id}", desc.table)))?;
                self.write(&desc.table, &id, current.record, true)
            }
            OperationKind::Select => {
                return Err(BackendError::Rejected("select is not a write".into()));
            }
        };
        Ok(WriteOutcome::Applied { record })
    }
}

impl MockBackend {
    /// Create a new mock backend.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockBackendInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Cause the next connect() to fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        self.lock().fail_next_connect = Some(error.to_string());
    }

    /// Make every connect() take `delay` before completing.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.lock().connect_delay = Some(delay);
    }

    /// Queue a failure for the next apply() call. Failures are consumed in
    /// order, one per call. A queued `ConnectionLost` also closes the
    /// session.
    pub fn fail_next_apply(&self, error: BackendError) {
        self.lock().apply_failures.push_back(error);
    }

    /// Queue a failure for the next select() call.
    pub fn fail_next_select(&self, error: BackendError) {
        self.lock().select_failures.push_back(error);
    }

    /// Close the session as if the network went away.
    pub fn drop_connection(&self) {
        self.lock().connected = false;
    }

    /// Write a record as another client would. Returns the stored version.
    pub fn remote_upsert(&self, table: &str, record: Record) -> Option<VersionedRecord> {
        let id = record_id(&record)?;
        Some(self.lock().write(table, &id, record, false))
    }

    /// Delete a record as another client would.
    pub fn remote_delete(&self, table: &str, id: &str) -> Option<VersionedRecord> {
        let mut inner = self.lock();
        let current = inner.live(table, id)?;
        Some(inner.write(table, id, current.record, true))
    }

    /// Current stored version of a live record.
    pub fn record(&self, table: &str, id: &str) -> Option<VersionedRecord> {
        self.lock().live(table, id)
    }

    /// Number of live records in `table`.
    pub fn row_count(&self, table: &str) -> usize {
        self.lock()
            .tables
            .get(table)
            .map_or(0, |rows| rows.values().filter(|r| !r.deleted).count())
    }

    /// Every write the store accepted or refused, in arrival order.
    pub fn applied_ops(&self) -> Vec<OperationDescriptor> {
        self.lock().applied.clone()
    }

    /// Number of successful connect() calls.
    pub fn connect_count(&self) -> usize {
        self.lock().connect_count
    }
}

impl Clone for MockBackend {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn connect(&self) -> Result<(), BackendError> {
        let delay = self.lock().connect_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.lock();

        if let Some(error) = inner.fail_next_connect.take() {
            return Err(BackendError::ConnectFailed(error));
        }

        inner.connected = true;
        inner.connect_count += 1;
        Ok(())
    }

    async fn close(&self) -> Result<(), BackendError> {
        self.lock().connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    async fn apply(&self, write: &RemoteWrite) -> Result<WriteOutcome, BackendError> {
        let mut inner = self.lock();

        if !inner.connected {
            return Err(BackendError::NotConnected);
        }

        if let Some(error) = inner.apply_failures.pop_front() {
            if matches!(error, BackendError::ConnectionLost(_)) {
                inner.connected = false;
            }
            return Err(error);
        }

        inner.applied.push(write.descriptor.clone());
        inner.apply(write)
    }

    async fn select(
        &self,
        table: &str,
        predicate: Option<&Record>,
    ) -> Result<Vec<VersionedRecord>, BackendError> {
        let mut inner = self.lock();

        if !inner.connected {
            return Err(BackendError::NotConnected);
        }
        if let Some(error) = inner.select_failures.pop_front() {
            return Err(error);
        }

        Ok(inner
            .tables
            .get(table)
            .map(|rows| {
                rows.values()
                    .filter(|r| !r.deleted)
                    .filter(|r| predicate.map_or(true, |p| matches_predicate(p, &r.record)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn changes_since(
        &self,
        table: &str,
        after: Cursor,
        limit: usize,
    ) -> Result<ChangeBatch, BackendError> {
        let inner = self.lock();

        if !inner.connected {
            return Err(BackendError::NotConnected);
        }

        let mut changed: Vec<VersionedRecord> = inner
            .tables
            .get(table)
            .map(|rows| rows.values().filter(|r| r.cursor > after).cloned().collect())
            .unwrap_or_default();
        changed.sort_by_key(|r| r.cursor);

        let has_more = changed.len() > limit;
        changed.truncate(limit);
        let max_cursor = changed.last().map_or(after, |r| r.cursor);

        Ok(ChangeBatch {
            records: changed,
            max_cursor,
            has_more,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: serde_json::Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    async fn connected() -> MockBackend {
        let backend = MockBackend::new();
        backend.connect().await.unwrap();
        backend
    }

    fn insert(id: &str) -> RemoteWrite {
        RemoteWrite::new(OperationDescriptor::insert(
            "tasks",
            obj(json!({"id": id, "title": "A"})),
        ))
    }

    #[tokio::test]
    async fn mock_backend_connects() {
        let backend = MockBackend::new();
        assert!(!backend.is_connected());

        backend.connect().await.unwrap();

        assert!(backend.is_connected());
        assert_eq!(backend.connect_count(), 1);
    }

    #[tokio::test]
    async fn apply_without_connect_fails() {
        let backend = MockBackend::new();
        let result = backend.apply(&insert("t1")).await;
        assert_eq!(result, Err(BackendError::NotConnected));
    }

    #[tokio::test]
    async fn insert_assigns_version_and_cursor() {
        let backend = connected().await;

        let outcome = backend.apply(&insert("t1")).await.unwrap();

        let WriteOutcome::Applied { record } = outcome else {
            panic!("expected applied");
        };
        assert_eq!(record.version, 1);
        assert_eq!(record.cursor, Cursor::new(1));
        assert_eq!(backend.row_count("tasks"), 1);
    }

    #[tokio::test]
    async fn duplicate_insert_conflicts() {
        let backend = connected().await;
        backend.apply(&insert("t1")).await.unwrap();

        let outcome = backend.apply(&insert("t1")).await.unwrap();
        assert!(matches!(outcome, WriteOutcome::Conflict { current } if current.version == 1));
    }

    #[tokio::test]
    async fn stale_expected_version_conflicts() {
        let backend = connected().await;
        backend.apply(&insert("t1")).await.unwrap();
        backend.remote_upsert("tasks", obj(json!({"id": "t1", "title": "B"})));

        let update = RemoteWrite::new(OperationDescriptor::update(
            "tasks",
            obj(json!({"id": "t1", "title": "C"})),
        ))
        .expecting(Some(1));

        let outcome = backend.apply(&update).await.unwrap();
        assert!(matches!(outcome, WriteOutcome::Conflict { current } if current.version == 2));
    }

    #[tokio::test]
    async fn update_merges_fields() {
        let backend = connected().await;
        backend.apply(&insert("t1")).await.unwrap();

        let update = RemoteWrite::new(OperationDescriptor::update(
            "tasks",
            obj(json!({"id": "t1", "done": true})),
        ))
        .expecting(Some(1));
        backend.apply(&update).await.unwrap();

        let stored = backend.record("tasks", "t1").unwrap();
        assert_eq!(stored.record, obj(json!({"id": "t1", "title": "A", "done": true})));
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn delete_leaves_tombstone_in_changes() {
        let backend = connected().await;
        backend.apply(&insert("t1")).await.unwrap();
        backend
            .apply(&RemoteWrite::new(OperationDescriptor::delete(
                "tasks",
                obj(json!({"id": "t1"})),
            )))
            .await
            .unwrap();

        assert!(backend.record("tasks", "t1").is_none());
        let changes = backend
            .changes_since("tasks", Cursor::zero(), 10)
            .await
            .unwrap();
        assert_eq!(changes.records.len(), 1);
        assert!(changes.records[0].deleted);
    }

    #[tokio::test]
    async fn changes_since_pages_in_cursor_order() {
        let backend = connected().await;
        for id in ["a", "b", "c"] {
            backend.apply(&insert(id)).await.unwrap();
        }

        let first = backend
            .changes_since("tasks", Cursor::zero(), 2)
            .await
            .unwrap();
        assert_eq!(first.records.len(), 2);
        assert!(first.has_more);
        assert_eq!(first.max_cursor, Cursor::new(2));

        let second = backend
            .changes_since("tasks", first.max_cursor, 2)
            .await
            .unwrap();
        assert_eq!(second.records.len(), 1);
        assert!(!second.has_more);
        assert_eq!(record_id(&second.records[0].record), Some("c".into()));
    }

    #[tokio::test]
    async fn forced_failures_are_consumed_in_order() {
        let backend = connected().await;
        backend.fail_next_apply(BackendError::Unavailable("busy".into()));
        backend.fail_next_apply(BackendError::ConnectionLost("reset".into()));

        assert_eq!(
            backend.apply(&insert("t1")).await,
            Err(BackendError::Unavailable("busy".into()))
        );
        assert!(backend.is_connected());
        assert!(matches!(
            backend.apply(&insert("t1")).await,
            Err(BackendError::ConnectionLost(_))
        ));
        assert!(!backend.is_connected());
        assert!(backend.applied_ops().is_empty());
    }

    #[tokio::test]
    async fn forced_connect_failure() {
        let backend = MockBackend::new();
        backend.fail_next_connect("network unreachable");

        let result = backend.connect().await;
        assert!(matches!(result, Err(BackendError::ConnectFailed(_))));
        assert!(!backend.is_connected());

        backend.connect().await.unwrap();
        assert!(backend.is_connected());
    }

    #[tokio::test]
    async fn select_filters_by_predicate() {
        let backend = connected().await;
        backend.remote_upsert("tasks", obj(json!({"id": "a", "status": "open"})));
        backend.remote_upsert("tasks", obj(json!({"id": "b", "status": "done"})));

        let predicate = obj(json!({"status": "open"}));
        let rows = backend.select("tasks", Some(&predicate)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].record["id"], "a");
    }
}
