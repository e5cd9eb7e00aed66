//! SyncCoordinator - the single entry point for reads and writes.
//!
//! # Architecture
//!
//! The coordinator owns the local cache and the offline queue, and
//! interprets the pure components from sync-core against a [`Backend`]:
//!
//! ```text
//! Application → SyncCoordinator ─┬─► LocalCache (optimistic + confirmed views)
//!                    │           ├─► OfflineQueue (sync-core)
//!                    │           └─► ConflictResolver (sync-core)
//!                    ↓
//!           ConnectionManager → Backend
//! ```
//!
//! Writes made offline are applied to the cache at once and queued. Writes
//! made online go straight to the store; a retryable failure parks them in
//! the queue behind anything already waiting, so replay order always
//! matches submission order. Subscribers see `Optimistic`, `Confirmed` and
//! `Reverted` changes.
//!
//! # Example
//!
//! ```ignore
//! let coordinator = SyncCoordinator::new(MockBackend::new(), SyncConfig::default());
//! coordinator.configure_sync_for_table(TableSyncConfig::new("tasks"))?;
//! coordinator.execute_operation(OperationDescriptor::insert("tasks", record)).await?;
//! coordinator.connect().await?;
//! coordinator.sync(Some("tasks")).await?;
//! ```

mod replay;

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use sync_core::{
    check_references, ConflictResolver, ConflictStrategy, CustomResolver, ListenerHandle,
    ListenerSet, OfflineQueue, QueuedOperation, StatusSnapshot, SubscribeOptions, Subscription,
    SubscriptionRegistry, TableCursors, Throttle,
};
use sync_types::{
    record_id, ChangeEvent, ChangeKind, OperationDescriptor, OperationId, OperationKind, Record,
};
use tokio::sync::Mutex as AsyncMutex;

use crate::backend::{Backend, VersionedRecord};
use crate::cache::{LocalCache, LocalChange};
use crate::config::{CacheStrategy, ConflictResolution, SyncConfig, TableSyncConfig};
use crate::connection::ConnectionManager;
use crate::error::SyncError;
use crate::store::QueueStore;

/// Result of [`SyncCoordinator::execute_operation`].
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResult {
    /// Rows read, or the row as written.
    pub data: Vec<Record>,
    /// Whether the result comes from the local cache rather than the store.
    pub cached: bool,
}

/// A queued write that failed terminally during background replay.
#[derive(Debug, Clone)]
pub struct ReplayFailure {
    /// The failed write.
    pub operation: OperationDescriptor,
    /// Attempts made.
    pub attempts: u32,
    /// Why it failed.
    pub error: String,
}

/// Final outcome of a write some caller is waiting on.
enum Settlement {
    Applied(Vec<Record>),
    Failed(SyncError),
}

struct TableEntry {
    config: TableSyncConfig,
    strategy: ConflictStrategy,
}

/// Coordinates the local cache, offline queue and remote store.
pub struct SyncCoordinator<B: Backend> {
    backend: Arc<B>,
    connection: ConnectionManager<B>,
    config: SyncConfig,
    resolver: ConflictResolver,
    cache: Mutex<LocalCache>,
    queue: Mutex<OfflineQueue>,
    /// Queued writes whose submitting call is still waiting for them.
    awaiting: Mutex<HashMap<OperationId, Option<Settlement>>>,
    tables: DashMap<String, TableEntry>,
    resolvers: DashMap<String, CustomResolver>,
    subscriptions: SubscriptionRegistry,
    errors: ListenerSet<ReplayFailure>,
    /// Per-table sync gates.
    gates: DashMap<String, Arc<AsyncMutex<Throttle>>>,
    /// Only one replay runs at a time.
    replay_lock: AsyncMutex<()>,
    persist_lock: AsyncMutex<()>,
    cursors: Mutex<TableCursors>,
    paused: AtomicBool,
    store: Option<Arc<dyn QueueStore>>,
}

impl<B: Backend> SyncCoordinator<B> {
    /// Create a coordinator for `backend`. Starts disconnected.
    pub fn new(backend: B, config: SyncConfig) -> Self {
        let backend = Arc::new(backend);
        let queue = OfflineQueue::new(config.queue_capacity).with_max_attempts(config.max_attempts);
        Self {
            connection: ConnectionManager::new(Arc::clone(&backend)),
            backend,
            resolver: ConflictResolver::new().with_tie_break(config.tie_break),
            paused: AtomicBool::new(config.start_paused),
            config,
            cache: Mutex::new(LocalCache::new()),
            queue: Mutex::new(queue),
            awaiting: Mutex::new(HashMap::new()),
            tables: DashMap::new(),
            resolvers: DashMap::new(),
            subscriptions: SubscriptionRegistry::new(),
            errors: ListenerSet::new(),
            gates: DashMap::new(),
            replay_lock: AsyncMutex::new(()),
            persist_lock: AsyncMutex::new(()),
            cursors: Mutex::new(TableCursors::new()),
            store: None,
        }
    }

    /// Persist the offline queue to `store` after every change.
    pub fn with_store(mut self, store: Arc<dyn QueueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Load a previously persisted queue and re-apply its writes to the
    /// cache. Returns the number of restored operations.
    pub async fn restore_queue(&self) -> Result<usize, SyncError> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let ops = store.load().await?;
        let count = ops.len();
        {
            let mut cache = lock(&self.cache);
            let mut queue = lock(&self.queue);
            queue.restore(ops.clone())?;
            for op in &ops {
                cache.apply_local(&op.descriptor);
            }
        }
        if count > 0 {
            tracing::info!("restored {} queued operations", count);
        }
        Ok(count)
    }

    /// The backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    // ===========================================
    // Configuration
    // ===========================================

    /// Register a named conflict resolver for `{ custom = "name" }` tables.
    pub fn register_resolver<F>(&self, name: &str, resolver: F)
    where
        F: Fn(&Record, &Record) -> Record + Send + Sync + 'static,
    {
        self.resolvers.insert(name.to_string(), Arc::new(resolver));
    }

    /// Configure (or reconfigure) sync for one table.
    pub fn configure_sync_for_table(&self, config: TableSyncConfig) -> Result<(), SyncError> {
        let strategy = match &config.conflict_resolution {
            ConflictResolution::LastWriteWins => ConflictStrategy::LastWriteWins,
            ConflictResolution::ServerWins => ConflictStrategy::ServerWins,
            ConflictResolution::FieldMerge => {
                ConflictStrategy::field_merge_with_sets(config.set_valued_fields.iter().cloned())
            }
            ConflictResolution::Custom(name) => {
                let resolver = self
                    .resolvers
                    .get(name)
                    .map(|r| Arc::clone(r.value()))
                    .ok_or_else(|| SyncError::UnknownResolver(name.clone()))?;
                ConflictStrategy::Custom(resolver)
            }
        };
        tracing::debug!(
            table = %config.table,
            strategy = strategy.name(),
            realtime = config.realtime,
            "table configured"
        );
        self.tables
            .insert(config.table.clone(), TableEntry { config, strategy });
        Ok(())
    }

    /// Configured tables.
    pub fn table_configs(&self) -> Vec<TableSyncConfig> {
        self.tables.iter().map(|e| e.value().config.clone()).collect()
    }

    /// Batch size for `table`: its own override or the coordinator's.
    fn batch_size_for(&self, table: &str) -> usize {
        self.tables
            .get(table)
            .and_then(|e| e.value().config.batch_size)
            .unwrap_or(self.config.batch_size)
            .max(1)
    }

    fn strategy_for(&self, table: &str) -> ConflictStrategy {
        self.tables
            .get(table)
            .map(|e| e.value().strategy.clone())
            .unwrap_or_default()
    }

    // ===========================================
    // Listeners and status
    // ===========================================

    /// Subscribe to changes on `table`.
    pub fn subscribe_to_table<F>(
        &self,
        table: &str,
        callback: F,
        options: SubscribeOptions,
    ) -> Subscription
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.subscriptions.subscribe_with(table, options, callback)
    }

    /// Register a listener for connection and sync-activity changes.
    pub fn add_state_listener<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&StatusSnapshot) + Send + Sync + 'static,
    {
        self.connection.add_state_listener(listener)
    }

    /// Register a listener for writes that fail during background replay.
    pub fn add_error_listener<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&ReplayFailure) + Send + Sync + 'static,
    {
        self.errors.add(listener)
    }

    /// Connection and sync activity.
    pub fn status(&self) -> StatusSnapshot {
        self.connection.status()
    }

    /// Operations waiting for the remote store.
    pub fn queue_size(&self) -> usize {
        lock(&self.queue).size()
    }

    /// The row as readers currently see it.
    pub fn cached(&self, table: &str, id: &str) -> Option<Record> {
        lock(&self.cache).get(table, id).cloned()
    }

    // ===========================================
    // Connection
    // ===========================================

    /// Connect, then replay everything queued while offline.
    pub async fn connect(&self) -> Result<(), SyncError> {
        if self.connection.connect_inner().await? {
            let replayed = self.replay_batches(None).await;
            if replayed > 0 {
                tracing::info!("replayed {} queued operations after connect", replayed);
            }
        }
        Ok(())
    }

    /// Disconnect. Queued writes stay queued.
    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
    }

    // ===========================================
    // Traffic gate
    // ===========================================

    /// Reject all operations until [`resume_traffic`](Self::resume_traffic).
    pub fn pause_traffic(&self) {
        self.paused.store(true, Ordering::SeqCst);
        tracing::info!("sync traffic paused");
    }

    /// Whether traffic is paused.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Reopen traffic after migrations.
    ///
    /// Queued writes for `incompatible_tables` can no longer be replayed:
    /// each is reverted, reported as `Reverted`, and handed to its waiting
    /// caller or the error listeners. Returns their ids.
    pub async fn resume_traffic(&self, incompatible_tables: &[&str]) -> Vec<OperationId> {
        let mut failed = Vec::new();
        {
            let _replay = self.replay_lock.lock().await;
            for table in incompatible_tables {
                let discarded = lock(&self.queue).discard_table(table);
                for op in discarded {
                    failed.push(op.id());
                    self.fail_terminal(
                        op,
                        SyncError::IncompatibleSchema {
                            table: table.to_string(),
                        },
                    );
                }
            }
        }
        if !failed.is_empty() {
            tracing::warn!(
                "dropped {} queued operations for migrated tables",
                failed.len()
            );
            self.persist_queue().await;
        }
        self.paused.store(false, Ordering::SeqCst);
        tracing::info!("sync traffic resumed");
        failed
    }

    // ===========================================
    // Operations
    // ===========================================

    /// Execute a read or write.
    pub async fn execute_operation(
        &self,
        descriptor: OperationDescriptor,
    ) -> Result<OperationResult, SyncError> {
        if self.is_paused() {
            return Err(SyncError::MigrationInProgress);
        }
        if descriptor.operation == OperationKind::Select {
            return self.select(descriptor).await;
        }

        let id = validate_write(&descriptor)?;
        self.check_integrity(&descriptor)?;

        if !self.connection.is_connected() {
            return self.write_offline(descriptor).await;
        }

        let behind_queue = !lock(&self.queue)
            .pending_for(&descriptor.table, &id)
            .is_empty();
        if behind_queue {
            return self.enqueue_and_await(descriptor, 0).await;
        }
        self.write_online(descriptor).await
    }

    fn check_integrity(&self, descriptor: &OperationDescriptor) -> Result<(), SyncError> {
        if !matches!(
            descriptor.operation,
            OperationKind::Insert | OperationKind::Update
        ) {
            return Ok(());
        }
        let Some(data) = &descriptor.data else {
            return Ok(());
        };
        let foreign_keys = match self.tables.get(&descriptor.table) {
            Some(entry) if !entry.config.foreign_keys.is_empty() => {
                entry.config.foreign_keys.clone()
            }
            _ => return Ok(()),
        };
        let cache = lock(&self.cache);
        check_references(&descriptor.table, data, &foreign_keys, |table, id| {
            cache.exists(table, id)
        })?;
        Ok(())
    }

    async fn write_offline(
        &self,
        descriptor: OperationDescriptor,
    ) -> Result<OperationResult, SyncError> {
        let table = descriptor.table.clone();
        let change = self.apply_and_enqueue(descriptor, 0)?;
        self.persist_queue().await;
        self.notify(&ChangeEvent::optimistic(
            change.kind,
            table,
            change.record.clone(),
        ));
        Ok(OperationResult {
            data: vec![change.record],
            cached: true,
        })
    }

    async fn write_online(
        &self,
        descriptor: OperationDescriptor,
    ) -> Result<OperationResult, SyncError> {
        match self.push_remote(&descriptor).await {
            Ok(records) => {
                self.replay_batches(Some(1)).await;
                Ok(OperationResult {
                    data: records,
                    cached: false,
                })
            }
            Err(replay::PushError::ConnectionLost(reason)) => {
                self.connection.transport_dropped(&reason);
                self.write_offline(descriptor).await
            }
            Err(replay::PushError::Transient(reason)) => {
                tracing::warn!(
                    operation = %descriptor.id,
                    table = %descriptor.table,
                    "remote write failed, retrying: {}",
                    reason
                );
                self.enqueue_and_await(descriptor, 1).await
            }
            Err(replay::PushError::Terminal(err)) => Err(err),
        }
    }

    /// Queue a write behind everything already waiting and replay until it
    /// is applied, fails terminally, or the connection drops.
    async fn enqueue_and_await(
        &self,
        descriptor: OperationDescriptor,
        attempts: u32,
    ) -> Result<OperationResult, SyncError> {
        let operation_id = descriptor.id;
        if attempts >= self.config.max_attempts {
            return Err(SyncError::Exhausted {
                operation_id,
                attempts,
            });
        }

        let table = descriptor.table.clone();
        let change = self.apply_and_enqueue(descriptor, attempts)?;
        lock(&self.awaiting).insert(operation_id, None);
        let _awaiting = Awaiting {
            awaiting: &self.awaiting,
            id: operation_id,
        };
        self.persist_queue().await;
        self.notify(&ChangeEvent::optimistic(
            change.kind,
            table,
            change.record.clone(),
        ));

        loop {
            self.replay_batches(None).await;

            if let Some(settlement) = self.take_settlement(&operation_id) {
                return match settlement {
                    Settlement::Applied(records) => Ok(OperationResult {
                        data: records,
                        cached: false,
                    }),
                    Settlement::Failed(err) => Err(err),
                };
            }
            if !self.connection.is_connected() {
                return Ok(OperationResult {
                    data: vec![change.record],
                    cached: true,
                });
            }
            tokio::time::sleep(self.config.retry_backoff).await;
        }
    }

    /// Apply a write to the cache and queue it. On overflow the cache is
    /// rolled back and nothing is queued.
    fn apply_and_enqueue(
        &self,
        descriptor: OperationDescriptor,
        attempts: u32,
    ) -> Result<LocalChange, SyncError> {
        let table = descriptor.table.clone();
        let id = descriptor.target_id().unwrap_or_default();

        let mut cache = lock(&self.cache);
        let change = cache
            .apply_local(&descriptor)
            .ok_or_else(|| SyncError::InvalidOperation("write has no record id".into()))?;

        let mut queue = lock(&self.queue);
        let mut op = QueuedOperation::new(descriptor, now_millis());
        op.attempts = attempts;

        if let Err(err) = queue.enqueue(op) {
            let pending = queue.pending_for(&table, &id);
            cache.revert(&table, &id, &pending);
            tracing::warn!(table = %table, "{}; operation not accepted", err);
            return Err(err.into());
        }
        Ok(change)
    }

    async fn select(&self, descriptor: OperationDescriptor) -> Result<OperationResult, SyncError> {
        let table = descriptor.table.as_str();
        let predicate = descriptor.predicate.as_ref();

        let aggressive = self
            .tables
            .get(table)
            .map_or(false, |e| e.config.cache_strategy == CacheStrategy::Aggressive);
        let ttl = descriptor
            .options
            .ttl_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.config.default_cache_ttl);
        let fresh = lock(&self.cache).is_fresh(table, ttl, now_instant());

        if !self.connection.is_connected() || (descriptor.options.cache && aggressive && fresh) {
            return Ok(self.select_cached(table, predicate));
        }

        match self.backend.select(table, predicate).await {
            Ok(rows) => {
                {
                    let mut cache = lock(&self.cache);
                    let queue = lock(&self.queue);
                    for row in &rows {
                        let Some(id) = record_id(&row.record) else {
                            continue;
                        };
                        if queue.pending_for(table, &id).is_empty() {
                            cache.confirm(table, row, &[]);
                        }
                    }
                    if predicate.is_none() {
                        cache.mark_refreshed(table, now_instant());
                    }
                }
                Ok(OperationResult {
                    data: rows.into_iter().map(|r| r.record).collect(),
                    cached: false,
                })
            }
            Err(e) if e.is_connection_loss() || e.is_transient() => {
                if e.is_connection_loss() {
                    self.connection.transport_dropped(&e.to_string());
                }
                tracing::warn!(table, "remote select failed, serving cache: {}", e);
                Ok(self.select_cached(table, predicate))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn select_cached(&self, table: &str, predicate: Option<&Record>) -> OperationResult {
        OperationResult {
            data: lock(&self.cache).select(table, predicate),
            cached: true,
        }
    }

    // ===========================================
    // Sync
    // ===========================================

    /// Replay the offline queue, then pull remote changes for `table` (or
    /// every configured table).
    ///
    /// Passes over the same table are spaced by `min_sync_spacing` and run
    /// one at a time; different tables do not wait for each other.
    pub async fn sync(&self, table: Option<&str>) -> Result<(), SyncError> {
        if self.is_paused() {
            return Err(SyncError::MigrationInProgress);
        }
        if !self.connection.is_connected() {
            return Err(SyncError::NotConnected);
        }

        let tables: Vec<String> = match table {
            Some(t) => vec![t.to_string()],
            None => self.tables.iter().map(|e| e.key().clone()).collect(),
        };

        self.replay_batches(None).await;
        for table in &tables {
            self.sync_table(table).await?;
        }
        Ok(())
    }

    async fn sync_table(&self, table: &str) -> Result<(), SyncError> {
        let gate = Arc::clone(
            self.gates
                .entry(table.to_string())
                .or_insert_with(|| {
                    Arc::new(AsyncMutex::new(Throttle::new(self.config.min_sync_spacing)))
                })
                .value(),
        );
        let mut throttle = gate.lock().await;
        let wait = throttle.reserve(now_instant());
        if !wait.is_zero() {
            tracing::debug!(table, "sync throttled for {:?}", wait);
            tokio::time::sleep(wait).await;
        }

        let _activity = self.connection.begin_sync();
        let batch_size = self.batch_size_for(table);

        let mut pulled = 0usize;
        loop {
            let after = lock(&self.cursors).get(table);
            let batch = match self.backend.changes_since(table, after, batch_size).await {
                Ok(batch) => batch,
                Err(e) => {
                    if e.is_connection_loss() {
                        self.connection.transport_dropped(&e.to_string());
                    }
                    return Err(e.into());
                }
            };

            pulled += batch.records.len();
            for remote in &batch.records {
                self.apply_remote_change(table, remote);
            }
            lock(&self.cursors).advance(table, batch.max_cursor);

            if !batch.has_more {
                break;
            }
        }

        lock(&self.cache).mark_refreshed(table, now_instant());
        tracing::debug!(table, pulled, "sync pass complete");
        Ok(())
    }

    /// Fold one pulled record into the cache. Records already held at that
    /// version, and records with local writes still pending, are skipped.
    fn apply_remote_change(&self, table: &str, remote: &VersionedRecord) {
        let Some(id) = record_id(&remote.record) else {
            return;
        };

        let event = {
            let mut cache = lock(&self.cache);
            let queue = lock(&self.queue);

            let known = cache.known_version(table, &id);
            if known.map_or(false, |v| v >= remote.version) {
                return;
            }
            if !queue.pending_for(table, &id).is_empty() {
                tracing::debug!(table, id = %id, "remote change deferred: local writes pending");
                return;
            }

            let kind = if remote.deleted {
                ChangeKind::Delete
            } else if known.is_some() || cache.exists(table, &id) {
                ChangeKind::Update
            } else {
                ChangeKind::Insert
            };
            let visible_before = cache.exists(table, &id);
            cache.confirm(table, remote, &[]);

            if remote.deleted && !visible_before {
                None
            } else {
                Some(ChangeEvent::confirmed(kind, table, remote.record.clone()))
            }
        };

        if let Some(event) = event {
            self.notify(&event);
        }
    }

    // ===========================================
    // Helpers
    // ===========================================

    fn notify(&self, event: &ChangeEvent) {
        let delivered = self.subscriptions.notify(event);
        tracing::trace!(
            table = %event.table,
            status = ?event.status,
            delivered,
            "change notified"
        );
    }

    /// Hand an outcome to the caller waiting on `id`. Gives the settlement
    /// back if nobody is waiting.
    fn settle(&self, id: OperationId, settlement: Settlement) -> Option<Settlement> {
        let mut awaiting = lock(&self.awaiting);
        match awaiting.get_mut(&id) {
            Some(slot) => {
                *slot = Some(settlement);
                None
            }
            None => Some(settlement),
        }
    }

    fn take_settlement(&self, id: &OperationId) -> Option<Settlement> {
        let mut awaiting = lock(&self.awaiting);
        if matches!(awaiting.get(id), Some(Some(_))) {
            awaiting.remove(id).flatten()
        } else {
            None
        }
    }

    async fn persist_queue(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let _persist = self.persist_lock.lock().await;
        let snapshot = lock(&self.queue).snapshot();
        if let Err(e) = store.save(&snapshot).await {
            tracing::error!("failed to persist offline queue: {}", e);
        }
    }
}

impl<B: Backend> std::fmt::Debug for SyncCoordinator<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("status", &self.status())
            .field("queue_size", &self.queue_size())
            .field("tables", &self.tables.len())
            .finish()
    }
}

/// Writes must name their row; inserts and updates must carry data.
fn validate_write(descriptor: &OperationDescriptor) -> Result<String, SyncError> {
    let id = descriptor.target_id().ok_or_else(|| {
        SyncError::InvalidOperation(format!(
            "{} on {} has no record id",
            descriptor.operation, descriptor.table
        ))
    })?;
    if matches!(
        descriptor.operation,
        OperationKind::Insert | OperationKind::Update
    ) && descriptor.data.is_none()
    {
        return Err(SyncError::InvalidOperation(format!(
            "{} on {} has no data",
            descriptor.operation, descriptor.table
        )));
    }
    Ok(id)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Monotonic now that follows tokio's clock (paused in tests).
fn now_instant() -> Instant {
    tokio::time::Instant::now().into_std()
}

/// Forgets a caller's wait on a queued write when the caller returns or
/// is dropped. The write itself stays queued.
struct Awaiting<'a> {
    awaiting: &'a Mutex<HashMap<OperationId, Option<Settlement>>>,
    id: OperationId,
}

impl Drop for Awaiting<'_> {
    fn drop(&mut self) {
        lock(self.awaiting).remove(&self.id);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, ChangeBatch, MockBackend, RemoteWrite, WriteOutcome};
    use crate::store::SqliteQueueStore;
    use serde_json::json;
    use sync_core::{ConnectionState, SyncActivity};
    use sync_types::{ChangeStatus, Cursor, OperationOptions};

    fn obj(value: serde_json::Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn fast_config() -> SyncConfig {
        SyncConfig::new()
            .with_retry_backoff(Duration::from_millis(1))
            .with_min_sync_spacing(Duration::from_millis(1))
    }

    fn coordinator(config: SyncConfig) -> (MockBackend, SyncCoordinator<MockBackend>) {
        let backend = MockBackend::new();
        let coordinator = SyncCoordinator::new(backend.clone(), config);
        coordinator
            .configure_sync_for_table(TableSyncConfig::new("tasks"))
            .unwrap();
        (backend, coordinator)
    }

    fn record_changes(
        coordinator: &SyncCoordinator<MockBackend>,
        table: &str,
        include_optimistic: bool,
    ) -> (Subscription, Arc<Mutex<Vec<ChangeEvent>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let subscription = coordinator.subscribe_to_table(
            table,
            move |event| s.lock().unwrap().push(event.clone()),
            SubscribeOptions {
                include_optimistic,
                ..Default::default()
            },
        );
        (subscription, seen)
    }

    fn record_failures(
        coordinator: &SyncCoordinator<MockBackend>,
    ) -> (ListenerHandle, Arc<Mutex<Vec<ReplayFailure>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let handle = coordinator.add_error_listener(move |f| s.lock().unwrap().push(f.clone()));
        (handle, seen)
    }

    fn insert(id: &str, title: &str) -> OperationDescriptor {
        OperationDescriptor::insert("tasks", obj(json!({"id": id, "title": title})))
    }

    // ===========================================
    // Offline writes and replay
    // ===========================================

    #[tokio::test]
    async fn offline_insert_is_confirmed_once_after_reconnect() {
        let (backend, c) = coordinator(fast_config());
        let (_sub, seen) = record_changes(&c, "tasks", false);

        let result = c.execute_operation(insert("t1", "A")).await.unwrap();
        assert!(result.cached);
        assert_eq!(c.queue_size(), 1);
        assert!(seen.lock().unwrap().is_empty());

        c.connect().await.unwrap();
        c.sync(Some("tasks")).await.unwrap();

        let events = seen.lock().unwrap().clone();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ChangeKind::Insert);
        assert_eq!(events[0].status, ChangeStatus::Confirmed);
        assert_eq!(events[0].record["title"], "A");
        assert_eq!(c.queue_size(), 0);
        assert_eq!(backend.row_count("tasks"), 1);
    }

    #[tokio::test]
    async fn optimistic_subscribers_see_offline_writes() {
        let (_backend, c) = coordinator(fast_config());
        let (_sub, seen) = record_changes(&c, "tasks", true);

        c.execute_operation(insert("t1", "A")).await.unwrap();

        let events = seen.lock().unwrap().clone();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, ChangeStatus::Optimistic);
        assert_eq!(c.cached("tasks", "t1").unwrap()["title"], "A");
    }

    #[tokio::test]
    async fn replay_preserves_submission_order() {
        let (backend, c) = coordinator(fast_config());

        c.execute_operation(insert("t1", "A")).await.unwrap();
        c.execute_operation(OperationDescriptor::update(
            "tasks",
            obj(json!({"id": "t1", "done": true})),
        ))
        .await
        .unwrap();
        c.execute_operation(insert("t2", "B")).await.unwrap();
        c.execute_operation(OperationDescriptor::delete("tasks", obj(json!({"id": "t1"}))))
            .await
            .unwrap();

        c.connect().await.unwrap();

        let applied: Vec<_> = backend
            .applied_ops()
            .iter()
            .map(|op| (op.operation, op.target_id().unwrap()))
            .collect();
        assert_eq!(
            applied,
            vec![
                (OperationKind::Insert, "t1".to_string()),
                (OperationKind::Update, "t1".to_string()),
                (OperationKind::Insert, "t2".to_string()),
                (OperationKind::Delete, "t1".to_string()),
            ]
        );
        assert!(backend.record("tasks", "t1").is_none());
        assert!(backend.record("tasks", "t2").is_some());
        assert_eq!(c.queue_size(), 0);
    }

    /// Delays every write so callers can be cancelled mid-push.
    struct SlowBackend {
        inner: MockBackend,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl Backend for SlowBackend {
        async fn connect(&self) -> Result<(), BackendError> {
            self.inner.connect().await
        }

        async fn close(&self) -> Result<(), BackendError> {
            self.inner.close().await
        }

        fn is_connected(&self) -> bool {
            self.inner.is_connected()
        }

        async fn apply(&self, write: &RemoteWrite) -> Result<WriteOutcome, BackendError> {
            tokio::time::sleep(self.delay).await;
            self.inner.apply(write).await
        }

        async fn select(
            &self,
            table: &str,
            predicate: Option<&Record>,
        ) -> Result<Vec<VersionedRecord>, BackendError> {
            self.inner.select(table, predicate).await
        }

        async fn changes_since(
            &self,
            table: &str,
            after: Cursor,
            limit: usize,
        ) -> Result<ChangeBatch, BackendError> {
            self.inner.changes_since(table, after, limit).await
        }
    }

    fn slow_coordinator(delay: Duration) -> (MockBackend, SyncCoordinator<SlowBackend>) {
        let backend = MockBackend::new();
        let slow = SlowBackend {
            inner: backend.clone(),
            delay,
        };
        let coordinator = SyncCoordinator::new(slow, fast_config());
        coordinator
            .configure_sync_for_table(TableSyncConfig::new("tasks"))
            .unwrap();
        (backend, coordinator)
    }

    #[tokio::test]
    async fn cancelled_replay_puts_batch_back() {
        let (backend, c) = slow_coordinator(Duration::from_millis(200));
        c.execute_operation(insert("t1", "A")).await.unwrap();
        c.execute_operation(insert("t2", "B")).await.unwrap();

        let cancelled = tokio::time::timeout(Duration::from_millis(20), c.connect()).await;
        assert!(cancelled.is_err());
        {
            let queue = lock(&c.queue);
            assert_eq!(queue.in_flight_count(), 0);
            assert_eq!(queue.queued_len(), 2);
        }

        c.sync(Some("tasks")).await.unwrap();

        assert!(backend.record("tasks", "t1").is_some());
        assert!(backend.record("tasks", "t2").is_some());
        assert_eq!(c.queue_size(), 0);
    }

    #[tokio::test]
    async fn cancelled_caller_stops_waiting_but_write_stays_queued() {
        let (backend, c) = slow_coordinator(Duration::from_millis(200));
        c.connect().await.unwrap();

        let cancelled = tokio::time::timeout(
            Duration::from_millis(20),
            c.enqueue_and_await(insert("t1", "A"), 0),
        )
        .await;
        assert!(cancelled.is_err());
        assert!(lock(&c.awaiting).is_empty());
        assert_eq!(lock(&c.queue).in_flight_count(), 0);
        assert_eq!(c.queue_size(), 1);

        c.sync(Some("tasks")).await.unwrap();
        assert!(backend.record("tasks", "t1").is_some());
        assert_eq!(c.queue_size(), 0);
        assert!(lock(&c.awaiting).is_empty());
    }

    #[tokio::test]
    async fn replay_batches_use_table_batch_size() {
        let (backend, c) = coordinator(fast_config());
        c.configure_sync_for_table(TableSyncConfig::new("tasks").with_batch_size(1))
            .unwrap();
        for id in ["t1", "t2", "t3"] {
            c.execute_operation(insert(id, "A")).await.unwrap();
        }
        c.connection.connect_inner().await.unwrap();

        assert_eq!(c.replay_batches(Some(1)).await, 1);
        assert_eq!(c.queue_size(), 2);
        assert_eq!(backend.row_count("tasks"), 1);

        assert_eq!(c.replay_batches(None).await, 2);
        assert_eq!(c.queue_size(), 0);
    }

    #[tokio::test]
    async fn full_queue_rejects_and_rolls_back() {
        let (_backend, c) = coordinator(fast_config().with_queue_capacity(2));

        c.execute_operation(insert("a", "A")).await.unwrap();
        c.execute_operation(insert("b", "B")).await.unwrap();
        let err = c.execute_operation(insert("c", "C")).await.unwrap_err();

        assert!(matches!(err, SyncError::QueueOverflow { capacity: 2 }));
        assert_eq!(c.queue_size(), 2);
        assert!(c.cached("tasks", "c").is_none());
        assert!(c.cached("tasks", "a").is_some());
    }

    #[tokio::test]
    async fn replay_failure_without_caller_goes_to_error_listeners() {
        let (backend, c) = coordinator(fast_config());
        let (_handle, failures) = record_failures(&c);
        let (_sub, seen) = record_changes(&c, "tasks", false);

        c.execute_operation(insert("t1", "A")).await.unwrap();
        c.execute_operation(insert("t2", "B")).await.unwrap();
        backend.fail_next_apply(BackendError::Rejected("bad row".into()));

        c.connect().await.unwrap();

        let failures = failures.lock().unwrap().clone();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].operation.target_id().as_deref(), Some("t1"));
        assert!(failures[0].error.contains("bad row"));

        assert!(c.cached("tasks", "t1").is_none());
        assert_eq!(backend.row_count("tasks"), 1);
        let statuses: Vec<_> = seen.lock().unwrap().iter().map(|e| e.status).collect();
        assert_eq!(statuses, vec![ChangeStatus::Reverted, ChangeStatus::Confirmed]);
    }

    // ===========================================
    // Online writes
    // ===========================================

    #[tokio::test]
    async fn online_write_is_confirmed() {
        let (backend, c) = coordinator(fast_config());
        let (_sub, seen) = record_changes(&c, "tasks", true);
        c.connect().await.unwrap();

        let result = c.execute_operation(insert("t1", "A")).await.unwrap();

        assert!(!result.cached);
        assert_eq!(result.data[0]["title"], "A");
        assert_eq!(backend.record("tasks", "t1").unwrap().version, 1);
        let statuses: Vec<_> = seen.lock().unwrap().iter().map(|e| e.status).collect();
        assert_eq!(statuses, vec![ChangeStatus::Confirmed]);
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let (backend, c) = coordinator(fast_config());
        c.connect().await.unwrap();
        backend.fail_next_apply(BackendError::Unavailable("busy".into()));

        let result = c.execute_operation(insert("t1", "A")).await.unwrap();

        assert!(!result.cached);
        assert_eq!(c.queue_size(), 0);
        assert!(backend.record("tasks", "t1").is_some());
    }

    #[tokio::test]
    async fn exhausted_retries_revert_the_write() {
        let (backend, c) = coordinator(fast_config().with_max_attempts(3));
        let (_sub, seen) = record_changes(&c, "tasks", true);
        let (_handle, failures) = record_failures(&c);
        c.connect().await.unwrap();
        for _ in 0..3 {
            backend.fail_next_apply(BackendError::Unavailable("busy".into()));
        }

        let err = c.execute_operation(insert("t1", "A")).await.unwrap_err();

        assert!(matches!(err, SyncError::Exhausted { attempts: 3, .. }));
        assert!(c.cached("tasks", "t1").is_none());
        assert_eq!(c.queue_size(), 0);
        let statuses: Vec<_> = seen.lock().unwrap().iter().map(|e| e.status).collect();
        assert_eq!(statuses, vec![ChangeStatus::Optimistic, ChangeStatus::Reverted]);
        assert!(failures.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejected_write_is_terminal() {
        let (backend, c) = coordinator(fast_config());
        c.connect().await.unwrap();
        backend.fail_next_apply(BackendError::Rejected("schema mismatch".into()));

        let err = c.execute_operation(insert("t1", "A")).await.unwrap_err();

        assert!(matches!(err, SyncError::Rejected(ref reason) if reason == "schema mismatch"));
        assert!(c.cached("tasks", "t1").is_none());
        assert_eq!(c.queue_size(), 0);
    }

    #[tokio::test]
    async fn dropped_connection_keeps_write_queued() {
        let (backend, c) = coordinator(fast_config());
        c.connect().await.unwrap();
        backend.fail_next_apply(BackendError::ConnectionLost("reset".into()));

        let result = c.execute_operation(insert("t1", "A")).await.unwrap();

        assert!(result.cached);
        assert_eq!(c.queue_size(), 1);
        assert_eq!(c.status().connection, ConnectionState::Disconnected);

        c.connect().await.unwrap();
        assert_eq!(c.queue_size(), 0);
        assert!(backend.record("tasks", "t1").is_some());
    }

    #[tokio::test]
    async fn write_without_id_is_invalid() {
        let (_backend, c) = coordinator(fast_config());

        let err = c
            .execute_operation(OperationDescriptor::insert("tasks", obj(json!({"title": "A"}))))
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::InvalidOperation(_)));
        assert_eq!(c.queue_size(), 0);
    }

    #[tokio::test]
    async fn missing_parent_is_rejected_before_the_store() {
        let (backend, c) = coordinator(fast_config());
        c.configure_sync_for_table(
            TableSyncConfig::new("tasks").with_foreign_key("projectId", "projects"),
        )
        .unwrap();
        c.connect().await.unwrap();

        let task = OperationDescriptor::insert("tasks", obj(json!({"id": "t1", "projectId": "p1"})));
        let err = c.execute_operation(task.clone()).await.unwrap_err();
        assert!(matches!(err, SyncError::Integrity(_)));
        assert!(backend.applied_ops().is_empty());

        c.execute_operation(OperationDescriptor::insert(
            "projects",
            obj(json!({"id": "p1"})),
        ))
        .await
        .unwrap();
        c.execute_operation(task).await.unwrap();
        assert!(backend.record("tasks", "t1").is_some());
    }

    // ===========================================
    // Conflicts
    // ===========================================

    #[tokio::test]
    async fn custom_resolver_settles_conflict_with_one_notification() {
        let (backend, c) = coordinator(fast_config());
        c.register_resolver("importance", |local, remote| {
            let l = local["importance"].as_i64().unwrap_or(0);
            let r = remote["importance"].as_i64().unwrap_or(0);
            if l >= r {
                local.clone()
            } else {
                remote.clone()
            }
        });
        c.configure_sync_for_table(
            TableSyncConfig::new("tasks")
                .with_conflict_resolution(ConflictResolution::Custom("importance".into())),
        )
        .unwrap();

        backend.remote_upsert("tasks", obj(json!({"id": "t1", "importance": 5})));
        c.connect().await.unwrap();
        c.sync(Some("tasks")).await.unwrap();

        // Another client raises it to 6 first.
        backend.remote_upsert("tasks", obj(json!({"id": "t1", "importance": 6})));
        let (_sub, seen) = record_changes(&c, "tasks", false);

        let result = c
            .execute_operation(OperationDescriptor::update(
                "tasks",
                obj(json!({"id": "t1", "importance": 8})),
            ))
            .await
            .unwrap();

        assert_eq!(result.data[0]["importance"], 8);
        assert_eq!(backend.record("tasks", "t1").unwrap().record["importance"], 8);
        assert_eq!(c.cached("tasks", "t1").unwrap()["importance"], 8);
        let events = seen.lock().unwrap().clone();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].record["importance"], 8);
    }

    #[tokio::test]
    async fn last_write_wins_keeps_newer_remote() {
        let (backend, c) = coordinator(fast_config());
        backend.remote_upsert(
            "tasks",
            obj(json!({"id": "t1", "title": "base", "updatedAt": 1000})),
        );
        c.connect().await.unwrap();
        c.sync(Some("tasks")).await.unwrap();
        backend.remote_upsert(
            "tasks",
            obj(json!({"id": "t1", "title": "remote", "updatedAt": 3000})),
        );
        let (_sub, seen) = record_changes(&c, "tasks", false);

        let result = c
            .execute_operation(OperationDescriptor::update(
                "tasks",
                obj(json!({"id": "t1", "title": "local", "updatedAt": 2000})),
            ))
            .await
            .unwrap();

        assert_eq!(result.data[0]["title"], "remote");
        assert_eq!(c.cached("tasks", "t1").unwrap()["title"], "remote");
        assert_eq!(backend.record("tasks", "t1").unwrap().version, 2);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn server_wins_undoes_conflicting_delete() {
        let (backend, c) = coordinator(fast_config());
        c.configure_sync_for_table(
            TableSyncConfig::new("tasks").with_conflict_resolution(ConflictResolution::ServerWins),
        )
        .unwrap();
        backend.remote_upsert("tasks", obj(json!({"id": "t1", "title": "A"})));
        c.connect().await.unwrap();
        c.sync(Some("tasks")).await.unwrap();
        backend.remote_upsert("tasks", obj(json!({"id": "t1", "title": "B"})));

        c.execute_operation(OperationDescriptor::delete("tasks", obj(json!({"id": "t1"}))))
            .await
            .unwrap();

        assert_eq!(c.cached("tasks", "t1").unwrap()["title"], "B");
        assert!(backend.record("tasks", "t1").is_some());
    }

    #[tokio::test]
    async fn unknown_resolver_is_rejected() {
        let (_backend, c) = coordinator(fast_config());

        let err = c
            .configure_sync_for_table(
                TableSyncConfig::new("tasks")
                    .with_conflict_resolution(ConflictResolution::Custom("missing".into())),
            )
            .unwrap_err();

        assert!(matches!(err, SyncError::UnknownResolver(ref name) if name == "missing"));
    }

    // ===========================================
    // Sync
    // ===========================================

    #[tokio::test]
    async fn sync_requires_connection() {
        let (_backend, c) = coordinator(fast_config());
        assert!(matches!(c.sync(None).await, Err(SyncError::NotConnected)));
    }

    #[tokio::test]
    async fn sync_pulls_remote_changes() {
        let (backend, c) = coordinator(fast_config().with_batch_size(2));
        let (_sub, seen) = record_changes(&c, "tasks", false);
        c.connect().await.unwrap();

        for id in ["t1", "t2", "t3"] {
            backend.remote_upsert("tasks", obj(json!({"id": id, "title": "new"})));
        }
        c.sync(Some("tasks")).await.unwrap();
        backend.remote_upsert("tasks", obj(json!({"id": "t1", "title": "edited"})));
        backend.remote_delete("tasks", "t2");
        c.sync(None).await.unwrap();

        let kinds: Vec<_> = seen.lock().unwrap().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ChangeKind::Insert,
                ChangeKind::Insert,
                ChangeKind::Insert,
                ChangeKind::Update,
                ChangeKind::Delete,
            ]
        );
        assert_eq!(c.cached("tasks", "t1").unwrap()["title"], "edited");
        assert!(c.cached("tasks", "t2").is_none());
    }

    #[tokio::test]
    async fn remote_change_waits_for_pending_local_writes() {
        let (_backend, c) = coordinator(fast_config());
        c.execute_operation(insert("t1", "local")).await.unwrap();

        c.apply_remote_change(
            "tasks",
            &VersionedRecord {
                record: obj(json!({"id": "t1", "title": "remote"})),
                version: 1,
                cursor: Cursor::new(1),
                deleted: false,
            },
        );

        assert_eq!(c.cached("tasks", "t1").unwrap()["title"], "local");
    }

    #[tokio::test]
    async fn sync_is_spaced_per_table() {
        let config = fast_config().with_min_sync_spacing(Duration::from_millis(100));
        let (_backend, c) = coordinator(config);
        c.configure_sync_for_table(TableSyncConfig::new("users")).unwrap();
        c.connect().await.unwrap();

        let start = std::time::Instant::now();
        c.sync(Some("tasks")).await.unwrap();
        c.sync(Some("tasks")).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(100));

        let other = std::time::Instant::now();
        c.sync(Some("users")).await.unwrap();
        assert!(other.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn sync_reports_activity() {
        let (_backend, c) = coordinator(fast_config());
        c.connect().await.unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let _handle = c.add_state_listener(move |snap| s.lock().unwrap().push(snap.sync));

        c.sync(Some("tasks")).await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![SyncActivity::Syncing, SyncActivity::Idle]
        );
    }

    // ===========================================
    // Selects
    // ===========================================

    #[tokio::test]
    async fn offline_select_reads_cache() {
        let (_backend, c) = coordinator(fast_config());
        c.execute_operation(insert("t1", "A")).await.unwrap();

        let result = c
            .execute_operation(OperationDescriptor::select("tasks"))
            .await
            .unwrap();

        assert!(result.cached);
        assert_eq!(result.data.len(), 1);
    }

    #[tokio::test]
    async fn aggressive_select_serves_fresh_cache() {
        let (backend, c) = coordinator(fast_config());
        c.configure_sync_for_table(
            TableSyncConfig::new("tasks").with_cache_strategy(CacheStrategy::Aggressive),
        )
        .unwrap();
        c.connect().await.unwrap();
        backend.remote_upsert("tasks", obj(json!({"id": "t1"})));

        let cached_read = || {
            OperationDescriptor::select("tasks").with_options(OperationOptions {
                cache: true,
                ..Default::default()
            })
        };

        let first = c.execute_operation(cached_read()).await.unwrap();
        assert!(!first.cached);

        backend.remote_upsert("tasks", obj(json!({"id": "t2"})));
        let second = c.execute_operation(cached_read()).await.unwrap();
        assert!(second.cached);
        assert_eq!(second.data.len(), 1);

        let direct = c
            .execute_operation(OperationDescriptor::select("tasks"))
            .await
            .unwrap();
        assert!(!direct.cached);
        assert_eq!(direct.data.len(), 2);
    }

    #[tokio::test]
    async fn failed_remote_select_falls_back_to_cache() {
        let (backend, c) = coordinator(fast_config());
        c.connect().await.unwrap();
        c.execute_operation(insert("t1", "A")).await.unwrap();
        backend.fail_next_select(BackendError::Unavailable("busy".into()));

        let result = c
            .execute_operation(OperationDescriptor::select("tasks"))
            .await
            .unwrap();

        assert!(result.cached);
        assert_eq!(result.data.len(), 1);
    }

    // ===========================================
    // Traffic gate and durability
    // ===========================================

    #[tokio::test]
    async fn paused_traffic_rejects_operations() {
        let (_backend, c) = coordinator(fast_config());
        c.pause_traffic();

        assert!(matches!(
            c.execute_operation(insert("t1", "A")).await,
            Err(SyncError::MigrationInProgress)
        ));
        assert!(matches!(
            c.sync(None).await,
            Err(SyncError::MigrationInProgress)
        ));

        assert!(c.resume_traffic(&[]).await.is_empty());
        assert!(c.execute_operation(insert("t1", "A")).await.is_ok());
    }

    #[tokio::test]
    async fn resume_fails_writes_for_migrated_tables() {
        let (_backend, c) = coordinator(fast_config());
        let (_handle, failures) = record_failures(&c);
        let (_sub, seen) = record_changes(&c, "tasks", false);

        c.execute_operation(insert("t1", "A")).await.unwrap();
        c.execute_operation(OperationDescriptor::insert("notes", obj(json!({"id": "n1"}))))
            .await
            .unwrap();
        c.pause_traffic();

        let failed = c.resume_traffic(&["tasks"]).await;

        assert_eq!(failed.len(), 1);
        assert!(!c.is_paused());
        assert_eq!(c.queue_size(), 1);
        assert!(c.cached("tasks", "t1").is_none());
        assert!(c.cached("notes", "n1").is_some());
        assert!(failures.lock().unwrap()[0].error.contains("tasks"));
        assert_eq!(seen.lock().unwrap()[0].status, ChangeStatus::Reverted);
    }

    #[tokio::test]
    async fn queue_survives_restart() {
        let store = Arc::new(SqliteQueueStore::in_memory().await.unwrap());

        let first = SyncCoordinator::new(MockBackend::new(), fast_config()).with_store(store.clone());
        first.execute_operation(insert("t1", "A")).await.unwrap();
        first.execute_operation(insert("t2", "B")).await.unwrap();
        drop(first);

        let backend = MockBackend::new();
        let second = SyncCoordinator::new(backend.clone(), fast_config()).with_store(store);
        assert_eq!(second.restore_queue().await.unwrap(), 2);
        assert_eq!(second.queue_size(), 2);
        assert_eq!(second.cached("tasks", "t1").unwrap()["title"], "A");

        second.connect().await.unwrap();
        assert_eq!(backend.row_count("tasks"), 2);
    }
}
