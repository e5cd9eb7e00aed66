//! Pushing writes to the store: queue replay and conflict settlement.

use std::sync::Mutex;
use sync_core::{ConflictCase, ConflictStrategy, NackOutcome, OfflineQueue, QueuedOperation};
use sync_types::{ChangeEvent, ChangeKind, OperationDescriptor, OperationId, OperationKind, Record};

use super::{lock, ReplayFailure, Settlement, SyncCoordinator};
use crate::backend::{Backend, BackendError, RemoteWrite, VersionedRecord, WriteOutcome};
use crate::error::SyncError;

/// Write-backs attempted before a conflict is treated as retryable.
const MAX_CONFLICT_ROUNDS: usize = 3;

/// Why a remote write did not land.
pub(super) enum PushError {
    /// The session went away; the write stays queued.
    ConnectionLost(String),
    /// Worth retrying; counts against the attempt budget.
    Transient(String),
    /// Will never succeed.
    Terminal(SyncError),
}

impl From<BackendError> for PushError {
    fn from(err: BackendError) -> Self {
        if err.is_connection_loss() {
            PushError::ConnectionLost(err.to_string())
        } else if let BackendError::Rejected(reason) = err {
            PushError::Terminal(SyncError::Rejected(reason))
        } else {
            PushError::Transient(err.to_string())
        }
    }
}

impl<B: Backend> SyncCoordinator<B> {
    /// Replay queued writes in order, `batch_size` at a time.
    ///
    /// Stops at the first retryable failure so later writes never overtake
    /// an earlier one. `max_batches` of `None` runs until the queue is
    /// empty. Returns the number of writes applied.
    ///
    /// Dropping the future part way through puts the unsettled rest of the
    /// current batch back at the front of the queue.
    pub(super) async fn replay_batches(&self, max_batches: Option<usize>) -> usize {
        let _replay = self.replay_lock.lock().await;
        let mut batches = 0usize;
        let mut applied = 0usize;

        'replay: loop {
            if !self.connection.is_connected() {
                break;
            }
            if max_batches.map_or(false, |max| batches >= max) {
                break;
            }
            let batch = {
                let mut queue = lock(&self.queue);
                let size = queue
                    .front()
                    .map_or(self.config.batch_size, |op| self.batch_size_for(op.table()));
                queue.take_batch(size)
            };
            if batch.is_empty() {
                break;
            }
            let _in_flight = InFlight {
                queue: &self.queue,
                ids: ids(&batch),
            };
            batches += 1;
            tracing::debug!(size = batch.len(), "replaying queued operations");

            for (index, op) in batch.iter().enumerate() {
                match self.push_remote(&op.descriptor).await {
                    Ok(records) => {
                        lock(&self.queue).ack(&op.id());
                        applied += 1;
                        let _ = self.settle(op.id(), Settlement::Applied(records));
                    }
                    Err(PushError::ConnectionLost(reason)) => {
                        lock(&self.queue).release(&ids(&batch[index..]));
                        self.connection.transport_dropped(&reason);
                        break 'replay;
                    }
                    Err(PushError::Transient(reason)) => {
                        let outcome = {
                            let mut queue = lock(&self.queue);
                            queue.release(&ids(&batch[index + 1..]));
                            queue.nack(&op.id())
                        };
                        match outcome {
                            NackOutcome::Requeued { attempts } => {
                                tracing::warn!(
                                    operation = %op.id(),
                                    attempts,
                                    "replay failed, will retry: {}",
                                    reason
                                );
                                break 'replay;
                            }
                            NackOutcome::Exhausted(failed) => {
                                let error = SyncError::Exhausted {
                                    operation_id: failed.id(),
                                    attempts: failed.attempts,
                                };
                                self.fail_terminal(failed, error);
                                continue 'replay;
                            }
                            NackOutcome::Unknown => break 'replay,
                        }
                    }
                    Err(PushError::Terminal(error)) => {
                        let failed = lock(&self.queue).ack(&op.id());
                        if let Some(failed) = failed {
                            self.fail_terminal(failed, error);
                        }
                    }
                }
            }
        }

        self.persist_queue().await;
        applied
    }

    /// Roll back a write that will never be applied and report it.
    pub(super) fn fail_terminal(&self, op: QueuedOperation, error: SyncError) {
        let table = op.table().to_string();
        let id = op.descriptor.target_id().unwrap_or_default();

        let restored = {
            let mut cache = lock(&self.cache);
            let queue = lock(&self.queue);
            let pending = queue.pending_for(&table, &id);
            cache.revert(&table, &id, &pending)
        };

        tracing::warn!(
            operation = %op.id(),
            table = %table,
            attempts = op.attempts,
            "operation failed: {}",
            error
        );

        let kind = ChangeKind::from_operation(op.descriptor.operation).unwrap_or(ChangeKind::Update);
        let record = restored
            .or_else(|| op.descriptor.data.clone())
            .or_else(|| op.descriptor.predicate.clone())
            .unwrap_or_default();
        self.notify(&ChangeEvent::reverted(kind, table, record));

        if let Some(Settlement::Failed(error)) = self.settle(op.id(), Settlement::Failed(error)) {
            self.errors.emit(&ReplayFailure {
                operation: op.descriptor,
                attempts: op.attempts,
                error: error.to_string(),
            });
        }
    }

    /// Send one write to the store, settling conflicts on the way. Returns
    /// the confirmed rows.
    pub(super) async fn push_remote(
        &self,
        descriptor: &OperationDescriptor,
    ) -> Result<Vec<Record>, PushError> {
        let id = descriptor.target_id().ok_or_else(|| {
            PushError::Terminal(SyncError::InvalidOperation("write has no record id".into()))
        })?;
        let expected = lock(&self.cache).known_version(&descriptor.table, &id);
        let write = RemoteWrite::new(descriptor.clone()).expecting(expected);

        match self.backend.apply(&write).await? {
            WriteOutcome::Applied { record } => {
                let kind =
                    ChangeKind::from_operation(descriptor.operation).unwrap_or(ChangeKind::Update);
                Ok(vec![self.confirm_and_notify(descriptor.id, &descriptor.table, kind, &record)])
            }
            WriteOutcome::Conflict { current } => {
                self.settle_conflict(descriptor, &id, current).await
            }
        }
    }

    /// Resolve a version conflict with the table's strategy and write the
    /// winner back. Subscribers see only the final value.
    async fn settle_conflict(
        &self,
        descriptor: &OperationDescriptor,
        id: &str,
        mut current: VersionedRecord,
    ) -> Result<Vec<Record>, PushError> {
        let table = descriptor.table.as_str();
        let strategy = self.strategy_for(table);

        for round in 1..=MAX_CONFLICT_ROUNDS {
            tracing::info!(
                table,
                id,
                round,
                strategy = strategy.name(),
                remote_version = current.version,
                "resolving conflict"
            );

            let write_back = match descriptor.operation {
                OperationKind::Delete => {
                    if matches!(strategy, ConflictStrategy::ServerWins) {
                        None
                    } else {
                        Some(
                            OperationDescriptor::delete(table, id_predicate(id))
                                .with_options(descriptor.options.clone()),
                        )
                    }
                }
                _ => {
                    let mut local = lock(&self.cache)
                        .confirmed(table, id)
                        .cloned()
                        .unwrap_or_default();
                    for (key, value) in descriptor.data.iter().flatten() {
                        local.insert(key.clone(), value.clone());
                    }
                    let resolved = self
                        .resolver
                        .resolve(&ConflictCase {
                            table,
                            local: &local,
                            remote: &current.record,
                            strategy: &strategy,
                        })
                        .map_err(|e| PushError::Terminal(e.into()))?;

                    (resolved != current.record).then(|| {
                        OperationDescriptor::update(table, resolved)
                            .with_options(descriptor.options.clone())
                    })
                }
            };

            let Some(write_back) = write_back else {
                tracing::debug!(table, id, "conflict settled in favour of remote");
                return Ok(vec![self.confirm_and_notify(
                    descriptor.id,
                    table,
                    ChangeKind::Update,
                    &current,
                )]);
            };

            let write = RemoteWrite::new(write_back).expecting(Some(current.version));
            match self.backend.apply(&write).await? {
                WriteOutcome::Applied { record } => {
                    let kind = if record.deleted {
                        ChangeKind::Delete
                    } else {
                        ChangeKind::from_operation(descriptor.operation)
                            .unwrap_or(ChangeKind::Update)
                    };
                    return Ok(vec![self.confirm_and_notify(
                        descriptor.id,
                        table,
                        kind,
                        &record,
                    )]);
                }
                WriteOutcome::Conflict { current: newer } => current = newer,
            }
        }

        Err(PushError::Transient(format!(
            "conflict on {table}/{id} still open after {MAX_CONFLICT_ROUNDS} rounds"
        )))
    }

    /// Record a confirmed version, keeping writes still queued for the row
    /// (other than `operation`) on top, and notify subscribers.
    fn confirm_and_notify(
        &self,
        operation: OperationId,
        table: &str,
        kind: ChangeKind,
        remote: &VersionedRecord,
    ) -> Record {
        {
            let mut cache = lock(&self.cache);
            let queue = lock(&self.queue);
            let id = sync_types::record_id(&remote.record).unwrap_or_default();
            let pending: Vec<_> = queue
                .pending_for(table, &id)
                .into_iter()
                .filter(|op| op.id() != operation)
                .collect();
            cache.confirm(table, remote, &pending);
        }
        self.notify(&ChangeEvent::confirmed(kind, table, remote.record.clone()));
        remote.record.clone()
    }
}

/// Releases whatever is still in flight from a batch when dropped. Ids
/// already acked or nacked are no longer in flight and are skipped.
struct InFlight<'a> {
    queue: &'a Mutex<OfflineQueue>,
    ids: Vec<OperationId>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        lock(self.queue).release(&self.ids);
    }
}

fn ids(ops: &[QueuedOperation]) -> Vec<OperationId> {
    ops.iter().map(QueuedOperation::id).collect()
}

fn id_predicate(id: &str) -> Record {
    let mut predicate = Record::new();
    predicate.insert(
        sync_types::RECORD_ID_FIELD.to_string(),
        serde_json::Value::String(id.to_string()),
    );
    predicate
}
