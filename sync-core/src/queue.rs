//! Offline operation queue for Strata sync.
//!
//! This module provides a bounded queue for writes captured while the
//! backend is unreachable, with:
//! - FIFO ordering for replay
//! - In-flight tracking (operations handed to a replay batch but not yet
//!   acknowledged by the remote store)
//! - A hard capacity: a full queue rejects new operations with
//!   [`QueueError::Overflow`] instead of evicting old ones
//! - A per-operation retry budget
//!
//! Operations flow through the queue in this order:
//! 1. `enqueue()` - add to the back of the queue
//! 2. `take_batch()` - move up to N operations into the in-flight set
//! 3. `ack()` - remove from in-flight (applied remotely)
//!
//! If a replay attempt fails, `nack()` charges one attempt and moves the
//! operation back to the front. If the batch is abandoned without charging
//! anyone (e.g. the connection dropped), `release()` returns the rest.
//! Release the tail of a batch *before* nacking its head so order survives.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use sync_types::{CodecError, OperationDescriptor, OperationId};
use thiserror::Error;

/// Default number of operations the queue holds (queued + in flight).
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Default number of failed replay attempts before an operation is dropped.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Error type for queue operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// Queue is at capacity.
    #[error("offline queue full (capacity: {capacity})")]
    Overflow {
        /// Current queue capacity.
        capacity: usize,
    },
}

/// An operation captured while offline, waiting for replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    /// The operation to replay.
    pub descriptor: OperationDescriptor,
    /// When the operation was captured (unix milliseconds).
    pub enqueued_at: u64,
    /// Number of failed replay attempts so far.
    pub attempts: u32,
}

impl QueuedOperation {
    /// Create a new queued operation with no attempts.
    pub fn new(descriptor: OperationDescriptor, enqueued_at: u64) -> Self {
        Self {
            descriptor,
            enqueued_at,
            attempts: 0,
        }
    }

    /// The operation's identity.
    pub fn id(&self) -> OperationId {
        self.descriptor.id
    }

    /// Target table.
    pub fn table(&self) -> &str {
        &self.descriptor.table
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        rmp_serde::to_vec_named(self).map_err(CodecError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        rmp_serde::from_slice(bytes).map_err(CodecError::Deserialization)
    }
}

/// Outcome of a negative acknowledgement.
#[derive(Debug, Clone, PartialEq)]
pub enum NackOutcome {
    /// The operation is back at the front of the queue.
    Requeued {
        /// Failed attempts so far.
        attempts: u32,
    },
    /// The retry budget is spent; the operation left the queue for good.
    Exhausted(QueuedOperation),
    /// No in-flight operation had that id.
    Unknown,
}

/// Bounded FIFO of offline operations with in-flight tracking.
#[derive(Debug)]
pub struct OfflineQueue {
    /// Maximum number of operations (queued + in flight).
    capacity: usize,
    /// Failed attempts allowed per operation.
    max_attempts: u32,
    /// Operations waiting for replay.
    queue: VecDeque<QueuedOperation>,
    /// Operations handed to a replay batch, in submission order.
    in_flight: Vec<QueuedOperation>,
}

impl OfflineQueue {
    /// Create a new queue with the given capacity.
    ///
    /// The capacity includes both queued and in-flight operations.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            queue: VecDeque::new(),
            in_flight: Vec::new(),
        }
    }

    /// Set the retry budget per operation (minimum 1).
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Add an operation to the back of the queue.
    ///
    /// Returns an error if the queue is full (queued + in-flight >= capacity).
    /// The queue is left untouched in that case.
    pub fn enqueue(&mut self, op: QueuedOperation) -> Result<(), QueueError> {
        if self.size() >= self.capacity {
            return Err(QueueError::Overflow {
                capacity: self.capacity,
            });
        }
        self.queue.push_back(op);
        Ok(())
    }

    /// Remove and return every queued operation in FIFO order.
    ///
    /// In-flight operations stay where they are.
    pub fn drain(&mut self) -> Vec<QueuedOperation> {
        self.queue.drain(..).collect()
    }

    /// Next operation a batch would take.
    pub fn front(&self) -> Option<&QueuedOperation> {
        self.queue.front()
    }

    /// Move up to `max` operations from the front into the in-flight set.
    pub fn take_batch(&mut self, max: usize) -> Vec<QueuedOperation> {
        let count = max.min(self.queue.len());
        let batch: Vec<QueuedOperation> = self.queue.drain(..count).collect();
        self.in_flight.extend(batch.iter().cloned());
        batch
    }

    /// Acknowledge successful replay of an operation.
    pub fn ack(&mut self, id: &OperationId) -> Option<QueuedOperation> {
        let index = self.in_flight.iter().position(|op| op.id() == *id)?;
        Some(self.in_flight.remove(index))
    }

    /// Negative acknowledge: charge one attempt and move the operation back
    /// to the front of the queue, or drop it once the budget is spent.
    pub fn nack(&mut self, id: &OperationId) -> NackOutcome {
        let Some(index) = self.in_flight.iter().position(|op| op.id() == *id) else {
            return NackOutcome::Unknown;
        };
        let mut op = self.in_flight.remove(index);
        op.attempts = op.attempts.saturating_add(1);
        if op.attempts >= self.max_attempts {
            return NackOutcome::Exhausted(op);
        }
        let attempts = op.attempts;
        self.queue.push_front(op);
        NackOutcome::Requeued { attempts }
    }

    /// Return in-flight operations to the front without charging an attempt.
    ///
    /// `ids[0]` ends up at the very front. Unknown ids are ignored.
    pub fn release(&mut self, ids: &[OperationId]) {
        for id in ids.iter().rev() {
            if let Some(index) = self.in_flight.iter().position(|op| op.id() == *id) {
                let op = self.in_flight.remove(index);
                self.queue.push_front(op);
            }
        }
    }

    /// Remove an operation wherever it is (queued or in flight).
    pub fn remove(&mut self, id: &OperationId) -> Option<QueuedOperation> {
        if let Some(index) = self.queue.iter().position(|op| op.id() == *id) {
            return self.queue.remove(index);
        }
        self.ack(id)
    }

    /// Remove every operation targeting `table`, in submission order.
    pub fn discard_table(&mut self, table: &str) -> Vec<QueuedOperation> {
        let mut removed: Vec<QueuedOperation> = Vec::new();
        self.in_flight.retain(|op| {
            if op.table() == table {
                removed.push(op.clone());
                false
            } else {
                true
            }
        });
        let (dropped, kept): (VecDeque<_>, VecDeque<_>) =
            self.queue.drain(..).partition(|op| op.table() == table);
        self.queue = kept;
        removed.extend(dropped);
        removed
    }

    /// Check whether an operation is in flight.
    pub fn is_in_flight(&self, id: &OperationId) -> bool {
        self.in_flight.iter().any(|op| op.id() == *id)
    }

    /// Check whether an operation is anywhere in the queue.
    pub fn contains(&self, id: &OperationId) -> bool {
        self.is_in_flight(id) || self.queue.iter().any(|op| op.id() == *id)
    }

    /// Pending operations (in flight first, then queued) that target the
    /// given record, in submission order.
    pub fn pending_for(&self, table: &str, record_id: &str) -> Vec<QueuedOperation> {
        self.iter()
            .filter(|op| {
                op.table() == table && op.descriptor.target_id().as_deref() == Some(record_id)
            })
            .cloned()
            .collect()
    }

    /// Iterate over every pending operation: in flight first, then queued.
    pub fn iter(&self) -> impl Iterator<Item = &QueuedOperation> {
        self.in_flight.iter().chain(self.queue.iter())
    }

    /// Copy of all pending operations for persistence.
    pub fn snapshot(&self) -> Vec<QueuedOperation> {
        self.iter().cloned().collect()
    }

    /// Replace the contents with previously persisted operations.
    ///
    /// Fails without modifying the queue if they do not fit.
    pub fn restore(&mut self, ops: Vec<QueuedOperation>) -> Result<(), QueueError> {
        if ops.len() > self.capacity {
            return Err(QueueError::Overflow {
                capacity: self.capacity,
            });
        }
        self.in_flight.clear();
        self.queue = ops.into();
        Ok(())
    }

    /// Total number of operations (queued + in flight).
    pub fn size(&self) -> usize {
        self.queue.len() + self.in_flight.len()
    }

    /// Number of operations waiting (not including in flight).
    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// Number of in-flight operations.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Check if the queue holds nothing at all.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Configured retry budget.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Clear all operations (both queued and in flight).
    pub fn clear(&mut self) {
        self.queue.clear();
        self.in_flight.clear();
    }
}

impl Default for OfflineQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sync_types::Record;

    fn obj(value: serde_json::Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn make_op(table: &str, id: &str) -> QueuedOperation {
        QueuedOperation::new(
            OperationDescriptor::insert(table, obj(json!({"id": id}))),
            1_700_000_000_000,
        )
    }

    fn ids(ops: &[QueuedOperation]) -> Vec<String> {
        ops.iter()
            .map(|op| op.descriptor.target_id().unwrap())
            .collect()
    }

    #[test]
    fn queue_holds_operations() {
        let mut queue = OfflineQueue::new(10);
        queue.enqueue(make_op("tasks", "t1")).unwrap();
        assert_eq!(queue.size(), 1);
        assert!(!queue.is_empty());
    }

    #[test]
    fn overflow_on_capacity_plus_one_leaves_size_at_capacity() {
        let capacity = 3;
        let mut queue = OfflineQueue::new(capacity);

        for i in 0..capacity {
            queue.enqueue(make_op("tasks", &format!("t{i}"))).unwrap();
        }
        let overflow = queue.enqueue(make_op("tasks", "extra"));

        assert_eq!(overflow, Err(QueueError::Overflow { capacity }));
        assert_eq!(queue.size(), capacity);
        assert_eq!(ids(&queue.snapshot()), vec!["t0", "t1", "t2"]);
    }

    #[test]
    fn drain_returns_fifo_order_and_empties() {
        let mut queue = OfflineQueue::new(10);
        for id in ["a", "b", "c"] {
            queue.enqueue(make_op("tasks", id)).unwrap();
        }

        let drained = queue.drain();

        assert_eq!(ids(&drained), vec!["a", "b", "c"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn take_batch_moves_to_in_flight() {
        let mut queue = OfflineQueue::new(10);
        for id in ["a", "b", "c"] {
            queue.enqueue(make_op("tasks", id)).unwrap();
        }

        let batch = queue.take_batch(2);

        assert_eq!(ids(&batch), vec!["a", "b"]);
        assert_eq!(queue.in_flight_count(), 2);
        assert_eq!(queue.queued_len(), 1);
        assert_eq!(queue.size(), 3);
        assert!(queue.is_in_flight(&batch[0].id()));
    }

    #[test]
    fn front_skips_in_flight() {
        let mut queue = OfflineQueue::new(10);
        assert!(queue.front().is_none());
        queue.enqueue(make_op("tasks", "a")).unwrap();
        queue.enqueue(make_op("projects", "b")).unwrap();

        let _ = queue.take_batch(1);

        assert_eq!(queue.front().map(QueuedOperation::table), Some("projects"));
    }

    #[test]
    fn in_flight_counts_toward_capacity() {
        let mut queue = OfflineQueue::new(2);
        queue.enqueue(make_op("tasks", "a")).unwrap();
        queue.enqueue(make_op("tasks", "b")).unwrap();
        let _ = queue.take_batch(1);

        assert!(queue.enqueue(make_op("tasks", "c")).is_err());
    }

    #[test]
    fn ack_frees_space() {
        let mut queue = OfflineQueue::new(2);
        queue.enqueue(make_op("tasks", "a")).unwrap();
        queue.enqueue(make_op("tasks", "b")).unwrap();

        let batch = queue.take_batch(1);
        assert!(queue.ack(&batch[0].id()).is_some());

        assert!(queue.enqueue(make_op("tasks", "c")).is_ok());
    }

    #[test]
    fn nack_charges_attempt_and_moves_to_front() {
        let mut queue = OfflineQueue::new(10);
        queue.enqueue(make_op("tasks", "a")).unwrap();
        queue.enqueue(make_op("tasks", "b")).unwrap();

        let batch = queue.take_batch(1);
        let outcome = queue.nack(&batch[0].id());

        assert_eq!(outcome, NackOutcome::Requeued { attempts: 1 });
        let retry = queue.take_batch(1);
        assert_eq!(ids(&retry), vec!["a"]);
        assert_eq!(retry[0].attempts, 1);
    }

    #[test]
    fn nack_exhausts_after_budget() {
        let mut queue = OfflineQueue::new(10).with_max_attempts(2);
        queue.enqueue(make_op("tasks", "a")).unwrap();

        let first = queue.take_batch(1);
        assert_eq!(
            queue.nack(&first[0].id()),
            NackOutcome::Requeued { attempts: 1 }
        );

        let second = queue.take_batch(1);
        match queue.nack(&second[0].id()) {
            NackOutcome::Exhausted(op) => assert_eq!(op.attempts, 2),
            other => panic!("expected exhaustion, got {:?}", other),
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn release_tail_then_nack_head_preserves_order() {
        let mut queue = OfflineQueue::new(10);
        for id in ["a", "b", "c", "d"] {
            queue.enqueue(make_op("tasks", id)).unwrap();
        }

        let batch = queue.take_batch(3);
        queue.release(&[batch[1].id(), batch[2].id()]);
        queue.nack(&batch[0].id());

        assert_eq!(ids(&queue.drain()), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn release_does_not_charge_attempts() {
        let mut queue = OfflineQueue::new(10);
        queue.enqueue(make_op("tasks", "a")).unwrap();

        let batch = queue.take_batch(1);
        queue.release(&[batch[0].id()]);

        assert_eq!(queue.drain()[0].attempts, 0);
    }

    #[test]
    fn nack_and_ack_unknown_are_no_ops() {
        let mut queue = OfflineQueue::new(10);
        let stranger = OperationId::new();

        assert_eq!(queue.nack(&stranger), NackOutcome::Unknown);
        assert!(queue.ack(&stranger).is_none());
        queue.release(&[stranger]);
        assert!(queue.is_empty());
    }

    #[test]
    fn discard_table_removes_only_that_table() {
        let mut queue = OfflineQueue::new(10);
        queue.enqueue(make_op("tasks", "a")).unwrap();
        queue.enqueue(make_op("notes", "n1")).unwrap();
        queue.enqueue(make_op("tasks", "b")).unwrap();
        let _ = queue.take_batch(1);

        let removed = queue.discard_table("tasks");

        assert_eq!(ids(&removed), vec!["a", "b"]);
        assert_eq!(ids(&queue.snapshot()), vec!["n1"]);
    }

    #[test]
    fn pending_for_filters_by_record() {
        let mut queue = OfflineQueue::new(10);
        queue.enqueue(make_op("tasks", "a")).unwrap();
        queue.enqueue(make_op("tasks", "b")).unwrap();
        queue.enqueue(make_op("notes", "a")).unwrap();

        let pending = queue.pending_for("tasks", "a");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].table(), "tasks");
    }

    #[test]
    fn remove_finds_queued_and_in_flight() {
        let mut queue = OfflineQueue::new(10);
        queue.enqueue(make_op("tasks", "a")).unwrap();
        queue.enqueue(make_op("tasks", "b")).unwrap();
        let batch = queue.take_batch(1);
        let queued_id = queue.snapshot()[1].id();

        assert!(queue.remove(&batch[0].id()).is_some());
        assert!(queue.remove(&queued_id).is_some());
        assert!(queue.is_empty());
    }

    #[test]
    fn snapshot_and_restore_keep_order() {
        let mut queue = OfflineQueue::new(10);
        for id in ["a", "b", "c"] {
            queue.enqueue(make_op("tasks", id)).unwrap();
        }
        let _ = queue.take_batch(1);
        let snapshot = queue.snapshot();

        let mut restored = OfflineQueue::new(10);
        restored.restore(snapshot).unwrap();

        assert_eq!(ids(&restored.drain()), vec!["a", "b", "c"]);
    }

    #[test]
    fn restore_rejects_more_than_capacity() {
        let mut queue = OfflineQueue::new(1);
        let ops = vec![make_op("tasks", "a"), make_op("tasks", "b")];
        assert!(queue.restore(ops).is_err());
        assert!(queue.is_empty());
    }

    #[test]
    fn queued_operation_survives_messagepack() {
        let mut op = make_op("tasks", "t1");
        op.attempts = 3;
        let decoded = QueuedOperation::from_bytes(&op.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, op);
    }

    #[test]
    fn clear_removes_all() {
        let mut queue = OfflineQueue::new(10);
        queue.enqueue(make_op("tasks", "a")).unwrap();
        queue.enqueue(make_op("tasks", "b")).unwrap();
        let _ = queue.take_batch(1);

        queue.clear();

        assert_eq!(queue.size(), 0);
        assert_eq!(queue.in_flight_count(), 0);
    }
}
