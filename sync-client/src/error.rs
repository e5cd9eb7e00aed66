//! Error types for sync-client.

use sync_core::{IntegrityError, QueueError, ResolutionError};
use sync_types::OperationId;
use thiserror::Error;

use crate::backend::BackendError;
use crate::store::StoreError;

/// Connection errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// The backend refused or failed the connection attempt.
    #[error("connection failed: {0}")]
    Failed(String),
}

/// Errors returned by the sync coordinator.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The operation needs a live connection.
    #[error("not connected")]
    NotConnected,

    /// Connection error.
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// The offline queue is full; the operation was not accepted.
    #[error("offline queue full (capacity: {capacity})")]
    QueueOverflow {
        /// Queue capacity.
        capacity: usize,
    },

    /// A conflict could not be resolved.
    #[error("conflict resolution failed: {0}")]
    Resolution(#[from] ResolutionError),

    /// The retry budget ran out; local state was reverted.
    #[error("operation {operation_id} failed after {attempts} attempts")]
    Exhausted {
        /// The failed operation.
        operation_id: OperationId,
        /// Attempts made.
        attempts: u32,
    },

    /// The remote store refused the write; local state was reverted.
    #[error("rejected by remote store: {0}")]
    Rejected(String),

    /// A foreign key points at a missing parent.
    #[error("integrity violation: {0}")]
    Integrity(#[from] IntegrityError),

    /// The descriptor cannot be executed as given.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Traffic is paused while migrations run.
    #[error("migration in progress")]
    MigrationInProgress,

    /// The table was migrated to a schema queued writes no longer fit.
    #[error("table {table} was migrated to an incompatible schema")]
    IncompatibleSchema {
        /// The migrated table.
        table: String,
    },

    /// A table names a custom resolver that was never registered.
    #[error("unknown conflict resolver: {0}")]
    UnknownResolver(String),

    /// Durable queue storage failed.
    #[error("queue store error: {0}")]
    Store(#[from] StoreError),

    /// Backend error.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
}

impl From<QueueError> for SyncError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Overflow { capacity } => Self::QueueOverflow { capacity },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_overflow_maps_to_sync_error() {
        let err: SyncError = QueueError::Overflow { capacity: 3 }.into();
        assert!(matches!(err, SyncError::QueueOverflow { capacity: 3 }));
        assert_eq!(err.to_string(), "offline queue full (capacity: 3)");
    }
}
