//! Remote store abstraction for Strata.
//!
//! The coordinator talks to the authoritative store only through the
//! [`Backend`] trait. The store keeps a version per record and a cursor per
//! write, which is what makes conflict detection and incremental pulls
//! possible.
//!
//! # Design
//!
//! The backend is async and connection-oriented:
//! - `connect()` establishes a session
//! - `apply()` performs one write, optionally guarded by an expected version
//! - `select()` reads rows matching a predicate
//! - `changes_since()` pages through writes after a cursor
//! - `close()` ends the session
//!
//! # Example
//!
//! ```ignore
//! let backend = MockBackend::new();
//! backend.connect().await?;
//! let outcome = backend.apply(&RemoteWrite::new(descriptor)).await?;
//! ```

mod mock;

pub use mock::MockBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sync_types::{Cursor, OperationDescriptor, Record};
use thiserror::Error;

/// Backend errors.
///
/// Split by what the coordinator should do next: connection losses flip the
/// connection state, transient failures are retried, rejections are final.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Connection attempt failed.
    #[error("connection failed: {0}")]
    ConnectFailed(String),

    /// The session went away mid-call.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// The store could not handle the request right now.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The store refused the write; retrying will not help.
    #[error("rejected: {0}")]
    Rejected(String),
}

impl BackendError {
    /// Whether the error means the session is gone.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, Self::ConnectionLost(_) | Self::NotConnected)
    }

    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::ConnectFailed(_))
    }
}

/// A record as the store holds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedRecord {
    /// Row contents. For deletions, the last contents before removal.
    pub record: Record,
    /// Per-record version, bumped on every write.
    pub version: u64,
    /// Store-wide cursor of the write that produced this version.
    pub cursor: Cursor,
    /// Whether this version is a deletion.
    #[serde(default)]
    pub deleted: bool,
}

/// One write sent to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteWrite {
    /// The write to perform.
    pub descriptor: OperationDescriptor,
    /// Fail with [`WriteOutcome::Conflict`] unless the stored record is at
    /// this version. `None` writes blindly.
    pub expected_version: Option<u64>,
}

impl RemoteWrite {
    /// An unguarded write.
    pub fn new(descriptor: OperationDescriptor) -> Self {
        Self {
            descriptor,
            expected_version: None,
        }
    }

    /// Guard the write with an expected version.
    pub fn expecting(mut self, version: Option<u64>) -> Self {
        self.expected_version = version;
        self
    }
}

/// Result of a write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// The write was applied. Carries the resulting record version.
    Applied {
        /// The record after the write.
        record: VersionedRecord,
    },
    /// The stored record diverged from what the writer expected.
    Conflict {
        /// The record the store currently holds.
        current: VersionedRecord,
    },
}

/// One page of changes from [`Backend::changes_since`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeBatch {
    /// Changed records in cursor order.
    pub records: Vec<VersionedRecord>,
    /// Cursor of the last record in the page (or the requested cursor if
    /// the page is empty).
    pub max_cursor: Cursor,
    /// Whether more changes follow.
    pub has_more: bool,
}

/// The authoritative remote store.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Open a session.
    async fn connect(&self) -> Result<(), BackendError>;

    /// Close the session.
    async fn close(&self) -> Result<(), BackendError>;

    /// Check if a session is open.
    fn is_connected(&self) -> bool;

    /// Perform one write.
    async fn apply(&self, write: &RemoteWrite) -> Result<WriteOutcome, BackendError>;

    /// Read live rows of `table` matching `predicate` (all rows if `None`).
    async fn select(
        &self,
        table: &str,
        predicate: Option<&Record>,
    ) -> Result<Vec<VersionedRecord>, BackendError>;

    /// Page through writes to `table` with a cursor greater than `after`.
    async fn changes_since(
        &self,
        table: &str,
        after: Cursor,
        limit: usize,
    ) -> Result<ChangeBatch, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(BackendError::ConnectionLost("reset".into()).is_connection_loss());
        assert!(BackendError::NotConnected.is_connection_loss());
        assert!(BackendError::Unavailable("busy".into()).is_transient());
        assert!(!BackendError::Rejected("bad".into()).is_transient());
        assert!(!BackendError::Rejected("bad".into()).is_connection_loss());
    }
}
