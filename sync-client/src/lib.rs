//! # sync-client
//!
//! Local-first sync coordinator for Strata.
//!
//! This is the main library that applications use to read and write data.
//!
//! ## Features
//!
//! - **Offline Writes**: Optimistic local apply, bounded FIFO replay queue
//! - **Durable Queue**: Pending writes survive restarts (SQLite via sqlx)
//! - **Conflict Resolution**: Last-write-wins, server-wins, field merge, custom
//! - **Subscriptions**: Per-table change notifications
//! - **Pure State Machine**: Uses sync-core for side-effect-free logic
//!
//! ## Example
//!
//! ```ignore
//! use sync_client::{MockBackend, SyncConfig, SyncCoordinator, TableSyncConfig};
//!
//! let coordinator = SyncCoordinator::new(MockBackend::new(), SyncConfig::default());
//! coordinator.configure_sync_for_table(TableSyncConfig::new("tasks"))?;
//!
//! // Works offline; replayed on connect
//! coordinator.execute_operation(OperationDescriptor::insert("tasks", record)).await?;
//! coordinator.connect().await?;
//! coordinator.sync(Some("tasks")).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod cache;
pub mod config;
pub mod connection;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod periodic;
pub mod store;

pub use backend::{
    Backend, BackendError, ChangeBatch, MockBackend, RemoteWrite, VersionedRecord, WriteOutcome,
};
pub use cache::{LocalCache, LocalChange};
pub use config::{
    CacheStrategy, ConflictResolution, SyncConfig, SyncSettings, TableSyncConfig,
    DEFAULT_BATCH_SIZE,
};
pub use connection::{ConnectionManager, SyncActivityGuard};
pub use context::{SyncContext, SyncContextBuilder};
pub use coordinator::{OperationResult, ReplayFailure, SyncCoordinator};
pub use error::{ConnectionError, SyncError};
pub use periodic::spawn_periodic_sync;
pub use store::{QueueStore, SqliteQueueStore, StoreError};
