//! # sync-core
//!
//! Pure logic for Strata sync (no I/O, instant tests).
//!
//! This crate implements the state machines and algorithms for sync
//! without any network or disk I/O, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (remote store, disk) is performed by `sync-client`, which
//! interprets the actions produced by these state machines. Clocks are passed
//! in by the caller; nothing here reads the system time.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod conflict;
pub mod cursor;
pub mod integrity;
pub mod listeners;
pub mod queue;
pub mod state;
pub mod subscription;
pub mod throttle;

pub use conflict::{
    ConflictCase, ConflictResolver, ConflictStrategy, CustomResolver, ResolutionError, Side,
    TieBreak, DEFAULT_TIE_BREAK,
};
pub use cursor::TableCursors;
pub use integrity::{check_references, ForeignKey, IntegrityError};
pub use listeners::{ListenerHandle, ListenerSet};
pub use queue::{
    NackOutcome, OfflineQueue, QueueError, QueuedOperation, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_QUEUE_CAPACITY,
};
pub use state::{Action, ConnectionState, Event, StatusSnapshot, SyncActivity, SyncEvent};
pub use subscription::{ChangeCallback, SubscribeOptions, Subscription, SubscriptionRegistry};
pub use throttle::{Throttle, DEFAULT_MIN_SPACING};
