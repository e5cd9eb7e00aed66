//! # sync-types
//!
//! Shared types for the Strata local-first sync engine.
//!
//! This crate provides the foundational types used across all Strata crates:
//! - [`OperationId`], [`Cursor`] - Identity and ordering types
//! - [`OperationDescriptor`] - The unit of work submitted to the coordinator
//! - [`Record`] - JSON object rows and their helpers
//! - [`ChangeEvent`] - Notifications delivered to subscribers
//! - [`CodecError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod change;
mod error;
mod ids;
mod operation;
mod record;

pub use change::{ChangeEvent, ChangeKind, ChangeStatus};
pub use error::CodecError;
pub use ids::{Cursor, OperationId};
pub use operation::{OperationDescriptor, OperationKind, OperationOptions};
pub use record::{matches_predicate, record_id, Record, RECORD_ID_FIELD};
