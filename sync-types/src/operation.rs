//! Operation descriptors: the unit of work passed between all components.
//!
//! A descriptor identifies exactly one intended read or mutation against one
//! table. It is immutable once built; the builder methods consume `self`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{record_id, CodecError, OperationId, Record};

/// The verb of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Create a new record.
    Insert,
    /// Read records matching a predicate.
    Select,
    /// Modify an existing record.
    Update,
    /// Remove an existing record.
    Delete,
}

impl OperationKind {
    /// Whether this operation mutates state (and is therefore queueable).
    pub fn is_write(&self) -> bool {
        !matches!(self, Self::Select)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Insert => "insert",
            Self::Select => "select",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Per-operation options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationOptions {
    /// The user on whose behalf the operation runs.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Whether subscribers should be notified in real time.
    #[serde(default)]
    pub realtime: bool,
    /// Whether reads may be served from the local cache.
    #[serde(default)]
    pub cache: bool,
    /// How long cached reads stay fresh, in seconds.
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
}

/// One intended mutation or read against a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDescriptor {
    /// Identity used by the offline queue.
    pub id: OperationId,
    /// Target table.
    pub table: String,
    /// Operation verb.
    pub operation: OperationKind,
    /// Row payload for insert/update.
    #[serde(default)]
    pub data: Option<Record>,
    /// Equality predicate for select/update/delete.
    #[serde(default)]
    pub predicate: Option<Record>,
    /// Operation options.
    #[serde(default)]
    pub options: OperationOptions,
}

impl OperationDescriptor {
    /// Create a descriptor with no payload or predicate.
    pub fn new(table: impl Into<String>, operation: OperationKind) -> Self {
        Self {
            id: OperationId::new(),
            table: table.into(),
            operation,
            data: None,
            predicate: None,
            options: OperationOptions::default(),
        }
    }

    /// Insert `data` into `table`.
    pub fn insert(table: impl Into<String>, data: Record) -> Self {
        Self::new(table, OperationKind::Insert).with_data(data)
    }

    /// Select rows of `table` (all rows unless a predicate is added).
    pub fn select(table: impl Into<String>) -> Self {
        Self::new(table, OperationKind::Select)
    }

    /// Update the row identified by `data`'s id (or a predicate).
    pub fn update(table: impl Into<String>, data: Record) -> Self {
        Self::new(table, OperationKind::Update).with_data(data)
    }

    /// Delete the row matched by `predicate`.
    pub fn delete(table: impl Into<String>, predicate: Record) -> Self {
        Self::new(table, OperationKind::Delete).with_predicate(predicate)
    }

    /// Set the row payload.
    pub fn with_data(mut self, data: Record) -> Self {
        self.data = Some(data);
        self
    }

    /// Set the equality predicate.
    pub fn with_predicate(mut self, predicate: Record) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Replace the options.
    pub fn with_options(mut self, options: OperationOptions) -> Self {
        self.options = options;
        self
    }

    /// The primary key of the row this operation targets, if any.
    ///
    /// Looks at the payload first, then the predicate.
    pub fn target_id(&self) -> Option<String> {
        self.data
            .as_ref()
            .and_then(record_id)
            .or_else(|| self.predicate.as_ref().and_then(record_id))
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
