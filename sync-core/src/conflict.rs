//! Conflict resolution for Strata sync.
//!
//! A conflict is two divergent versions of the same record: the one in the
//! local cache and the one the remote store currently holds. Resolution is a
//! pure function of the [`ConflictCase`]; the same input always produces the
//! same record, and neither input is modified.
//!
//! Strategies:
//! - [`ConflictStrategy::LastWriteWins`] - later `updatedAt` wins; ties go to
//!   the resolver's [`TieBreak`] (remote unless overridden)
//! - [`ConflictStrategy::ServerWins`] - remote, unconditionally
//! - [`ConflictStrategy::FieldMerge`] - field-level merge, see
//!   [`ConflictResolver::resolve`]
//! - [`ConflictStrategy::Custom`] - caller-supplied function

use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use sync_types::Record;
use thiserror::Error;

/// Field compared by last-write-wins.
pub const UPDATED_AT_FIELD: &str = "updatedAt";

/// Snake-case alias accepted for [`UPDATED_AT_FIELD`].
pub const UPDATED_AT_ALIAS: &str = "updated_at";

/// Object field whose keys are shallow-merged by field merge.
pub const METADATA_FIELD: &str = "metadata";

/// Who wins when both sides carry the same `updatedAt`.
///
/// The remote store is the tie-break authority by default. Kept as a named,
/// overridable setting because ties are rare enough that the right answer
/// depends on the application.
pub const DEFAULT_TIE_BREAK: TieBreak = TieBreak::Remote;

/// Caller-supplied resolution function. Receives `(local, remote)`.
pub type CustomResolver = Arc<dyn Fn(&Record, &Record) -> Record + Send + Sync>;

/// Which version of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The local cache's version.
    Local,
    /// The remote store's version.
    Remote,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Local => f.write_str("local"),
            Side::Remote => f.write_str("remote"),
        }
    }
}

/// Tie-break preference for last-write-wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TieBreak {
    /// Keep the local version on a tie.
    Local,
    /// Keep the remote version on a tie.
    Remote,
}

/// How to resolve a conflict.
#[derive(Clone)]
pub enum ConflictStrategy {
    /// Compare `updatedAt`; later wins.
    LastWriteWins,
    /// Always keep the remote version.
    ServerWins,
    /// Merge field by field.
    FieldMerge {
        /// Array fields treated as sets (deduplicated on merge).
        set_valued: BTreeSet<String>,
    },
    /// Caller-supplied function.
    Custom(CustomResolver),
}

impl ConflictStrategy {
    /// Field merge with no set-valued fields.
    pub fn field_merge() -> Self {
        Self::FieldMerge {
            set_valued: BTreeSet::new(),
        }
    }

    /// Field merge treating the named array fields as sets.
    pub fn field_merge_with_sets<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::FieldMerge {
            set_valued: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Wrap a resolution function.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Record, &Record) -> Record + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::LastWriteWins => "last_write_wins",
            Self::ServerWins => "server_wins",
            Self::FieldMerge { .. } => "field_merge",
            Self::Custom(_) => "custom",
        }
    }
}

impl Default for ConflictStrategy {
    fn default() -> Self {
        Self::LastWriteWins
    }
}

impl fmt::Debug for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FieldMerge { set_valued } => f
                .debug_struct("FieldMerge")
                .field("set_valued", set_valued)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(<fn>)"),
            other => f.write_str(other.name()),
        }
    }
}

/// One conflict to resolve. Borrowed: constructed and consumed within a
/// single resolution call.
#[derive(Debug, Clone, Copy)]
pub struct ConflictCase<'a> {
    /// Table the record belongs to.
    pub table: &'a str,
    /// Local cache version.
    pub local: &'a Record,
    /// Remote store version.
    pub remote: &'a Record,
    /// Strategy configured for the table.
    pub strategy: &'a ConflictStrategy,
}

/// Errors for malformed conflict input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    /// Last-write-wins needs `updatedAt` on both sides.
    #[error("{table}: {side} record has no {UPDATED_AT_FIELD}")]
    MissingTimestamp {
        /// Table of the conflicting record.
        table: String,
        /// Which side lacked the field.
        side: Side,
    },

    /// `updatedAt` present but not a number or RFC 3339 timestamp.
    #[error("{table}: {side} {UPDATED_AT_FIELD} is not a timestamp: {value}")]
    InvalidTimestamp {
        /// Table of the conflicting record.
        table: String,
        /// Which side had the bad value.
        side: Side,
        /// The offending value.
        value: String,
    },
}

/// Resolves conflict cases.
#[derive(Debug, Clone)]
pub struct ConflictResolver {
    tie_break: TieBreak,
}

impl ConflictResolver {
    /// Create a resolver with [`DEFAULT_TIE_BREAK`].
    pub fn new() -> Self {
        Self {
            tie_break: DEFAULT_TIE_BREAK,
        }
    }

    /// Override the last-write-wins tie-break.
    pub fn with_tie_break(mut self, tie_break: TieBreak) -> Self {
        self.tie_break = tie_break;
        self
    }

    /// The configured tie-break.
    pub fn tie_break(&self) -> TieBreak {
        self.tie_break
    }

    /// Resolve a conflict case into the record to keep.
    ///
    /// Field merge starts from the local record and folds in each remote
    /// field: when both sides hold arrays they are concatenated
    /// `local ++ remote` with duplicates kept (set-valued fields are
    /// deduplicated, first occurrence wins); when both hold a `metadata`
    /// object the two are merged one level deep with the same rule; any
    /// other collision takes the remote value.
    pub fn resolve(&self, case: &ConflictCase<'_>) -> Result<Record, ResolutionError> {
        match case.strategy {
            ConflictStrategy::ServerWins => Ok(case.remote.clone()),
            ConflictStrategy::LastWriteWins => self.last_write_wins(case),
            ConflictStrategy::FieldMerge { set_valued } => {
                Ok(merge_fields(case.local, case.remote, set_valued, true))
            }
            ConflictStrategy::Custom(resolve) => Ok(resolve(case.local, case.remote)),
        }
    }

    fn last_write_wins(&self, case: &ConflictCase<'_>) -> Result<Record, ResolutionError> {
        let local = updated_at_millis(case.table, case.local, Side::Local)?;
        let remote = updated_at_millis(case.table, case.remote, Side::Remote)?;

        let winner = match local.cmp(&remote) {
            std::cmp::Ordering::Greater => Side::Local,
            std::cmp::Ordering::Less => Side::Remote,
            std::cmp::Ordering::Equal => match self.tie_break {
                TieBreak::Local => Side::Local,
                TieBreak::Remote => Side::Remote,
            },
        };

        Ok(match winner {
            Side::Local => case.local.clone(),
            Side::Remote => case.remote.clone(),
        })
    }
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Read `updatedAt` (or `updated_at`) as unix milliseconds.
///
/// Numbers are taken as milliseconds; strings may be integers or RFC 3339.
fn updated_at_millis(table: &str, record: &Record, side: Side) -> Result<i64, ResolutionError> {
    let value = record
        .get(UPDATED_AT_FIELD)
        .or_else(|| record.get(UPDATED_AT_ALIAS))
        .filter(|v| !v.is_null())
        .ok_or_else(|| ResolutionError::MissingTimestamp {
            table: table.to_string(),
            side,
        })?;

    let invalid = || ResolutionError::InvalidTimestamp {
        table: table.to_string(),
        side,
        value: value.to_string(),
    };

    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(invalid),
        Value::String(s) => {
            if let Ok(millis) = s.parse::<i64>() {
                return Ok(millis);
            }
            chrono::DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.timestamp_millis())
                .map_err(|_| invalid())
        }
        _ => Err(invalid()),
    }
}

fn merge_fields(
    local: &Record,
    remote: &Record,
    set_valued: &BTreeSet<String>,
    descend: bool,
) -> Record {
    let mut merged = local.clone();
    for (key, remote_value) in remote {
        let value = match (merged.get(key), remote_value) {
            (Some(Value::Array(l)), Value::Array(r)) => {
                Value::Array(concat_arrays(l, r, set_valued.contains(key)))
            }
            (Some(Value::Object(l)), Value::Object(r)) if descend && key == METADATA_FIELD => {
                Value::Object(merge_fields(l, r, set_valued, false))
            }
            _ => remote_value.clone(),
        };
        merged.insert(key.clone(), value);
    }
    merged
}

fn concat_arrays(local: &[Value], remote: &[Value], dedup: bool) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(local.len() + remote.len());
    for value in local.iter().chain(remote.iter()) {
        if dedup && out.contains(value) {
            continue;
        }
        out.push(value.clone());
    }
    out
}
