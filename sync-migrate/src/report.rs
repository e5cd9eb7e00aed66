//! Options and reports for [`MigrationRunner`](crate::MigrationRunner)
//! operations.

use serde::Serialize;
use std::path::PathBuf;

/// A migration recorded as applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedMigration {
    /// Migration name.
    pub name: String,
    /// Numeric prefix.
    pub version: u32,
    /// Checksum recorded when it ran.
    pub checksum: String,
    /// RFC 3339 time it ran.
    pub executed_at: String,
}

/// Result of `status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    /// Most recently applied migration.
    pub current: Option<String>,
    /// Migrations on disk that have not run, in execution order.
    pub pending: Vec<String>,
    /// Applied migrations, oldest first.
    pub applied: Vec<AppliedMigration>,
}

/// Options for `up`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpOptions {
    /// Report the plan without executing or locking.
    pub dry_run: bool,
    /// Back the database up before applying anything.
    pub backup: bool,
}

/// A migration `up` would run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedMigration {
    /// Migration name.
    pub name: String,
    /// Up SQL.
    pub sql: String,
}

/// A problem found while applying migrations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationFailure {
    /// Migration that failed, or `None` for checks after the run.
    pub name: Option<String>,
    /// What went wrong.
    pub error: String,
}

/// Result of `up`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpReport {
    /// Migrations applied, in order.
    pub applied: Vec<String>,
    /// The failed migration (execution stops there) and any foreign key
    /// violations found afterwards.
    pub errors: Vec<MigrationFailure>,
    /// Wall time.
    pub execution_time_ms: u64,
    /// Planned migrations, filled for dry runs only.
    pub preview: Vec<PlannedMigration>,
    /// Backup taken before applying.
    pub backup: Option<PathBuf>,
}

impl UpReport {
    /// Whether the run finished without errors.
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Result of `down`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownReport {
    /// Migration rolled back.
    pub rolled_back: String,
    /// Wall time.
    pub execution_time_ms: u64,
}

/// Result of `rollback_to`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RollbackReport {
    /// Migrations rolled back, newest first.
    pub rolled_back: Vec<String>,
}

/// Options for `validate`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidateOptions {
    /// Execute Up then Down inside a transaction that is always rolled back.
    pub schema_check: bool,
}

/// Result of `validate`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    /// No errors found.
    pub valid: bool,
    /// Problems that would make the migration fail or misbehave.
    pub errors: Vec<String>,
    /// Problems worth a look.
    pub warnings: Vec<String>,
}

/// Result of `create`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedMigration {
    /// File name, e.g. `004_add_tags.sql`.
    pub filename: String,
    /// Full path.
    pub path: PathBuf,
    /// Version assigned.
    pub version: u32,
}
