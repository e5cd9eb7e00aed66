//! # sync-migrate
//!
//! Schema migrations for Strata's local SQLite database.
//!
//! Migrations are plain SQL files named `NNN_description.sql` with an
//! `-- Up` section and an optional `-- Down` section. The runner applies
//! them in dependency order, one transaction per file, under a database
//! lock, and keeps an append-only ledger of everything it did.
//!
//! ## Example
//!
//! ```ignore
//! use sync_migrate::{MigrationRunner, UpOptions};
//!
//! let runner = MigrationRunner::connect("app.db".as_ref(), "migrations").await?;
//! let report = runner.up(UpOptions::default()).await?;
//! println!("applied {:?}", report.applied);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod lint;
pub mod parse;
pub mod report;
pub mod runner;
pub mod source;

pub use error::{MigrationError, MigrationResult};
pub use lint::check_sql;
pub use parse::legacy::parse_legacy;
pub use parse::{checksum, parse_file_name, parse_migration_file, MigrationUnit};
pub use report::{
    AppliedMigration, CreatedMigration, DownReport, MigrationFailure, MigrationStatus,
    PlannedMigration, RollbackReport, UpOptions, UpReport, ValidateOptions, ValidationReport,
};
pub use runner::{MigrationRunner, RunnerOptions, DEFAULT_LOCK_TIMEOUT};
pub use source::{discover, order};
