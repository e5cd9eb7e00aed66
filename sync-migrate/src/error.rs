//! Error types for sync-migrate.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias for migration operations.
pub type MigrationResult<T> = Result<T, MigrationError>;

/// Migration errors. None of these are retried automatically.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Reading or writing a migration or backup file failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// File name does not follow `NNN_description.sql`.
    #[error("invalid migration file name: {0}")]
    InvalidFileName(String),

    /// A name given to `create` has nothing usable in it.
    #[error("invalid migration name: {0:?}")]
    InvalidName(String),

    /// A migration file could not be parsed.
    #[error("failed to parse migration {name}: {reason}")]
    Parse {
        /// Migration name.
        name: String,
        /// What is wrong.
        reason: String,
    },

    /// A dependency names no known migration.
    #[error("migration {migration} depends on unknown migration {dependency}")]
    UnknownDependency {
        /// Migration declaring the dependency.
        migration: String,
        /// The unknown name.
        dependency: String,
    },

    /// Dependencies form a cycle.
    #[error("dependency cycle among: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),

    /// Another runner holds the migration lock.
    #[error("migration lock held by {owner} since {since}")]
    LockHeld {
        /// Lock owner id.
        owner: String,
        /// Unix seconds when it was taken.
        since: i64,
    },

    /// An applied migration's file changed since it ran.
    #[error("checksum mismatch for {name}: recorded {recorded}, on disk {actual}")]
    ChecksumMismatch {
        /// Migration name.
        name: String,
        /// Checksum in the ledger.
        recorded: String,
        /// Checksum of the current file.
        actual: String,
    },

    /// A rollback reached a migration without Down SQL.
    #[error("migration {0} has no Down section and cannot be rolled back")]
    NotReversible(String),

    /// `down` with nothing applied.
    #[error("no applied migrations to roll back")]
    NothingToRollBack,

    /// `rollback_to` with a version that is not applied.
    #[error("version {0} is not applied")]
    UnknownVersion(u32),

    /// An applied migration has no file on disk.
    #[error("migration file for {0} not found")]
    MissingFile(String),

    /// No migration matches the given name.
    #[error("no migration named {0}")]
    NotFound(String),

    /// Refusing to overwrite an existing file.
    #[error("{0} already exists")]
    AlreadyExists(PathBuf),

    /// A migration's SQL failed; its transaction was rolled back.
    #[error("migration {name} failed: {source}")]
    Failed {
        /// Migration name.
        name: String,
        /// Database error.
        source: sqlx::Error,
    },
}

impl MigrationError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_lists_members() {
        let err = MigrationError::DependencyCycle(vec!["001_a".into(), "002_b".into()]);
        assert_eq!(err.to_string(), "dependency cycle among: 001_a, 002_b");
    }

    #[test]
    fn lock_held_names_owner() {
        let err = MigrationError::LockHeld {
            owner: "abc".into(),
            since: 42,
        };
        assert_eq!(err.to_string(), "migration lock held by abc since 42");
    }
}
