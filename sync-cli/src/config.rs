//! Configuration loading for sync-cli.
//!
//! Configuration is loaded from a TOML file (default: `strata.toml`).

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use sync_client::SyncSettings;
use sync_migrate::RunnerOptions;

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StrataConfig {
    /// Local database.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Migration runner settings.
    #[serde(default)]
    pub migrations: MigrationsConfig,
    /// Per-table sync settings.
    #[serde(default)]
    pub sync: SyncSettings,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file (default: strata.db).
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

/// Migration runner configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MigrationsConfig {
    /// Directory holding `NNN_description.sql` files (default: migrations).
    #[serde(default = "default_migrations_dir")]
    pub directory: PathBuf,
    /// Where `up --backup` writes backups (default: backups).
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,
    /// Age in seconds after which a held lock may be taken over (default: 600).
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
}

// Default value functions
fn default_database_path() -> PathBuf {
    PathBuf::from("strata.db")
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from("migrations")
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from("backups")
}

fn default_lock_timeout_secs() -> u64 {
    600 // 10 minutes
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            directory: default_migrations_dir(),
            backup_dir: default_backup_dir(),
            lock_timeout_secs: default_lock_timeout_secs(),
        }
    }
}

impl MigrationsConfig {
    /// Runner settings for this configuration.
    pub fn runner_options(&self) -> RunnerOptions {
        RunnerOptions {
            lock_timeout: Duration::from_secs(self.lock_timeout_secs),
            backup_dir: self.backup_dir.clone(),
        }
    }
}

impl StrataConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}
