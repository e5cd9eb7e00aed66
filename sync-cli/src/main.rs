//! # sync-cli
//!
//! Operator tool for Strata databases.
//!
//! ## Commands
//!
//! - `status`: Show applied and pending migrations
//! - `up`: Apply pending migrations
//! - `down`: Roll back the latest migration
//! - `rollback`: Roll back to a version
//! - `validate`: Check a migration file
//! - `create`: Create a migration file
//! - `backup` / `restore`: Copy the database out and back
//! - `unlock`: Clear a stuck migration lock
//!
//! ## Example
//!
//! ```bash
//! # Create a migration and fill in its -- Up / -- Down sections
//! sync-cli create "add tags"
//!
//! # Check it, including a trial run that is rolled back
//! sync-cli validate 002_add_tags --schema
//!
//! # See what would run, then run it with a backup first
//! sync-cli up --dry-run
//! sync-cli up --backup
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use sync_migrate::UpOptions;
use tracing_subscriber::prelude::*;

mod commands;
mod config;

use commands::{backup, create, migrate, status, validate};
use config::StrataConfig;

const DEFAULT_CONFIG: &str = "strata.toml";

/// Operator tool for Strata databases.
#[derive(Parser, Debug)]
#[command(name = "sync-cli")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: strata.toml, if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print reports as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show applied and pending migrations
    Status,

    /// Apply pending migrations
    Up {
        /// Show what would run without touching the database
        #[arg(long)]
        dry_run: bool,

        /// Back the database up before applying
        #[arg(long)]
        backup: bool,
    },

    /// Roll back the latest migration
    Down,

    /// Roll back until VERSION is the latest applied migration (0 for all)
    Rollback {
        /// Target version
        version: u32,
    },

    /// Check a migration file
    Validate {
        /// Migration name, e.g. 002_add_tags
        name: String,

        /// Also run Up and Down inside a transaction that is rolled back
        #[arg(long)]
        schema: bool,
    },

    /// Create a migration file with the next version number
    Create {
        /// Description, e.g. "add tags"
        name: String,
    },

    /// Copy the database to a file
    Backup {
        /// Destination file (must not exist)
        path: PathBuf,
    },

    /// Replace the database contents with a backup
    Restore {
        /// Backup file
        path: PathBuf,
    },

    /// Clear the migration lock left by a crashed run
    Unlock,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let json = cli.json;

    match cli.command {
        Commands::Status => {
            status::run(&config, json).await?;
        }
        Commands::Up { dry_run, backup } => {
            migrate::up(&config, UpOptions { dry_run, backup }, json).await?;
        }
        Commands::Down => {
            migrate::down(&config, json).await?;
        }
        Commands::Rollback { version } => {
            migrate::rollback(&config, version, json).await?;
        }
        Commands::Validate { name, schema } => {
            validate::run(&config, &name, schema, json).await?;
        }
        Commands::Create { name } => {
            create::run(&config, &name, json).await?;
        }
        Commands::Backup { path } => {
            backup::backup(&config, &path).await?;
        }
        Commands::Restore { path } => {
            backup::restore(&config, &path).await?;
        }
        Commands::Unlock => {
            backup::unlock(&config).await?;
        }
    }

    Ok(())
}

/// Load the given config file, or `strata.toml` if it exists, or defaults.
fn load_config(path: Option<&Path>) -> Result<StrataConfig> {
    match path {
        Some(path) => StrataConfig::from_file(path).context("Failed to load configuration"),
        None if Path::new(DEFAULT_CONFIG).exists() => {
            StrataConfig::from_file(Path::new(DEFAULT_CONFIG))
                .context("Failed to load configuration")
        }
        None => {
            tracing::debug!("no {} found, using defaults", DEFAULT_CONFIG);
            Ok(StrataConfig::default())
        }
    }
}
