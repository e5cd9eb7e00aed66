//! CLI command implementations.

pub mod backup;
pub mod create;
pub mod migrate;
pub mod status;
pub mod validate;

use anyhow::{Context, Result};
use serde::Serialize;
use sync_migrate::MigrationRunner;

use crate::config::StrataConfig;

/// Open the configured database with the configured migrations directory.
pub async fn open_runner(config: &StrataConfig) -> Result<MigrationRunner> {
    let runner = MigrationRunner::connect(&config.database.path, &config.migrations.directory)
        .await
        .with_context(|| format!("Failed to open database {}", config.database.path.display()))?;
    Ok(runner.with_options(config.migrations.runner_options()))
}

/// Print a report as pretty JSON.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
