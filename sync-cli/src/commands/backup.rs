//! Backup, restore and lock maintenance.

use anyhow::Result;
use std::path::Path;

use super::open_runner;
use crate::config::StrataConfig;

/// Run the backup command.
pub async fn backup(config: &StrataConfig, path: &Path) -> Result<()> {
    let runner = open_runner(config).await?;
    runner.backup(path).await?;
    println!("Backed up to {}", path.display());
    Ok(())
}

/// Run the restore command.
pub async fn restore(config: &StrataConfig, path: &Path) -> Result<()> {
    let runner = open_runner(config).await?;
    runner.restore(path).await?;
    println!("Restored from {}", path.display());
    Ok(())
}

/// Run the unlock command.
pub async fn unlock(config: &StrataConfig) -> Result<()> {
    let runner = open_runner(config).await?;
    if runner.force_unlock().await? {
        println!("Migration lock cleared.");
    } else {
        println!("Migration lock was not held.");
    }
    Ok(())
}
