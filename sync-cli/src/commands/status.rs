//! Show migration status and sync settings.

use anyhow::Result;

use super::{open_runner, print_json};
use crate::config::StrataConfig;

/// Run the status command.
pub async fn run(config: &StrataConfig, json: bool) -> Result<()> {
    let runner = open_runner(config).await?;
    let status = runner.status().await?;

    if json {
        return print_json(&status);
    }

    println!("=== sync-cli status ===");
    println!();
    println!("Database:   {}", config.database.path.display());
    println!("Migrations: {}", config.migrations.directory.display());
    println!(
        "Current:    {}",
        status.current.as_deref().unwrap_or("(none)")
    );
    println!();

    println!("Applied ({}):", status.applied.len());
    for applied in &status.applied {
        println!("  {}  {}", applied.name, applied.executed_at);
    }

    println!("Pending ({}):", status.pending.len());
    for name in &status.pending {
        println!("  {}", name);
    }

    println!();
    if config.sync.tables.is_empty() {
        println!("Sync: no tables configured");
    } else {
        println!("Sync tables:");
        for table in &config.sync.tables {
            println!(
                "  {} (realtime: {}, conflicts: {:?}, every {}ms)",
                table.table, table.realtime, table.conflict_resolution, table.sync_interval_ms
            );
        }
    }

    Ok(())
}
