//! Apply and roll back migrations.

use anyhow::{bail, Result};
use sync_migrate::UpOptions;

use super::{open_runner, print_json};
use crate::config::StrataConfig;

/// Run the up command.
pub async fn up(config: &StrataConfig, options: UpOptions, json: bool) -> Result<()> {
    let runner = open_runner(config).await?;
    let report = runner.up(options).await?;

    if json {
        print_json(&report)?;
    } else if options.dry_run {
        if report.preview.is_empty() {
            println!("Nothing to apply.");
        }
        for planned in &report.preview {
            println!("-- {}", planned.name);
            println!("{}", planned.sql);
            println!();
        }
    } else {
        if let Some(backup) = &report.backup {
            println!("Backup: {}", backup.display());
        }
        for name in &report.applied {
            println!("Applied {}", name);
        }
        if report.applied.is_empty() && report.errors.is_empty() {
            println!("Database is up to date.");
        }
        for failure in &report.errors {
            match &failure.name {
                Some(name) => eprintln!("Error in {}: {}", name, failure.error),
                None => eprintln!("Error: {}", failure.error),
            }
        }
        println!("Done in {}ms", report.execution_time_ms);
    }

    if !report.is_success() {
        bail!("{} error(s) while applying migrations", report.errors.len());
    }
    Ok(())
}

/// Run the down command.
pub async fn down(config: &StrataConfig, json: bool) -> Result<()> {
    let runner = open_runner(config).await?;
    let report = runner.down().await?;

    if json {
        return print_json(&report);
    }
    println!(
        "Rolled back {} in {}ms",
        report.rolled_back, report.execution_time_ms
    );
    Ok(())
}

/// Run the rollback command.
pub async fn rollback(config: &StrataConfig, version: u32, json: bool) -> Result<()> {
    let runner = open_runner(config).await?;
    let report = runner.rollback_to(version).await?;

    if json {
        return print_json(&report);
    }
    if report.rolled_back.is_empty() {
        println!("Nothing to roll back.");
    }
    for name in &report.rolled_back {
        println!("Rolled back {}", name);
    }
    Ok(())
}
