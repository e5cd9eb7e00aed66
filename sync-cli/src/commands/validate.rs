//! Check a migration file.

use anyhow::{bail, Result};
use sync_migrate::ValidateOptions;

use super::{open_runner, print_json};
use crate::config::StrataConfig;

/// Run the validate command.
pub async fn run(config: &StrataConfig, name: &str, schema_check: bool, json: bool) -> Result<()> {
    let runner = open_runner(config).await?;
    let report = runner
        .validate(name, ValidateOptions { schema_check })
        .await?;

    if json {
        print_json(&report)?;
    } else {
        for error in &report.errors {
            println!("error:   {}", error);
        }
        for warning in &report.warnings {
            println!("warning: {}", warning);
        }
        if report.valid {
            println!("{} is valid", name);
        }
    }

    if !report.valid {
        bail!("{} is not valid", name);
    }
    Ok(())
}
