//! Create a migration file.

use anyhow::Result;

use super::{open_runner, print_json};
use crate::config::StrataConfig;

/// Run the create command.
pub async fn run(config: &StrataConfig, name: &str, json: bool) -> Result<()> {
    let runner = open_runner(config).await?;
    let created = runner.create(name).await?;

    if json {
        return print_json(&created);
    }
    println!("Created {}", created.path.display());
    Ok(())
}
