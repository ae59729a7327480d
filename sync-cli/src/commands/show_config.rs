//! Show the effective engine configuration.

use anyhow::{Context, Result};
use taskflow_sync_client::EngineConfig;

/// Run the config command.
pub fn run(config: &EngineConfig) -> Result<String> {
    let text = config
        .to_toml()
        .context("Failed to render configuration")?;
    println!("{text}");
    Ok(text)
}
