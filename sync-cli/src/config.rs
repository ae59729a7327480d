//! Configuration and snapshot file handling for the CLI.
//!
//! The engine configuration comes from `--config`, else from
//! `config.toml` in the platform config directory if present, else defaults.
//!
//! Snapshot files hold either a full [`Snapshot`] or an [`ExportData`]
//! (a snapshot without its timestamp, as the app's export writes it).

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use taskflow_sync_client::EngineConfig;
use taskflow_sync_types::{now_millis, ExportData, Snapshot};

const CONFIG_FILE: &str = "config.toml";

/// Default config file location for this platform.
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("io", "taskflow", "taskflow-sync")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}

/// Load the engine configuration.
///
/// An explicit path must exist. The default path is only used when present.
pub async fn load_engine_config(explicit: Option<&Path>) -> Result<EngineConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match default_config_path() {
            Some(path) if tokio::fs::try_exists(&path).await.unwrap_or(false) => path,
            _ => {
                tracing::debug!("no config file, using defaults");
                return Ok(EngineConfig::default());
            }
        },
    };

    tracing::debug!(path = %path.display(), "loading config");
    Ok(EngineConfig::from_file(&path)?)
}

/// Read a snapshot file.
///
/// Export files carry no timestamp and are stamped with the current time.
pub async fn read_snapshot(path: &Path) -> Result<Snapshot> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    match Snapshot::from_json(&text) {
        Ok(snapshot) => Ok(snapshot),
        Err(snapshot_err) => {
            let export: ExportData = serde_json::from_str(&text)
                .map_err(|_| snapshot_err)
                .with_context(|| {
                    format!("{} is not a snapshot or export file", path.display())
                })?;
            Ok(Snapshot::from_export(export, now_millis()))
        }
    }
}

/// Write a snapshot as pretty JSON.
pub async fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<()> {
    let json = snapshot.to_json_pretty()?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}
