//! Engine configuration.
//!
//! Configuration is loaded from a TOML file. Every field has a default, so an
//! empty file (or no file at all) yields the stock engine.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use taskflow_sync_core::{HeartbeatPolicy, MergePolicy, ReconnectPolicy};
use taskflow_sync_types::{DEFAULT_PEER_PREFIX, SNAPSHOT_VERSION};

use crate::transport::{TransportMode, TransportProfile};

/// Root configuration for the sync engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Prefix for generated peer ids (default: `taskflow`).
    #[serde(default = "default_peer_id_prefix")]
    pub peer_id_prefix: String,
    /// Snapshot version stamped on locally built snapshots.
    #[serde(default = "default_version")]
    pub version: String,
    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    /// Reconnect backoff configuration.
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    /// Status display configuration.
    #[serde(default)]
    pub status: StatusConfig,
    /// Mode switch configuration.
    #[serde(default)]
    pub mode_switch: ModeSwitchConfig,
    /// Transport profiles.
    #[serde(default)]
    pub transport: TransportConfig,
    /// Conflict resolution.
    #[serde(default)]
    pub merge: MergeConfig,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Ping period in seconds (default: 30).
    #[serde(default = "default_heartbeat_interval")]
    pub interval_secs: u64,
    /// Silent intervals before a connection is closed (default: 3, 0 = never).
    #[serde(default = "default_missed_pings")]
    pub missed_pings_before_close: u32,
}

/// Reconnect backoff configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Automatic attempts before giving up (default: 5).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay in milliseconds, doubled per attempt (default: 1000).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Delay cap in milliseconds (default: 30000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Upper bound of random extra delay in milliseconds (default: 0).
    #[serde(default)]
    pub jitter_ms: u64,
}

/// Status display configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusConfig {
    /// How long `syncing` is shown before reverting to `connected` (default: 1000).
    #[serde(default = "default_syncing_display_ms")]
    pub syncing_display_ms: u64,
}

/// Mode switch configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeSwitchConfig {
    /// Switch to the local-only profile on connectivity loss (default: true).
    /// When false, connectivity loss goes through reconnect backoff.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Pause between teardown and re-attach in milliseconds (default: 1000).
    #[serde(default = "default_mode_switch_delay_ms")]
    pub delay_ms: u64,
}

/// Transport profiles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// STUN servers for the standard profile.
    #[serde(default = "default_stun_servers")]
    pub stun_servers: Vec<String>,
    /// STUN servers for the local-only profile.
    #[serde(default = "default_local_stun_servers")]
    pub local_stun_servers: Vec<String>,
    /// Signaling endpoint for the local-only profile.
    #[serde(default = "default_local_signaling")]
    pub local_signaling: String,
}

/// Conflict resolution configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Task tie-break rule (default: `created_at`).
    #[serde(default)]
    pub policy: MergePolicy,
}

// Default value functions
fn default_peer_id_prefix() -> String {
    DEFAULT_PEER_PREFIX.to_string()
}

fn default_version() -> String {
    SNAPSHOT_VERSION.to_string()
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_missed_pings() -> u32 {
    3
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_syncing_display_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_mode_switch_delay_ms() -> u64 {
    1000
}

fn default_stun_servers() -> Vec<String> {
    [
        "stun:stun.l.google.com:19302",
        "stun:stun1.l.google.com:19302",
        "stun:stun2.l.google.com:19302",
        "stun:stun3.l.google.com:19302",
        "stun:stun4.l.google.com:19302",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_local_stun_servers() -> Vec<String> {
    default_stun_servers().into_iter().take(2).collect()
}

fn default_local_signaling() -> String {
    "localhost:9000/myapp".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            peer_id_prefix: default_peer_id_prefix(),
            version: default_version(),
            heartbeat: HeartbeatConfig::default(),
            reconnect: ReconnectConfig::default(),
            status: StatusConfig::default(),
            mode_switch: ModeSwitchConfig::default(),
            transport: TransportConfig::default(),
            merge: MergeConfig::default(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_heartbeat_interval(),
            missed_pings_before_close: default_missed_pings(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: 0,
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            syncing_display_ms: default_syncing_display_ms(),
        }
    }
}

impl Default for ModeSwitchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delay_ms: default_mode_switch_delay_ms(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            stun_servers: default_stun_servers(),
            local_stun_servers: default_local_stun_servers(),
            local_signaling: default_local_signaling(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        Self::from_toml(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Heartbeat policy derived from `[heartbeat]`.
    pub fn heartbeat_policy(&self) -> HeartbeatPolicy {
        HeartbeatPolicy {
            interval: Duration::from_secs(self.heartbeat.interval_secs),
            missed_pings_before_close: self.heartbeat.missed_pings_before_close,
        }
    }

    /// Reconnect policy derived from `[reconnect]`.
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.reconnect.max_attempts,
            base_delay: Duration::from_millis(self.reconnect.base_delay_ms),
            max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
            max_jitter: Duration::from_millis(self.reconnect.jitter_ms),
        }
    }

    /// How long `syncing` stays visible.
    pub fn syncing_display(&self) -> Duration {
        Duration::from_millis(self.status.syncing_display_ms)
    }

    /// Pause before re-attaching in local-only mode.
    pub fn mode_switch_delay(&self) -> Duration {
        Duration::from_millis(self.mode_switch.delay_ms)
    }
}

impl TransportConfig {
    /// Build the transport profile for `mode`.
    pub fn profile(&self, mode: TransportMode) -> TransportProfile {
        match mode {
            TransportMode::Standard => TransportProfile {
                mode,
                stun_servers: self.stun_servers.clone(),
                signaling: None,
            },
            TransportMode::LocalOnly => TransportProfile {
                mode,
                stun_servers: self.local_stun_servers.clone(),
                signaling: Some(self.local_signaling.clone()),
            },
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_matches_stock_engine() {
        let config = EngineConfig::default();
        assert_eq!(config.peer_id_prefix, "taskflow");
        assert_eq!(config.version, "1.0.0");
        assert_eq!(config.heartbeat.interval_secs, 30);
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.status.syncing_display_ms, 1000);
        assert!(config.mode_switch.enabled);
        assert_eq!(config.transport.stun_servers.len(), 5);
        assert_eq!(config.transport.local_stun_servers.len(), 2);
        assert_eq!(config.merge.policy, MergePolicy::CreatedAt);
    }

    #[test]
    fn empty_toml_uses_defaults() {
        let config = EngineConfig::from_toml("").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
peer_id_prefix = "desk"

[heartbeat]
interval_secs = 10
missed_pings_before_close = 0

[reconnect]
max_attempts = 2
jitter_ms = 250

[mode_switch]
enabled = false

[merge]
policy = "last_modified"
"#;

        let config = EngineConfig::from_toml(toml).unwrap();
        assert_eq!(config.peer_id_prefix, "desk");
        assert_eq!(config.heartbeat.interval_secs, 10);
        assert_eq!(config.heartbeat_policy().silence_limit(), None);
        assert_eq!(config.reconnect.max_attempts, 2);
        assert_eq!(config.reconnect.base_delay_ms, 1000);
        assert_eq!(
            config.reconnect_policy().max_jitter,
            Duration::from_millis(250)
        );
        assert!(!config.mode_switch.enabled);
        assert_eq!(config.mode_switch.delay_ms, 1000);
        assert_eq!(config.merge.policy, MergePolicy::LastModified);
    }

    #[test]
    fn unknown_policy_is_rejected() {
        let result = EngineConfig::from_toml("[merge]\npolicy = \"newest\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn toml_output_parses_back() {
        let config = EngineConfig::default();
        let text = config.to_toml().unwrap();
        assert!(text.contains("[heartbeat]"));
        assert_eq!(EngineConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn profiles_follow_transport_section() {
        let transport = TransportConfig::default();

        let standard = transport.profile(TransportMode::Standard);
        assert_eq!(standard.stun_servers.len(), 5);
        assert_eq!(standard.signaling, None);

        let local = transport.profile(TransportMode::LocalOnly);
        assert_eq!(
            local.stun_servers,
            vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ]
        );
        assert_eq!(local.signaling.as_deref(), Some("localhost:9000/myapp"));
    }

    #[test]
    fn from_file_reads_and_reports_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[status]\nsyncing_display_ms = 250").unwrap();
        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.syncing_display(), Duration::from_millis(250));

        let missing = EngineConfig::from_file(Path::new("/nonexistent/taskflow.toml"));
        assert!(matches!(missing, Err(ConfigError::ReadError { .. })));

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        writeln!(bad, "[heartbeat]\ninterval_secs = \"soon\"").unwrap();
        let parsed = EngineConfig::from_file(bad.path());
        assert!(matches!(parsed, Err(ConfigError::ParseError { .. })));
    }
}
