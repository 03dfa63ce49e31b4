//! Configuration loading for selfsync.
//!
//! Configuration is loaded from a TOML file. Every key has a default, so an
//! empty file (or no file at all) yields a working setup.

use selfsync_core::{
    LivenessPolicy, DEFAULT_CAPACITY, DEFAULT_CONNECTION_TIMEOUT_SECS, DEFAULT_PING_INTERVAL_SECS,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration for a self-connection manager.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfSyncConfig {
    /// Connection table configuration.
    #[serde(default)]
    pub table: TableConfig,
    /// Keepalive and timeout configuration.
    #[serde(default)]
    pub liveness: LivenessConfig,
}

/// Connection table configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConfig {
    /// Maximum simultaneous self-connections (default: 16).
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

/// Keepalive and timeout configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessConfig {
    /// Keepalive cadence in seconds (default: 7).
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
    /// Silence after which a connection is closed, in seconds (default: 21).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// How often the background task ticks, in milliseconds (default: 1000).
    /// Must be finer than the ping interval for keepalives to go out on time.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// Run the background liveness task (default: true).
    #[serde(default = "default_liveness_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_ping_interval() -> u64 {
    DEFAULT_PING_INTERVAL_SECS
}

fn default_timeout() -> u64 {
    DEFAULT_CONNECTION_TIMEOUT_SECS
}

fn default_tick_interval() -> u64 {
    1000 // 1 second
}

fn default_liveness_enabled() -> bool {
    true
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval(),
            timeout_secs: default_timeout(),
            tick_interval_ms: default_tick_interval(),
            enabled: default_liveness_enabled(),
        }
    }
}

impl LivenessConfig {
    /// Background tick cadence.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl SelfSyncConfig {
    /// Load configuration from a TOML file.
    ///
    /// The loaded values are not validated; [`SelfSyncConfig::validate`] does
    /// that, and manager creation runs it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Check that the values describe a usable manager.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.table.capacity == 0 {
            return Err(ConfigError::invalid("table.capacity", "must be at least 1"));
        }
        if self.liveness.ping_interval_secs == 0 {
            return Err(ConfigError::invalid(
                "liveness.ping_interval_secs",
                "must be at least 1",
            ));
        }
        if self.liveness.timeout_secs <= self.liveness.ping_interval_secs {
            return Err(ConfigError::invalid(
                "liveness.timeout_secs",
                format!(
                    "must exceed ping_interval_secs ({})",
                    self.liveness.ping_interval_secs
                ),
            ));
        }
        if self.liveness.tick_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "liveness.tick_interval_ms",
                "must be at least 1",
            ));
        }
        Ok(())
    }

    /// Liveness thresholds for the core planner.
    pub fn policy(&self) -> LivenessPolicy {
        LivenessPolicy::new(self.liveness.ping_interval_secs, self.liveness.timeout_secs)
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
    /// A value is out of range.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Dotted key of the offending value.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = SelfSyncConfig::default();
        assert_eq!(config.table.capacity, 16);
        assert_eq!(config.liveness.ping_interval_secs, 7);
        assert_eq!(config.liveness.timeout_secs, 21);
        assert_eq!(config.liveness.tick_interval(), Duration::from_secs(1));
        assert!(config.liveness.enabled);
        config.validate().unwrap();
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[table]
capacity = 4

[liveness]
ping_interval_secs = 5
timeout_secs = 15
tick_interval_ms = 250
enabled = false
"#;

        let config: SelfSyncConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.table.capacity, 4);
        assert_eq!(config.liveness.ping_interval_secs, 5);
        assert_eq!(config.liveness.timeout_secs, 15);
        assert_eq!(config.liveness.tick_interval_ms, 250);
        assert!(!config.liveness.enabled);
        assert_eq!(config.policy(), LivenessPolicy::new(5, 15));
    }

    #[test]
    fn config_missing_sections_use_defaults() {
        let config: SelfSyncConfig = toml::from_str("").unwrap();
        assert_eq!(config, SelfSyncConfig::default());

        let config: SelfSyncConfig = toml::from_str("[liveness]\ntimeout_secs = 30\n").unwrap();
        assert_eq!(config.table.capacity, 16);
        assert_eq!(config.liveness.ping_interval_secs, 7);
        assert_eq!(config.liveness.timeout_secs, 30);
    }

    #[test]
    fn zero_capacity_rejected() {
        let mut config = SelfSyncConfig::default();
        config.table.capacity = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "table.capacity",
                ..
            })
        ));
    }

    #[test]
    fn timeout_must_exceed_ping_interval() {
        let mut config = SelfSyncConfig::default();
        config.liveness.timeout_secs = 7;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "liveness.timeout_secs",
                ..
            })
        ));

        config.liveness.timeout_secs = 8;
        config.validate().unwrap();
    }

    #[test]
    fn zero_intervals_rejected() {
        let mut config = SelfSyncConfig::default();
        config.liveness.ping_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = SelfSyncConfig::default();
        config.liveness.tick_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn from_file_reads_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[table]\ncapacity = 2").unwrap();

        let config = SelfSyncConfig::from_file(file.path()).unwrap();
        assert_eq!(config.table.capacity, 2);
    }

    #[test]
    fn from_file_reports_missing_and_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            SelfSyncConfig::from_file(&missing),
            Err(ConfigError::ReadError { .. })
        ));

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "[table]\ncapacity = \"lots\"\n").unwrap();
        let err = SelfSyncConfig::from_file(&bad).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = SelfSyncConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        assert!(text.contains("[table]"));
        assert!(text.contains("capacity = 16"));
        let back: SelfSyncConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, config);
    }
}
