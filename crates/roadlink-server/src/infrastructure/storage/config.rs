//! TOML configuration file for the server.
//!
//! Every field is optional; anything absent falls back to its default, and a
//! missing file is the same as an empty one:
//!
//! ```toml
//! [server]
//! bind_address = "0.0.0.0"
//! port = 8765
//! outbox_capacity = 64
//! log_level = "info"
//!
//! [road]
//! lane_height = 50.0
//! placement = "random"        # or "round_robin"
//!
//! [emergency]
//! grace_ms = 2000
//! poll_interval_ms = 1000
//! ceiling_ms = 10000
//! response_threshold = 0.8
//! ack_policy = "assume_all"   # or "tracked"
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::config::{
    AckPolicy, MonitorTimings, PlacementKind, ServerConfig, DEFAULT_OUTBOX_CAPACITY, DEFAULT_PORT,
};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid bind address '{0}'")]
    InvalidAddress(String),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// On-disk configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub road: RoadSection,
    #[serde(default)]
    pub emergency: EmergencySection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoadSection {
    #[serde(default = "default_lane_height")]
    pub lane_height: f64,
    #[serde(default)]
    pub placement: PlacementKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmergencySection {
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_ceiling_ms")]
    pub ceiling_ms: u64,
    #[serde(default = "default_response_threshold")]
    pub response_threshold: f64,
    #[serde(default)]
    pub ack_policy: AckPolicy,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_outbox_capacity() -> usize {
    DEFAULT_OUTBOX_CAPACITY
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_lane_height() -> f64 {
    roadlink_core::domain::DEFAULT_LANE_HEIGHT
}
fn default_grace_ms() -> u64 {
    2_000
}
fn default_poll_interval_ms() -> u64 {
    1_000
}
fn default_ceiling_ms() -> u64 {
    10_000
}
fn default_response_threshold() -> f64 {
    roadlink_core::emergency::DEFAULT_RESPONSE_THRESHOLD
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            outbox_capacity: default_outbox_capacity(),
            log_level: default_log_level(),
        }
    }
}

impl Default for RoadSection {
    fn default() -> Self {
        Self {
            lane_height: default_lane_height(),
            placement: PlacementKind::default(),
        }
    }
}

impl Default for EmergencySection {
    fn default() -> Self {
        Self {
            grace_ms: default_grace_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            ceiling_ms: default_ceiling_ms(),
            response_threshold: default_response_threshold(),
            ack_policy: AckPolicy::default(),
        }
    }
}

impl FileConfig {
    /// Validates the file values and resolves them into a [`ServerConfig`].
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidAddress`] for an unparsable bind address and
    /// [`ConfigError::InvalidValue`] for out-of-range numbers.
    pub fn into_server_config(self) -> Result<ServerConfig, ConfigError> {
        let ip: IpAddr = self
            .server
            .bind_address
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(self.server.bind_address.clone()))?;
        if self.server.outbox_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.outbox_capacity",
                reason: "must be at least 1".into(),
            });
        }
        if !(self.road.lane_height.is_finite() && self.road.lane_height > 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "road.lane_height",
                reason: "must be a positive number".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.emergency.response_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "emergency.response_threshold",
                reason: "must be between 0 and 1".into(),
            });
        }
        if self.emergency.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "emergency.poll_interval_ms",
                reason: "must be at least 1".into(),
            });
        }

        Ok(ServerConfig {
            bind_addr: SocketAddr::new(ip, self.server.port),
            outbox_capacity: self.server.outbox_capacity,
            lane_height: self.road.lane_height,
            placement: self.road.placement,
            ack_policy: self.emergency.ack_policy,
            monitor: MonitorTimings {
                grace: Duration::from_millis(self.emergency.grace_ms),
                poll_interval: Duration::from_millis(self.emergency.poll_interval_ms),
                ceiling: Duration::from_millis(self.emergency.ceiling_ms),
                response_threshold: self.emergency.response_threshold,
            },
        })
    }
}

// ── Load / save ───────────────────────────────────────────────────────────────

/// Loads the config at `path`, returning defaults if the file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<FileConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes `config` to `path`, creating parent directories as needed.
pub fn save_config(path: &Path, config: &FileConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("roadlink_test_{}", uuid::Uuid::new_v4()))
            .join("roadlink.toml")
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let cfg: FileConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, FileConfig::default());
        assert_eq!(cfg.server.port, 8765);
        assert_eq!(cfg.emergency.ceiling_ms, 10_000);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        // Arrange
        let text = r#"
[emergency]
ack_policy = "tracked"
grace_ms = 500
"#;

        // Act
        let cfg: FileConfig = toml::from_str(text).unwrap();

        // Assert
        assert_eq!(cfg.emergency.ack_policy, AckPolicy::Tracked);
        assert_eq!(cfg.emergency.grace_ms, 500);
        assert_eq!(cfg.emergency.poll_interval_ms, 1_000);
        assert_eq!(cfg.road.placement, PlacementKind::Random);
    }

    #[test]
    fn test_unknown_placement_is_a_parse_error() {
        let result: Result<FileConfig, _> = toml::from_str("[road]\nplacement = \"diagonal\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_into_server_config_converts_units() {
        let mut cfg = FileConfig::default();
        cfg.server.bind_address = "127.0.0.1".into();
        cfg.server.port = 9001;
        cfg.emergency.grace_ms = 250;

        let server = cfg.into_server_config().unwrap();

        assert_eq!(server.bind_addr.to_string(), "127.0.0.1:9001");
        assert_eq!(server.monitor.grace, Duration::from_millis(250));
    }

    #[test]
    fn test_into_server_config_rejects_bad_address() {
        let mut cfg = FileConfig::default();
        cfg.server.bind_address = "not.an.ip".into();
        assert!(matches!(cfg.into_server_config(), Err(ConfigError::InvalidAddress(_))));
    }

    #[test]
    fn test_into_server_config_rejects_threshold_above_one() {
        let mut cfg = FileConfig::default();
        cfg.emergency.response_threshold = 1.5;
        assert!(matches!(cfg.into_server_config(), Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_load_config_returns_default_when_file_absent() {
        let cfg = load_config(Path::new("/nonexistent/path/that/cannot/exist/roadlink.toml")).unwrap();
        assert_eq!(cfg, FileConfig::default());
    }

    #[test]
    fn test_save_and_load_config_via_temp_dir() {
        // Arrange
        let path = temp_path();
        let mut cfg = FileConfig::default();
        cfg.server.port = 12345;
        cfg.road.placement = PlacementKind::RoundRobin;

        // Act
        save_config(&path, &cfg).unwrap();
        let loaded = load_config(&path).unwrap();

        // Assert
        assert_eq!(loaded, cfg);

        // Cleanup
        if let Some(dir) = path.parent() {
            std::fs::remove_dir_all(dir).ok();
        }
    }

    #[test]
    fn test_load_config_reports_malformed_toml() {
        let path = temp_path();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).unwrap();
        }
        std::fs::write(&path, "[[[ not valid toml").unwrap();

        assert!(matches!(load_config(&path), Err(ConfigError::Parse(_))));

        if let Some(dir) = path.parent() {
            std::fs::remove_dir_all(dir).ok();
        }
    }
}
