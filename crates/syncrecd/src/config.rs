//! Daemon configuration.
//!
//! Read from TOML, by default at `$CONFIG_DIR/syncrec/config.toml`. Every key
//! is optional:
//!
//! ```toml
//! socket_path = "/tmp/syncrec.sock"
//! devices_file = "/home/me/.local/share/syncrec/devices.json"
//! lead_time_ms = 5000
//! health_interval_secs = 5
//! command_timeout_ms = 3000
//! connect_timeout_ms = 5000
//!
//! [transport]
//! ip = "192.168.1.50"
//! port = 8000
//! ```
//!
//! `SYNCREC_SOCKET` and `SYNCREC_DEVICES` override the two paths.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use syncrec_core::TransportTarget;
use thiserror::Error;
use tracing::debug;

use crate::controller::ControllerSettings;
use crate::orchestrator::RecordingTiming;

/// Default socket path for the daemon.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/syncrec.sock";

/// Environment variable overriding `socket_path`.
pub const SOCKET_ENV: &str = "SYNCREC_SOCKET";

/// Environment variable overriding `devices_file`.
pub const DEVICES_ENV: &str = "SYNCREC_DEVICES";

/// Errors from loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Daemon configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    pub socket_path: PathBuf,
    pub devices_file: PathBuf,
    pub lead_time_ms: u64,
    pub health_interval_secs: u64,
    pub command_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub transport: Option<TransportTarget>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            devices_file: default_devices_path(),
            lead_time_ms: 5000,
            health_interval_secs: 5,
            command_timeout_ms: 3000,
            connect_timeout_ms: 5000,
            transport: None,
        }
    }
}

impl DaemonConfig {
    /// Loads configuration.
    ///
    /// With `path`, the file must exist. Without it, the default location is
    /// tried and a missing file means defaults. Environment overrides are
    /// applied last.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => {
                    debug!("No config file, using defaults");
                    Self::default()
                }
            },
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parses a config file without applying environment overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parses TOML text.
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    fn apply_env(&mut self) {
        if let Some(socket) = non_empty_env(SOCKET_ENV) {
            self.socket_path = PathBuf::from(socket);
        }
        if let Some(devices) = non_empty_env(DEVICES_ENV) {
            self.devices_file = PathBuf::from(devices);
        }
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.health_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "health_interval_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.command_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "command_timeout_ms",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "connect_timeout_ms",
                reason: "must be at least 1".to_string(),
            });
        }
        if let Some(transport) = &self.transport {
            TransportTarget::new(transport.ip.clone(), transport.port).map_err(|e| {
                ConfigError::Invalid {
                    field: "transport",
                    reason: e.to_string(),
                }
            })?;
        }
        Ok(())
    }

    pub fn lead_time(&self) -> Duration {
        Duration::from_millis(self.lead_time_ms)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Settings for [`crate::controller::Controller::spawn`].
    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            timing: RecordingTiming {
                lead_time: self.lead_time(),
                command_timeout: self.command_timeout(),
            },
            connect_timeout: self.connect_timeout(),
            health_interval: self.health_interval(),
            transport: self.transport.clone(),
        }
    }
}

/// `$CONFIG_DIR/syncrec/config.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("syncrec").join("config.toml"))
}

/// `$DATA_DIR/syncrec/devices.json`, falling back to `/tmp`.
pub fn default_devices_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("syncrec")
        .join("devices.json")
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
