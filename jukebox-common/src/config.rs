//! Configuration loading and config file resolution
//!
//! Bootstrap configuration is a single TOML file. Every section and field has
//! a built-in default, so a missing file still yields a runnable setup.
//!
//! Config file resolution priority:
//! 1. Explicit path (command-line argument or environment variable)
//! 2. User config directory (`~/.config/jukebox/config.toml`)
//! 3. System config (`/etc/jukebox/config.toml`)
//! 4. Built-in defaults

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Complete jukebox configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct JukeboxConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub devices: DevicesConfig,
    pub broadcast: BroadcastConfig,
    pub encoding: EncodingConfig,
    pub library: LibraryConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Which device backend drives the playback devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Reachability-only probing of configured device addresses
    Probe,
    /// In-process simulated devices
    #[default]
    Memory,
}

/// One configured playback device
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct KnownDevice {
    pub name: String,
    /// `host:port` of the device control endpoint
    #[serde(default)]
    pub address: Option<String>,
}

/// Playback device configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DevicesConfig {
    pub backend: BackendKind,
    /// Device connected at startup
    pub default: Option<String>,
    pub discovery_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub known: Vec<KnownDevice>,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            default: None,
            discovery_timeout_secs: 5,
            connect_timeout_secs: 10,
            known: Vec::new(),
        }
    }
}

impl DevicesConfig {
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Live channel configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BroadcastConfig {
    pub heartbeat_interval_secs: u64,
    /// Subscribers missing this many consecutive heartbeats are pruned
    pub max_missed_heartbeats: u32,
    /// Per-subscriber outbound queue length
    pub subscriber_buffer: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 15,
            max_missed_heartbeats: 3,
            subscriber_buffer: 64,
        }
    }
}

impl BroadcastConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

/// Tag-encoding configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EncodingConfig {
    /// Status poll interval advertised to clients
    pub poll_interval_ms: u64,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 3000,
        }
    }
}

/// Album library configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// JSON album catalog; empty library when unset
    pub path: Option<PathBuf>,
}

impl JukeboxConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: JukeboxConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Resolve the config file and load it, falling back to defaults
    ///
    /// An explicitly requested file must exist and be valid. Without an
    /// explicit path, a missing file is not an error.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            info!("Loading configuration from {}", path.display());
            return Self::load(path);
        }

        match default_config_path() {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                Self::load(&path)
            }
            None => {
                warn!("No configuration file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for device in &self.devices.known {
            if device.name.trim().is_empty() {
                return Err(Error::Config("Device name must not be empty".to_string()));
            }
            if !names.insert(device.name.as_str()) {
                return Err(Error::Config(format!(
                    "Duplicate device name: {}",
                    device.name
                )));
            }
        }

        if let Some(default) = &self.devices.default {
            if !names.contains(default.as_str()) {
                return Err(Error::Config(format!(
                    "Default device '{}' is not a known device",
                    default
                )));
            }
        }

        if self.devices.discovery_timeout_secs == 0 || self.devices.connect_timeout_secs == 0 {
            return Err(Error::Config("Device timeouts must be positive".to_string()));
        }
        if self.broadcast.heartbeat_interval_secs == 0 {
            return Err(Error::Config("Heartbeat interval must be positive".to_string()));
        }
        if self.broadcast.max_missed_heartbeats == 0 {
            return Err(Error::Config("max_missed_heartbeats must be positive".to_string()));
        }
        if self.broadcast.subscriber_buffer == 0 {
            return Err(Error::Config("subscriber_buffer must be positive".to_string()));
        }
        if self.encoding.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be positive".to_string()));
        }

        Ok(())
    }
}

/// First existing config file among the platform locations
fn default_config_path() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("jukebox").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    let system_config = PathBuf::from("/etc/jukebox/config.toml");
    if system_config.exists() {
        return Some(system_config);
    }

    None
}
