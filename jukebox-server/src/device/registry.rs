//! Known playback devices
//!
//! The set of devices the jukebox may connect to comes from configuration,
//! consumed through the [`DeviceRegistry`] capability.

use jukebox_common::config::{DevicesConfig, KnownDevice};

/// Read-only view of the configured devices
pub trait DeviceRegistry: Send + Sync {
    fn known_devices(&self) -> &[KnownDevice];

    /// Device connected at startup
    fn default_device(&self) -> Option<&str>;

    fn lookup(&self, name: &str) -> Option<&KnownDevice> {
        self.known_devices().iter().find(|d| d.name == name)
    }

    fn is_known(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }
}

/// Immutable registry built once from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticDeviceRegistry {
    devices: Vec<KnownDevice>,
    default: Option<String>,
}

impl StaticDeviceRegistry {
    pub fn new(devices: Vec<KnownDevice>, default: Option<String>) -> Self {
        Self { devices, default }
    }

    /// Registry of named devices without addresses
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let devices = names
            .into_iter()
            .map(|name| KnownDevice {
                name: name.into(),
                address: None,
            })
            .collect();
        Self::new(devices, None)
    }
}

impl From<&DevicesConfig> for StaticDeviceRegistry {
    fn from(config: &DevicesConfig) -> Self {
        Self::new(config.known.clone(), config.default.clone())
    }
}

impl DeviceRegistry for StaticDeviceRegistry {
    fn known_devices(&self) -> &[KnownDevice] {
        &self.devices
    }

    fn default_device(&self) -> Option<&str> {
        self.default.as_deref()
    }
}
