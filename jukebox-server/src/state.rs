//! Shared application state
//!
//! Builds the managers around one EventBus and wires their handlers:
//!
//! | Event                  | Handlers                          |
//! |------------------------|-----------------------------------|
//! | `DeviceChanged`        | PlaybackManager, StatusBroadcaster |
//! | `TrackFinished`        | PlaybackManager                   |
//! | `PlaybackStateChanged` | StatusBroadcaster                 |
//! | `PlaybackError`        | StatusBroadcaster                 |
//! | `Tag*`                 | EncodingSessionManager            |
//! | `EncodingFinished`     | StatusBroadcaster                 |
//!
//! The bus holds weak references only, so dropping the state releases
//! every manager.

use crate::broadcast::StatusBroadcaster;
use crate::connection::ConnectionManager;
use crate::device::{
    DeviceBackend, DeviceRegistry, MemoryBackend, NetworkProbeBackend, StaticDeviceRegistry,
};
use crate::encoding::EncodingSessionManager;
use crate::error::Result;
use crate::library::{AlbumLibrary, StaticLibrary};
use crate::playback::PlaybackManager;
use jukebox_common::config::{BackendKind, JukeboxConfig};
use jukebox_common::events::{EventBus, EventKind};
use std::sync::Arc;
use tracing::{info, warn};

/// State shared by the HTTP handlers and background tasks
pub struct SharedState {
    pub config: JukeboxConfig,
    pub bus: Arc<EventBus>,
    pub connections: Arc<ConnectionManager>,
    pub playback: Arc<PlaybackManager>,
    pub broadcaster: Arc<StatusBroadcaster>,
    pub encoding: Arc<EncodingSessionManager>,
    pub library: Arc<dyn AlbumLibrary>,
}

impl SharedState {
    /// Build the state with the backend and library named in `config`
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_config(config: JukeboxConfig) -> Result<Arc<Self>> {
        let registry: Arc<dyn DeviceRegistry> =
            Arc::new(StaticDeviceRegistry::from(&config.devices));

        let backend: Arc<dyn DeviceBackend> = match config.devices.backend {
            BackendKind::Probe => {
                warn!("Probe backend only tracks reachability; playback commands will fail");
                Arc::new(NetworkProbeBackend::new(registry.clone()))
            }
            BackendKind::Memory => Arc::new(MemoryBackend::from_registry(registry.as_ref())),
        };
        info!("Device backend: {:?}", config.devices.backend);

        let library: Arc<dyn AlbumLibrary> = match &config.library.path {
            Some(path) => Arc::new(StaticLibrary::from_json_file(path)?),
            None => {
                warn!("No album library configured");
                Arc::new(StaticLibrary::empty())
            }
        };

        Ok(Self::new(config, registry, backend, library))
    }

    /// Build the state around explicit collaborators
    pub fn new(
        config: JukeboxConfig,
        registry: Arc<dyn DeviceRegistry>,
        backend: Arc<dyn DeviceBackend>,
        library: Arc<dyn AlbumLibrary>,
    ) -> Arc<Self> {
        let bus = Arc::new(EventBus::new());
        let connections = Arc::new(ConnectionManager::new(backend, registry, bus.clone()));
        let playback = PlaybackManager::new(connections.clone(), bus.clone());
        let broadcaster = Arc::new(StatusBroadcaster::from_config(&config.broadcast));
        let encoding = Arc::new(EncodingSessionManager::new(
            library.clone(),
            bus.clone(),
            config.encoding.poll_interval_ms,
        ));

        bus.subscribe_weak(
            &playback,
            &[EventKind::DeviceChanged, EventKind::TrackFinished],
        );
        bus.subscribe_weak(
            &broadcaster,
            &[
                EventKind::PlaybackStateChanged,
                EventKind::PlaybackError,
                EventKind::DeviceChanged,
                EventKind::EncodingFinished,
            ],
        );
        bus.subscribe_weak(
            &encoding,
            &[
                EventKind::TagDetected,
                EventKind::TagWritten,
                EventKind::TagWriteFailed,
            ],
        );

        Arc::new(Self {
            config,
            bus,
            connections,
            playback,
            broadcaster,
            encoding,
            library,
        })
    }

    /// Connect to the configured default device, if any
    ///
    /// Failure is logged; the jukebox keeps running without a device.
    pub async fn connect_default_device(&self) {
        let Some(name) = self.connections.registry().default_device().map(str::to_string) else {
            info!("No default device configured");
            return;
        };

        let timeout = self.config.devices.connect_timeout();
        match self.connections.switch_device(&name, timeout).await {
            Ok(_) => info!("Connected to default device '{}'", name),
            Err(e) => warn!("Default device '{}' unavailable: {}", name, e),
        }
    }

    /// Release device resources
    pub fn shutdown(&self) {
        self.connections.cleanup();
    }
}
