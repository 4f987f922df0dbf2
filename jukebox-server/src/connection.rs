//! Playback device connection lifecycle
//!
//! [`ConnectionManager`] owns device discovery and the single active device
//! connection. It is the only place the active device changes; every change
//! is announced on the EventBus as `DeviceChanged`.
//!
//! Two kinds of resolver are involved:
//! - discovery resolvers, opened per [`list_devices`](ConnectionManager::list_devices)
//!   call and closed before it returns, whatever the outcome
//! - one persistent resolver, opened on first connect and kept until
//!   [`cleanup`](ConnectionManager::cleanup); connections keep a reference to
//!   it for reconnection

use crate::device::{
    ConnectionState, DeviceBackend, DeviceConnection, DeviceDescriptor, DeviceError,
    DeviceRegistry, Resolver, ResolverGuard,
};
use crate::error::{Error, Result};
use jukebox_common::events::{EventBus, JukeboxEvent};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Extra time granted to a discovery scan before it is abandoned
const DISCOVERY_GRACE: Duration = Duration::from_millis(500);

/// Result of a successful [`ConnectionManager::switch_device`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchOutcome {
    /// Requested device was already active; nothing changed
    AlreadyActive,
    Switched,
}

struct ActiveDevice {
    descriptor: DeviceDescriptor,
    connection: Arc<dyn DeviceConnection>,
}

/// Owner of discovery and the active device connection
pub struct ConnectionManager {
    backend: Arc<dyn DeviceBackend>,
    registry: Arc<dyn DeviceRegistry>,
    bus: Arc<EventBus>,

    /// Long-lived resolver shared by every connection
    persistent: Mutex<Option<Arc<dyn Resolver>>>,

    /// Swapped as a whole; readers never see a half-built connection
    active: RwLock<Option<ActiveDevice>>,

    state: Mutex<ConnectionState>,

    /// Held for the whole of a connect attempt
    switch_lock: tokio::sync::Mutex<()>,

    shut_down: AtomicBool,
}

impl ConnectionManager {
    pub fn new(
        backend: Arc<dyn DeviceBackend>,
        registry: Arc<dyn DeviceRegistry>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            backend,
            registry,
            bus,
            persistent: Mutex::new(None),
            active: RwLock::new(None),
            state: Mutex::new(ConnectionState::Disconnected),
            switch_lock: tokio::sync::Mutex::new(()),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &Arc<dyn DeviceRegistry> {
        &self.registry
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn active_device_name(&self) -> Option<String> {
        self.active
            .read()
            .as_ref()
            .map(|active| active.descriptor.name.clone())
    }

    pub fn active_descriptor(&self) -> Option<DeviceDescriptor> {
        self.active.read().as_ref().map(|active| active.descriptor.clone())
    }

    /// Connection to the active device, if any
    pub fn active_connection(&self) -> Option<Arc<dyn DeviceConnection>> {
        self.active
            .read()
            .as_ref()
            .map(|active| active.connection.clone())
    }

    // ========================================
    // Discovery
    // ========================================

    /// Scan the network for playback devices
    ///
    /// Configured devices that did not answer are listed as unreachable.
    /// Discovery failures are logged and produce an empty list.
    pub async fn list_devices(&self, timeout: Duration) -> Vec<DeviceDescriptor> {
        let resolver = match self.backend.open_resolver() {
            Ok(resolver) => ResolverGuard::new(resolver),
            Err(e) => {
                warn!("Discovery unavailable: {}", e);
                return Vec::new();
            }
        };

        let previous = {
            let mut state = self.state.lock();
            let previous = *state;
            if matches!(previous, ConnectionState::Disconnected | ConnectionState::Failed) {
                *state = ConnectionState::Discovering;
            }
            previous
        };

        let scan = tokio::time::timeout(timeout + DISCOVERY_GRACE, resolver.browse(timeout)).await;
        drop(resolver);

        {
            let mut state = self.state.lock();
            if *state == ConnectionState::Discovering {
                *state = previous;
            }
        }

        let mut found = match scan {
            Ok(Ok(found)) => found,
            Ok(Err(e)) => {
                warn!("Device discovery failed: {}", e);
                return Vec::new();
            }
            Err(_) => {
                warn!("Device discovery did not finish within {:?}", timeout);
                return Vec::new();
            }
        };

        for known in self.registry.known_devices() {
            if !found.iter().any(|d| d.name == known.name) {
                found.push(DeviceDescriptor::new(
                    known.name.clone(),
                    known.address.clone(),
                    false,
                ));
            }
        }
        found.sort_by(|a, b| a.name.cmp(&b.name));
        debug!("Discovered {} devices", found.len());
        found
    }

    // ========================================
    // Connection
    // ========================================

    /// Connect to `name` and make it the active device
    ///
    /// Does not announce the change; see [`switch_device`](Self::switch_device).
    /// Fails with `Busy` while another connect attempt is in flight.
    pub async fn connect(&self, name: &str, timeout: Duration) -> Result<()> {
        let _guard = self
            .switch_lock
            .try_lock()
            .map_err(|_| Error::Busy("a device switch is already in progress".to_string()))?;
        self.connect_locked(name, timeout).await
    }

    /// Make `name` the active device and announce it
    ///
    /// Competing requests are rejected with `Busy` rather than queued. A
    /// failed attempt leaves the previous device active and publishes nothing.
    pub async fn switch_device(&self, name: &str, timeout: Duration) -> Result<SwitchOutcome> {
        let _guard = self
            .switch_lock
            .try_lock()
            .map_err(|_| Error::Busy("a device switch is already in progress".to_string()))?;

        if self.active_device_name().as_deref() == Some(name) {
            info!("Device '{}' already active", name);
            return Ok(SwitchOutcome::AlreadyActive);
        }

        self.connect_locked(name, timeout).await?;
        info!("Switched playback device to '{}'", name);
        self.bus.publish(JukeboxEvent::DeviceChanged {
            device_name: name.to_string(),
        });
        Ok(SwitchOutcome::Switched)
    }

    /// Caller holds `switch_lock`
    async fn connect_locked(&self, name: &str, timeout: Duration) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(Error::InvalidState("connection manager is shut down".to_string()));
        }
        if !self.registry.is_known(name) {
            return Err(Error::NotFound(format!("device '{}'", name)));
        }

        self.set_state(ConnectionState::Connecting);
        info!("Connecting to '{}' (timeout {:?})", name, timeout);

        let attempt = match self.persistent_resolver() {
            Ok(resolver) => {
                match tokio::time::timeout(timeout, self.establish(resolver, name, timeout)).await {
                    Ok(result) => result,
                    Err(_) => Err(DeviceError::Timeout {
                        device: name.to_string(),
                        timeout,
                    }),
                }
            }
            Err(e) => Err(e),
        };

        match attempt {
            Ok((descriptor, connection)) => {
                let previous = self.active.write().replace(ActiveDevice {
                    descriptor,
                    connection,
                });
                if let Some(previous) = previous {
                    previous.connection.disconnect();
                }
                self.set_state(ConnectionState::Connected);
                Ok(())
            }
            Err(e) => {
                warn!("Connection to '{}' failed: {}", name, e);
                let fallback = if self.active.read().is_some() {
                    ConnectionState::Connected
                } else {
                    ConnectionState::Failed
                };
                self.set_state(fallback);
                Err(match e {
                    DeviceError::NotFound(_) => Error::NotFound(format!("device '{}'", name)),
                    other => Error::Connection {
                        device: name.to_string(),
                        reason: other.to_string(),
                    },
                })
            }
        }
    }

    /// Resolve, build and validate a connection without installing it
    async fn establish(
        &self,
        resolver: Arc<dyn Resolver>,
        name: &str,
        timeout: Duration,
    ) -> std::result::Result<(DeviceDescriptor, Arc<dyn DeviceConnection>), DeviceError> {
        let descriptor = resolver.resolve(name, timeout).await?;
        let connection = self.backend.connect(resolver, &descriptor).await?;
        if let Err(e) = connection.validate().await {
            connection.disconnect();
            return Err(e);
        }
        Ok((descriptor, connection))
    }

    fn persistent_resolver(&self) -> std::result::Result<Arc<dyn Resolver>, DeviceError> {
        let mut persistent = self.persistent.lock();
        if let Some(resolver) = persistent.as_ref() {
            return Ok(resolver.clone());
        }
        let resolver = self.backend.open_resolver()?;
        debug!("Opened persistent resolver");
        *persistent = Some(resolver.clone());
        Ok(resolver)
    }

    fn set_state(&self, state: ConnectionState) {
        let mut current = self.state.lock();
        if *current != state {
            debug!("Connection state {:?} -> {:?}", *current, state);
            *current = state;
        }
    }

    /// Release the active connection and the persistent resolver
    ///
    /// Idempotent. The manager accepts no further connections afterwards.
    pub fn cleanup(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(active) = self.active.write().take() {
            info!("Disconnecting from '{}'", active.descriptor.name);
            active.connection.disconnect();
        }
        if let Some(resolver) = self.persistent.lock().take() {
            resolver.close();
        }
        self.set_state(ConnectionState::Disconnected);
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.cleanup();
    }
}
