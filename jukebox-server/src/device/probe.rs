//! Network reachability backend
//!
//! Devices are the ones listed in configuration. Discovery probes each
//! configured `address` with a TCP connect; a device is reachable when its
//! control port accepts the connection within the probe timeout.
//!
//! No casting client is attached: connections can be validated and
//! re-established, but every transport command fails with
//! [`DeviceError::Command`]. Use `backend = "memory"` to drive playback
//! without hardware.

use super::{DeviceBackend, DeviceConnection, DeviceDescriptor, DeviceError, DeviceRegistry, Resolver};
use async_trait::async_trait;
use futures::future::join_all;
use jukebox_common::events::Track;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Per-command reachability check budget
const COMMAND_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Backend probing configured device addresses
pub struct NetworkProbeBackend {
    registry: Arc<dyn DeviceRegistry>,
}

impl NetworkProbeBackend {
    pub fn new(registry: Arc<dyn DeviceRegistry>) -> Self {
        Self { registry }
    }
}

/// TCP-connect to `address` within `timeout`
async fn probe(name: &str, address: &str, timeout: Duration) -> Result<(), DeviceError> {
    match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
        Ok(Ok(_stream)) => Ok(()),
        Ok(Err(e)) => {
            debug!("probe {} ({}) failed: {}", name, address, e);
            Err(DeviceError::Unreachable(name.to_string()))
        }
        Err(_) => Err(DeviceError::Timeout {
            device: name.to_string(),
            timeout,
        }),
    }
}

#[async_trait]
impl DeviceBackend for NetworkProbeBackend {
    fn open_resolver(&self) -> Result<Arc<dyn Resolver>, DeviceError> {
        Ok(Arc::new(ProbeResolver {
            registry: self.registry.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn connect(
        &self,
        resolver: Arc<dyn Resolver>,
        device: &DeviceDescriptor,
    ) -> Result<Arc<dyn DeviceConnection>, DeviceError> {
        if resolver.is_closed() {
            return Err(DeviceError::ResolverClosed);
        }
        let address = device
            .address
            .clone()
            .ok_or_else(|| DeviceError::Unreachable(device.name.clone()))?;

        Ok(Arc::new(ProbeConnection {
            name: device.name.clone(),
            address,
            resolver,
            connected: AtomicBool::new(true),
        }))
    }
}

struct ProbeResolver {
    registry: Arc<dyn DeviceRegistry>,
    closed: AtomicBool,
}

#[async_trait]
impl Resolver for ProbeResolver {
    async fn browse(&self, timeout: Duration) -> Result<Vec<DeviceDescriptor>, DeviceError> {
        if self.is_closed() {
            return Err(DeviceError::ResolverClosed);
        }

        let probes = self.registry.known_devices().iter().map(|device| async move {
            let reachable = match &device.address {
                Some(address) => probe(&device.name, address, timeout).await.is_ok(),
                None => false,
            };
            DeviceDescriptor::new(device.name.clone(), device.address.clone(), reachable)
        });

        Ok(join_all(probes).await)
    }

    async fn resolve(&self, name: &str, timeout: Duration) -> Result<DeviceDescriptor, DeviceError> {
        if self.is_closed() {
            return Err(DeviceError::ResolverClosed);
        }

        let device = self
            .registry
            .lookup(name)
            .ok_or_else(|| DeviceError::NotFound(name.to_string()))?;
        let address = device
            .address
            .as_deref()
            .ok_or_else(|| DeviceError::Unreachable(name.to_string()))?;

        probe(name, address, timeout).await?;
        Ok(DeviceDescriptor::new(name, Some(address.to_string()), true))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct ProbeConnection {
    name: String,
    address: String,
    resolver: Arc<dyn Resolver>,
    connected: AtomicBool,
}

impl ProbeConnection {
    async fn ensure_reachable(&self) -> Result<(), DeviceError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(DeviceError::Command(format!("'{}' is disconnected", self.name)));
        }
        probe(&self.name, &self.address, COMMAND_PROBE_TIMEOUT).await
    }

    fn unsupported<T>(&self, command: &str) -> Result<T, DeviceError> {
        debug!("{}: refusing '{}'", self.name, command);
        Err(DeviceError::Command(format!(
            "{}: transport not supported by the probe backend",
            command
        )))
    }
}

#[async_trait]
impl DeviceConnection for ProbeConnection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn validate(&self) -> Result<(), DeviceError> {
        self.ensure_reachable().await
    }

    async fn play_track(&self, _track: &Track) -> Result<(), DeviceError> {
        self.unsupported("play")
    }

    async fn pause(&self) -> Result<(), DeviceError> {
        self.unsupported("pause")
    }

    async fn resume(&self) -> Result<(), DeviceError> {
        self.unsupported("resume")
    }

    async fn stop(&self) -> Result<(), DeviceError> {
        self.unsupported("stop")
    }

    async fn volume(&self) -> Result<u8, DeviceError> {
        self.unsupported("volume")
    }

    async fn set_volume(&self, _volume: u8) -> Result<(), DeviceError> {
        self.unsupported("volume")
    }

    async fn reconnect(&self) -> Result<(), DeviceError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(DeviceError::Command(format!("'{}' is disconnected", self.name)));
        }
        self.resolver.resolve(&self.name, COMMAND_PROBE_TIMEOUT).await?;
        info!("{}: reconnected", self.name);
        Ok(())
    }

    fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            info!("{}: disconnected", self.name);
        }
    }
}
