//! In-process simulated playback devices
//!
//! Backs `backend = "memory"` for demos without hardware and gives tests
//! full control over reachability, latency and failures. Every command a
//! device receives is recorded and can be inspected with
//! [`MemoryBackend::commands`].

use super::{DeviceBackend, DeviceConnection, DeviceDescriptor, DeviceError, DeviceRegistry, Resolver};
use async_trait::async_trait;
use jukebox_common::events::Track;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const RECONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
struct SimDevice {
    reachable: bool,
    volume: u8,
    volume_readable: bool,
    /// Commands fail until the connection is re-established
    session_lost: bool,
    commands: Vec<String>,
}

impl SimDevice {
    fn new(reachable: bool) -> Self {
        Self {
            reachable,
            volume: 50,
            volume_readable: true,
            session_lost: false,
            commands: Vec::new(),
        }
    }
}

#[derive(Default)]
struct Shared {
    devices: Mutex<BTreeMap<String, SimDevice>>,
    discovery_failure: AtomicBool,
    connect_delay: Mutex<Duration>,
    resolvers_opened: AtomicUsize,
    resolvers_closed: AtomicUsize,
}

impl Shared {
    fn descriptor(name: &str, reachable: bool) -> DeviceDescriptor {
        DeviceDescriptor::new(name, Some(format!("memory://{}", name)), reachable)
    }

    fn with_device<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut SimDevice) -> Result<T, DeviceError>,
    ) -> Result<T, DeviceError> {
        let mut devices = self.devices.lock();
        let device = devices
            .get_mut(name)
            .ok_or_else(|| DeviceError::NotFound(name.to_string()))?;
        if !device.reachable {
            return Err(DeviceError::Unreachable(name.to_string()));
        }
        f(device)
    }
}

/// Simulated device backend
#[derive(Clone, Default)]
pub struct MemoryBackend {
    shared: Arc<Shared>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend with the given devices, all reachable
    pub fn with_devices<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let backend = Self::new();
        for name in names {
            backend.add_device(name, true);
        }
        backend
    }

    /// One reachable simulated device per configured device
    pub fn from_registry(registry: &dyn DeviceRegistry) -> Self {
        Self::with_devices(registry.known_devices().iter().map(|d| d.name.clone()))
    }

    pub fn add_device(&self, name: impl Into<String>, reachable: bool) {
        self.shared
            .devices
            .lock()
            .insert(name.into(), SimDevice::new(reachable));
    }

    pub fn set_reachable(&self, name: &str, reachable: bool) {
        if let Some(device) = self.shared.devices.lock().get_mut(name) {
            device.reachable = reachable;
        }
    }

    pub fn set_device_volume(&self, name: &str, volume: u8) {
        if let Some(device) = self.shared.devices.lock().get_mut(name) {
            device.volume = volume;
        }
    }

    /// Make volume reads fail while commands keep working
    pub fn set_volume_readable(&self, name: &str, readable: bool) {
        if let Some(device) = self.shared.devices.lock().get_mut(name) {
            device.volume_readable = readable;
        }
    }

    /// Drop the device's control session; it stays reachable
    pub fn interrupt_session(&self, name: &str) {
        if let Some(device) = self.shared.devices.lock().get_mut(name) {
            device.session_lost = true;
        }
    }

    /// Make every browse fail with a transient discovery error
    pub fn fail_discovery(&self, fail: bool) {
        self.shared.discovery_failure.store(fail, Ordering::SeqCst);
    }

    /// Latency added to each successful resolve
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.shared.connect_delay.lock() = delay;
    }

    /// Commands received by a device, oldest first
    pub fn commands(&self, name: &str) -> Vec<String> {
        self.shared
            .devices
            .lock()
            .get(name)
            .map(|d| d.commands.clone())
            .unwrap_or_default()
    }

    pub fn device_volume(&self, name: &str) -> Option<u8> {
        self.shared.devices.lock().get(name).map(|d| d.volume)
    }

    pub fn resolvers_opened(&self) -> usize {
        self.shared.resolvers_opened.load(Ordering::SeqCst)
    }

    pub fn resolvers_closed(&self) -> usize {
        self.shared.resolvers_closed.load(Ordering::SeqCst)
    }

    /// Resolvers opened and not yet closed
    pub fn open_resolvers(&self) -> usize {
        self.resolvers_opened() - self.resolvers_closed()
    }
}

#[async_trait]
impl DeviceBackend for MemoryBackend {
    fn open_resolver(&self) -> Result<Arc<dyn Resolver>, DeviceError> {
        self.shared.resolvers_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemoryResolver {
            shared: self.shared.clone(),
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
        self.shared.with_device(&device.name, |sim| {
            sim.commands.push("connect".to_string());
            Ok(())
        })?;

        Ok(Arc::new(MemoryConnection {
            name: device.name.clone(),
            shared: self.shared.clone(),
            resolver,
            connected: AtomicBool::new(true),
        }))
    }
}

struct MemoryResolver {
    shared: Arc<Shared>,
    closed: AtomicBool,
}

#[async_trait]
impl Resolver for MemoryResolver {
    async fn browse(&self, _timeout: Duration) -> Result<Vec<DeviceDescriptor>, DeviceError> {
        if self.is_closed() {
            return Err(DeviceError::ResolverClosed);
        }
        if self.shared.discovery_failure.load(Ordering::SeqCst) {
            return Err(DeviceError::Discovery("simulated network failure".to_string()));
        }

        let devices = self.shared.devices.lock();
        Ok(devices
            .iter()
            .filter(|(_, sim)| sim.reachable)
            .map(|(name, _)| Shared::descriptor(name, true))
            .collect())
    }

    async fn resolve(&self, name: &str, timeout: Duration) -> Result<DeviceDescriptor, DeviceError> {
        if self.is_closed() {
            return Err(DeviceError::ResolverClosed);
        }

        let reachable = match self.shared.devices.lock().get(name) {
            Some(sim) => sim.reachable,
            None => return Err(DeviceError::NotFound(name.to_string())),
        };

        if !reachable {
            // An offline device never answers; the caller waits out the timeout
            tokio::time::sleep(timeout).await;
            return Err(DeviceError::Timeout {
                device: name.to_string(),
                timeout,
            });
        }

        let delay = *self.shared.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(Shared::descriptor(name, true))
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.shared.resolvers_closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct MemoryConnection {
    name: String,
    shared: Arc<Shared>,
    resolver: Arc<dyn Resolver>,
    connected: AtomicBool,
}

impl MemoryConnection {
    fn command(&self, command: String) -> Result<(), DeviceError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(DeviceError::Command(format!("'{}' is disconnected", self.name)));
        }
        debug!("memory device {}: {}", self.name, command);
        self.shared.with_device(&self.name, |sim| {
            if sim.session_lost {
                return Err(DeviceError::Command(format!("session with '{}' lost", self.name)));
            }
            sim.commands.push(command);
            Ok(())
        })
    }
}

#[async_trait]
impl DeviceConnection for MemoryConnection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn validate(&self) -> Result<(), DeviceError> {
        self.shared.with_device(&self.name, |_| Ok(()))
    }

    async fn play_track(&self, track: &Track) -> Result<(), DeviceError> {
        self.command(format!("play {}", track.uri))
    }

    async fn pause(&self) -> Result<(), DeviceError> {
        self.command("pause".to_string())
    }

    async fn resume(&self) -> Result<(), DeviceError> {
        self.command("resume".to_string())
    }

    async fn stop(&self) -> Result<(), DeviceError> {
        self.command("stop".to_string())
    }

    async fn volume(&self) -> Result<u8, DeviceError> {
        self.shared.with_device(&self.name, |sim| {
            if sim.volume_readable {
                Ok(sim.volume)
            } else {
                Err(DeviceError::Command("volume unavailable".to_string()))
            }
        })
    }

    async fn set_volume(&self, volume: u8) -> Result<(), DeviceError> {
        self.command(format!("volume {}", volume))?;
        self.shared.with_device(&self.name, |sim| {
            sim.volume = volume;
            Ok(())
        })
    }

    async fn reconnect(&self) -> Result<(), DeviceError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(DeviceError::Command(format!("'{}' is disconnected", self.name)));
        }
        self.shared.with_device(&self.name, |_| Ok(()))?;
        self.resolver.resolve(&self.name, RECONNECT_TIMEOUT).await?;
        self.shared.with_device(&self.name, |sim| {
            sim.session_lost = false;
            sim.commands.push("reconnect".to_string());
            Ok(())
        })
    }

    fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            let _ = self.shared.with_device(&self.name, |sim| {
                sim.commands.push("disconnect".to_string());
                Ok(())
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_browse_lists_reachable_devices() {
        let backend = MemoryBackend::with_devices(["Kitchen", "Living Room"]);
        backend.add_device("Bathroom Speaker", false);

        let resolver = backend.open_resolver().unwrap();
        let found = resolver.browse(Duration::from_millis(10)).await.unwrap();
        let names: Vec<_> = found.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Kitchen", "Living Room"]);

        resolver.close();
        resolver.close();
        assert_eq!(backend.open_resolvers(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_resolve_times_out() {
        let backend = MemoryBackend::new();
        backend.add_device("Bathroom Speaker", false);

        let resolver = backend.open_resolver().unwrap();
        let err = resolver
            .resolve("Bathroom Speaker", Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_commands_are_recorded() {
        let backend = MemoryBackend::with_devices(["Kitchen"]);
        let resolver = backend.open_resolver().unwrap();
        let descriptor = resolver.resolve("Kitchen", Duration::from_secs(1)).await.unwrap();
        let connection = backend.connect(resolver, &descriptor).await.unwrap();

        connection.set_volume(30).await.unwrap();
        connection.pause().await.unwrap();
        connection.disconnect();
        assert!(connection.resume().await.is_err());

        assert_eq!(
            backend.commands("Kitchen"),
            vec!["connect", "volume 30", "pause", "disconnect"]
        );
        assert_eq!(backend.device_volume("Kitchen"), Some(30));
        assert!(connection.reconnect().await.is_err());
    }

    #[tokio::test]
    async fn test_reconnect_restores_lost_session() {
        let backend = MemoryBackend::with_devices(["Kitchen"]);
        let resolver = backend.open_resolver().unwrap();
        let descriptor = resolver.resolve("Kitchen", Duration::from_secs(1)).await.unwrap();
        let connection = backend.connect(resolver, &descriptor).await.unwrap();

        backend.interrupt_session("Kitchen");
        assert!(matches!(
            connection.pause().await,
            Err(DeviceError::Command(_))
        ));

        connection.reconnect().await.unwrap();
        connection.pause().await.unwrap();
        assert_eq!(backend.commands("Kitchen"), vec!["connect", "reconnect", "pause"]);

        backend.set_reachable("Kitchen", false);
        assert!(matches!(
            connection.reconnect().await,
            Err(DeviceError::Unreachable(_))
        ));
    }
}
