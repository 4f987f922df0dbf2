//! Playback device capability layer
//!
//! The device-control client is an external collaborator. These traits are
//! the seam through which the managers drive it:
//!
//! - [`DeviceBackend`] opens resolvers and builds connections
//! - [`Resolver`] enumerates and resolves devices on the local network
//! - [`DeviceConnection`] is one live connection to a playback device
//!
//! Resolver and connection lifetimes are owned by the caller, never by
//! background threads inside the client.

pub mod memory;
pub mod probe;
pub mod registry;

pub use memory::MemoryBackend;
pub use probe::NetworkProbeBackend;
pub use registry::{DeviceRegistry, StaticDeviceRegistry};

use async_trait::async_trait;
use jukebox_common::events::Track;
use serde::Serialize;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// A playback device as seen by one discovery pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceDescriptor {
    /// Unique key
    pub name: String,
    /// Network address, once resolved
    pub address: Option<String>,
    pub reachable: bool,
}

impl DeviceDescriptor {
    pub fn new(name: impl Into<String>, address: Option<String>, reachable: bool) -> Self {
        Self {
            name: name.into(),
            address,
            reachable,
        }
    }
}

/// Lifecycle of the managed device connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Discovering,
    Connecting,
    Connected,
    Failed,
}

/// Errors raised by device backends
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error("device '{0}' is unreachable")]
    Unreachable(String),

    #[error("timed out after {timeout:?} waiting for '{device}'")]
    Timeout { device: String, timeout: Duration },

    #[error("unknown device '{0}'")]
    NotFound(String),

    /// Transient service-discovery failure
    #[error("discovery failed: {0}")]
    Discovery(String),

    #[error("device command failed: {0}")]
    Command(String),

    #[error("resolver is closed")]
    ResolverClosed,
}

/// Service-discovery handle
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Scan the network for up to `timeout`
    async fn browse(&self, timeout: Duration) -> Result<Vec<DeviceDescriptor>, DeviceError>;

    /// Resolve one device by name
    async fn resolve(&self, name: &str, timeout: Duration) -> Result<DeviceDescriptor, DeviceError>;

    /// Release the handle; idempotent
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// A live connection to one playback device
#[async_trait]
pub trait DeviceConnection: Send + Sync {
    fn name(&self) -> &str;

    /// Check the device answers; called before a connection is installed
    async fn validate(&self) -> Result<(), DeviceError>;

    async fn play_track(&self, track: &Track) -> Result<(), DeviceError>;

    async fn pause(&self) -> Result<(), DeviceError>;

    async fn resume(&self) -> Result<(), DeviceError>;

    async fn stop(&self) -> Result<(), DeviceError>;

    /// Current device volume, 0-100
    async fn volume(&self) -> Result<u8, DeviceError>;

    async fn set_volume(&self, volume: u8) -> Result<(), DeviceError>;

    /// Re-establish the session through the persistent resolver
    async fn reconnect(&self) -> Result<(), DeviceError>;

    /// Drop the session; idempotent
    fn disconnect(&self);
}

/// Factory for resolvers and connections
#[async_trait]
pub trait DeviceBackend: Send + Sync {
    fn open_resolver(&self) -> Result<Arc<dyn Resolver>, DeviceError>;

    /// Build a connection to a resolved device
    ///
    /// `resolver` stays referenced by the connection for its whole lifetime
    /// so reconnection keeps working.
    async fn connect(
        &self,
        resolver: Arc<dyn Resolver>,
        device: &DeviceDescriptor,
    ) -> Result<Arc<dyn DeviceConnection>, DeviceError>;
}

/// Closes the wrapped resolver when dropped
///
/// Covers every exit path: normal return, `?` propagation, and a caller
/// future dropped mid-scan.
pub struct ResolverGuard {
    resolver: Arc<dyn Resolver>,
}

impl ResolverGuard {
    pub fn new(resolver: Arc<dyn Resolver>) -> Self {
        Self { resolver }
    }
}

impl Deref for ResolverGuard {
    type Target = dyn Resolver;

    fn deref(&self) -> &Self::Target {
        self.resolver.as_ref()
    }
}

impl Drop for ResolverGuard {
    fn drop(&mut self) {
        self.resolver.close();
    }
}
