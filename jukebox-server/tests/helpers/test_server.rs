//! Test server wrapper for integration tests
//!
//! Builds the full jukebox (bus, managers, router) around simulated
//! devices and a small in-memory album library.

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use jukebox_common::config::{BackendKind, JukeboxConfig, KnownDevice};
use jukebox_server::api::create_router;
use jukebox_server::device::{MemoryBackend, StaticDeviceRegistry};
use jukebox_server::library::{Album, LibraryTrack, StaticLibrary};
use jukebox_server::SharedState;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

pub const LIVING_ROOM: &str = "Living Room";
pub const KITCHEN: &str = "Kitchen";
/// Configured but offline
pub const BATHROOM: &str = "Bathroom Speaker";

/// Album with three tracks
pub const ALBUM_ID: u64 = 42;

/// Jukebox instance with full API and simulated devices
pub struct TestServer {
    pub router: Router,
    pub state: Arc<SharedState>,
    pub backend: MemoryBackend,
}

fn test_config() -> JukeboxConfig {
    let mut config = JukeboxConfig::default();
    config.devices.backend = BackendKind::Memory;
    config.devices.default = Some(LIVING_ROOM.to_string());
    config.devices.discovery_timeout_secs = 1;
    config.devices.connect_timeout_secs = 1;
    config.devices.known = [LIVING_ROOM, KITCHEN, BATHROOM]
        .into_iter()
        .map(|name| KnownDevice {
            name: name.to_string(),
            address: None,
        })
        .collect();
    config.broadcast.max_missed_heartbeats = 2;
    config.encoding.poll_interval_ms = 3000;
    config
}

fn test_library() -> StaticLibrary {
    let tracks = (1..=3)
        .map(|n| LibraryTrack {
            title: format!("Side A {}", n),
            artist: None,
            duration: 240.0,
            uri: format!("http://nas.local/music/42/{:02}.flac", n),
        })
        .collect();

    StaticLibrary::new(vec![
        Album {
            id: ALBUM_ID,
            title: "Kind of Blue".to_string(),
            artist: "Miles Davis".to_string(),
            year: Some(1959),
            thumb: Some("/thumbs/42.jpg".to_string()),
            tracks,
        },
        Album {
            id: 7,
            title: "Silence".to_string(),
            artist: "Nobody".to_string(),
            year: None,
            thumb: None,
            tracks: Vec::new(),
        },
    ])
    .expect("valid test library")
}

impl TestServer {
    /// Start a jukebox with no active device
    pub fn start() -> Self {
        let config = test_config();
        let registry = Arc::new(StaticDeviceRegistry::from(&config.devices));
        let backend = MemoryBackend::from_registry(registry.as_ref());
        backend.set_reachable(BATHROOM, false);

        let state = SharedState::new(
            config,
            registry,
            Arc::new(backend.clone()),
            Arc::new(test_library()),
        );
        let router = create_router(state.clone());

        Self {
            router,
            state,
            backend,
        }
    }

    /// Start a jukebox connected to the default device
    pub async fn start_connected() -> Self {
        let server = Self::start();
        server.state.connect_default_device().await;
        let state = server.state.clone();
        wait_until(|| {
            let state = state.clone();
            async move { state.playback.get_snapshot().device_name.is_some() }
        })
        .await;
        server
    }

    pub async fn get(&self, path: &str) -> (StatusCode, Value) {
        self.request(Method::GET, path, None).await
    }

    pub async fn post(&self, path: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.request(Method::POST, path, body).await
    }

    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(path);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }
}

/// Poll `condition` until it holds; panics after two seconds
pub async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within 2s"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
