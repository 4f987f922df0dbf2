//! HTTP server setup and routing
//!
//! Sets up the Axum router for the REST endpoints and the WebSocket live
//! channel.

use super::{handlers, ws};
use crate::error::{Error, Result};
use crate::state::SharedState;
use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub state: Arc<SharedState>,
}

/// Build the application router
pub fn create_router(state: Arc<SharedState>) -> Router {
    let ctx = AppContext { state };

    Router::new()
        // Health endpoint
        .route("/health", get(handlers::health))
        // Playback devices
        .route("/api/chromecast/status", get(handlers::device_status))
        .route("/api/chromecast/switch", post(handlers::switch_device))
        // Playback control
        .route("/api/mediaplayer/status", get(handlers::playback_status))
        .route("/api/mediaplayer/current_track", get(handlers::playback_status))
        .route(
            "/api/mediaplayer/play_album_from_albumid/:album_id",
            post(handlers::play_album),
        )
        .route("/api/mediaplayer/play_track", post(handlers::play_track))
        .route("/api/mediaplayer/play", post(handlers::play))
        .route("/api/mediaplayer/pause", post(handlers::pause))
        .route("/api/mediaplayer/next", post(handlers::next))
        .route("/api/mediaplayer/previous", post(handlers::previous))
        .route("/api/mediaplayer/stop", post(handlers::stop))
        .route(
            "/api/mediaplayer/volume",
            get(handlers::get_volume).post(handlers::set_volume),
        )
        .route("/api/mediaplayer/repeat", post(handlers::set_repeat))
        // Album library
        .route("/api/library/albums", get(handlers::list_albums))
        // Tag encoding
        .route("/api/nfc-encoding/start", post(handlers::start_encoding))
        .route("/api/nfc-encoding/status", get(handlers::encoding_status))
        .route("/api/nfc-encoding/stop", post(handlers::stop_encoding))
        // Live channel
        .route("/ws", get(ws::live_channel))
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        // Enable CORS for the local web UI
        .layer(CorsLayer::permissive())
}

/// Serve the API on `addr` until `shutdown` resolves
pub async fn run<F>(state: Arc<SharedState>, addr: SocketAddr, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);

    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Http(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::Http(format!("Server error: {}", e)))?;

    Ok(())
}
