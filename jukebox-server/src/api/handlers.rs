//! HTTP request handlers
//!
//! REST endpoints for device selection, playback control, the album
//! library and tag encoding. Failures are returned as [`Error`], which
//! renders `{"detail": ...}` with the matching status code.

use crate::api::server::AppContext;
use crate::connection::SwitchOutcome;
use crate::device::{ConnectionState, DeviceDescriptor};
use crate::encoding::EncodingStatus;
use crate::error::{Error, Result};
use crate::library::AlbumSummary;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use jukebox_common::events::{AlbumId, PlaybackState};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
    git_hash: String,
}

#[derive(Debug, Serialize)]
pub struct DeviceStatusResponse {
    available_devices: Vec<DeviceDescriptor>,
    active_device: Option<String>,
    /// Resolved address of the active device
    active_address: Option<String>,
    connection_state: ConnectionState,
}

#[derive(Debug, Deserialize)]
pub struct SwitchParams {
    device_name: String,
}

#[derive(Debug, Serialize)]
pub struct SwitchResponse {
    status: SwitchOutcome,
    device_name: String,
}

#[derive(Debug, Deserialize)]
pub struct PlayTrackRequest {
    track_index: usize,
}

#[derive(Debug, Deserialize)]
pub struct VolumeRequest {
    /// 0-100
    volume: u8,
}

#[derive(Debug, Serialize)]
pub struct VolumeResponse {
    volume: u8,
}

#[derive(Debug, Deserialize)]
pub struct RepeatRequest {
    repeat: bool,
}

#[derive(Debug, Deserialize)]
pub struct StartEncodingRequest {
    album_id: AlbumId,
}

#[derive(Debug, Serialize)]
pub struct StartEncodingResponse {
    session_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct StopEncodingResponse {
    status: String,
    cancelled: bool,
}

fn snapshot(ctx: &AppContext) -> Json<PlaybackState> {
    Json(PlaybackState::clone(&ctx.state.playback.get_snapshot()))
}

// ============================================================================
// Health Endpoint
// ============================================================================

/// GET /health - Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "jukebox".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("GIT_HASH").to_string(),
    })
}

// ============================================================================
// Device Endpoints
// ============================================================================

/// GET /api/chromecast/status - Discovered devices and the active one
pub async fn device_status(State(ctx): State<AppContext>) -> Json<DeviceStatusResponse> {
    let connections = &ctx.state.connections;
    let available_devices = connections
        .list_devices(ctx.state.config.devices.discovery_timeout())
        .await;

    let active = connections.active_descriptor();
    Json(DeviceStatusResponse {
        available_devices,
        active_device: active.as_ref().map(|d| d.name.clone()),
        active_address: active.and_then(|d| d.address),
        connection_state: connections.connection_state(),
    })
}

/// POST /api/chromecast/switch?device_name=X - Switch the active device
pub async fn switch_device(
    State(ctx): State<AppContext>,
    Query(params): Query<SwitchParams>,
) -> Result<Json<SwitchResponse>> {
    info!("Switch device request: {}", params.device_name);
    let status = ctx
        .state
        .connections
        .switch_device(&params.device_name, ctx.state.config.devices.connect_timeout())
        .await?;

    Ok(Json(SwitchResponse {
        status,
        device_name: params.device_name,
    }))
}

// ============================================================================
// Media Player Endpoints
// ============================================================================

/// GET /api/mediaplayer/status and /api/mediaplayer/current_track
pub async fn playback_status(State(ctx): State<AppContext>) -> Json<PlaybackState> {
    snapshot(&ctx)
}

/// POST /api/mediaplayer/play_album_from_albumid/:album_id
pub async fn play_album(
    State(ctx): State<AppContext>,
    Path(album_id): Path<AlbumId>,
) -> Result<Json<PlaybackState>> {
    let tracks = ctx
        .state
        .library
        .album_tracks(album_id)
        .ok_or_else(|| Error::NotFound(format!("album {}", album_id)))?;

    ctx.state.playback.play_album(tracks).await?;
    Ok(snapshot(&ctx))
}

/// POST /api/mediaplayer/play_track - Jump to a playlist position
pub async fn play_track(
    State(ctx): State<AppContext>,
    Json(request): Json<PlayTrackRequest>,
) -> Result<Json<PlaybackState>> {
    ctx.state
        .playback
        .play_track_at_index(request.track_index)
        .await?;
    Ok(snapshot(&ctx))
}

/// POST /api/mediaplayer/play
pub async fn play(State(ctx): State<AppContext>) -> Result<Json<PlaybackState>> {
    ctx.state.playback.play().await?;
    Ok(snapshot(&ctx))
}

/// POST /api/mediaplayer/pause
pub async fn pause(State(ctx): State<AppContext>) -> Result<Json<PlaybackState>> {
    ctx.state.playback.pause().await?;
    Ok(snapshot(&ctx))
}

/// POST /api/mediaplayer/next
pub async fn next(State(ctx): State<AppContext>) -> Result<Json<PlaybackState>> {
    ctx.state.playback.next().await?;
    Ok(snapshot(&ctx))
}

/// POST /api/mediaplayer/previous
pub async fn previous(State(ctx): State<AppContext>) -> Result<Json<PlaybackState>> {
    ctx.state.playback.previous().await?;
    Ok(snapshot(&ctx))
}

/// POST /api/mediaplayer/stop - Stop and clear the playlist
pub async fn stop(State(ctx): State<AppContext>) -> Result<Json<PlaybackState>> {
    ctx.state.playback.stop().await?;
    Ok(snapshot(&ctx))
}

/// GET /api/mediaplayer/volume
pub async fn get_volume(State(ctx): State<AppContext>) -> Json<VolumeResponse> {
    Json(VolumeResponse {
        volume: ctx.state.playback.get_snapshot().volume,
    })
}

/// POST /api/mediaplayer/volume
pub async fn set_volume(
    State(ctx): State<AppContext>,
    Json(request): Json<VolumeRequest>,
) -> Result<Json<VolumeResponse>> {
    ctx.state.playback.set_volume(request.volume).await?;
    Ok(Json(VolumeResponse {
        volume: request.volume,
    }))
}

/// POST /api/mediaplayer/repeat
pub async fn set_repeat(
    State(ctx): State<AppContext>,
    Json(request): Json<RepeatRequest>,
) -> Result<Json<PlaybackState>> {
    ctx.state.playback.set_repeat(request.repeat).await?;
    Ok(snapshot(&ctx))
}

// ============================================================================
// Library Endpoints
// ============================================================================

/// GET /api/library/albums
pub async fn list_albums(State(ctx): State<AppContext>) -> Json<Vec<AlbumSummary>> {
    Json(ctx.state.library.albums())
}

// ============================================================================
// NFC Encoding Endpoints
// ============================================================================

/// POST /api/nfc-encoding/start - Claim the encoding slot for an album
pub async fn start_encoding(
    State(ctx): State<AppContext>,
    Json(request): Json<StartEncodingRequest>,
) -> Result<Json<StartEncodingResponse>> {
    let session_id = ctx.state.encoding.start(request.album_id)?;
    Ok(Json(StartEncodingResponse { session_id }))
}

/// GET /api/nfc-encoding/status
pub async fn encoding_status(State(ctx): State<AppContext>) -> Json<EncodingStatus> {
    Json(ctx.state.encoding.status())
}

/// POST /api/nfc-encoding/stop
pub async fn stop_encoding(State(ctx): State<AppContext>) -> Json<StopEncodingResponse> {
    let cancelled = ctx.state.encoding.stop();
    Json(StopEncodingResponse {
        status: "stopped".to_string(),
        cancelled,
    })
}
