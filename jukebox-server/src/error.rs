//! Error types for jukebox-server
//!
//! Defines the server error taxonomy using thiserror and its mapping onto
//! HTTP responses. Every REST failure carries a human-readable `detail`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Main error type for jukebox-server
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP server errors
    #[error("HTTP server error: {0}")]
    Http(String),

    /// Playback device unreachable or timed out while connecting
    #[error("Cannot connect to '{device}': {reason}")]
    Connection { device: String, reason: String },

    /// A device switch is already in flight
    #[error("Busy: {0}")]
    Busy(String),

    /// An encoding session already occupies the slot
    #[error("An encoding session is already active")]
    SessionBusy,

    /// Invalid playlist position
    #[error("Track index {index} out of range (playlist has {len} tracks)")]
    IndexOutOfRange { index: usize, len: usize },

    /// Playback command without a connected device
    #[error("No active playback device")]
    NoActiveDevice,

    /// Connected device stopped answering
    #[error("Device unreachable: {0}")]
    DeviceUnreachable(String),

    /// Unknown device or album
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// jukebox-common error
    #[error(transparent)]
    Common(#[from] jukebox_common::Error),
}

impl Error {
    /// HTTP status for this error kind
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Busy(_) | Error::SessionBusy | Error::NoActiveDevice | Error::InvalidState(_) => {
                StatusCode::CONFLICT
            }
            Error::Connection { .. } | Error::DeviceUnreachable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::IndexOutOfRange { .. } | Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Common(jukebox_common::Error::NotFound(_)) => StatusCode::NOT_FOUND,
            Error::Common(jukebox_common::Error::InvalidInput(_)) => StatusCode::BAD_REQUEST,
            Error::Config(_) | Error::Http(_) | Error::Internal(_) | Error::Common(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "detail": self.to_string(),
        }));
        (status, body).into_response()
    }
}

impl From<crate::device::DeviceError> for Error {
    fn from(e: crate::device::DeviceError) -> Self {
        use crate::device::DeviceError;
        match e {
            DeviceError::NotFound(name) => Error::NotFound(format!("device '{}'", name)),
            other => Error::DeviceUnreachable(other.to_string()),
        }
    }
}

/// Convenience Result type using jukebox-server Error
pub type Result<T> = std::result::Result<T, Error>;
