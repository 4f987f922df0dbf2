//! Live channel envelopes
//!
//! Every message pushed to a live client is one JSON envelope:
//!
//! ```json
//! {"type": "ping"}
//! {"type": "error", "message": "..."}
//! {"type": "current_track", "payload": { ...playback state... }}
//! {"type": "notification", "payload": { ...event... }}
//! ```

use jukebox_common::events::{Event, PlaybackState};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    Ping,
    Error { message: String },
    CurrentTrack { payload: PlaybackState },
    Notification { payload: serde_json::Value },
}

impl Envelope {
    pub fn notification(event: &Event) -> serde_json::Result<Self> {
        Ok(Envelope::Notification {
            payload: serde_json::to_value(event)?,
        })
    }

    /// Serialize once for delivery to every subscriber
    pub fn to_frame(&self) -> serde_json::Result<Frame> {
        Ok(Frame {
            text: serde_json::to_string(self)?.into(),
            ping: matches!(self, Envelope::Ping),
        })
    }
}

/// A serialized envelope shared between subscriber queues
#[derive(Debug, Clone)]
pub struct Frame {
    text: Arc<str>,
    ping: bool,
}

impl Frame {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_ping(&self) -> bool {
        self.ping
    }
}
