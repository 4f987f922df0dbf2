//! NFC tag encoding sessions
//!
//! Writing an album reference onto a tag is a single-slot workflow:
//! `start` claims the slot, the tag hardware reports progress through bus
//! events, and the slot is released as soon as the session is terminal.
//!
//! ```text
//! Waiting ──TagDetected──▶ Encoding ──TagWritten──▶ Success
//!    │                        └──TagWriteFailed──▶ Failure
//!    └────────── stop() from any non-terminal ──▶ Cancelled
//! ```
//!
//! Clients poll [`EncodingSessionManager::status`].

use crate::error::{Error, Result};
use crate::library::AlbumLibrary;
use chrono::{DateTime, Utc};
use jukebox_common::events::{
    AlbumId, EncodingState, Event, EventBus, EventHandler, HandlerResult, JukeboxEvent,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// One tag-encoding session
#[derive(Debug, Clone, Serialize)]
pub struct EncodingSession {
    pub session_id: Uuid,
    pub album_id: AlbumId,
    pub state: EncodingState,
    pub last_uid: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl EncodingSession {
    fn new(album_id: AlbumId) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            album_id,
            state: EncodingState::Waiting,
            last_uid: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Move to `new_state`; terminal sessions never change
    fn transition_to(&mut self, new_state: EncodingState) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        debug!(
            "Encoding session {}: {} -> {}",
            self.session_id, self.state, new_state
        );
        self.state = new_state;
        if new_state.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
        true
    }
}

/// Polled encoding status
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncodingStatus {
    /// True while a session is waiting for or writing a tag
    pub encoding_mode: bool,
    /// Last session ended in success
    pub success: bool,
    pub last_uid: Option<String>,
    pub session_id: Option<Uuid>,
    pub state: Option<EncodingState>,
    /// Suggested client poll interval
    pub poll_interval_ms: u64,
}

#[derive(Default)]
struct Slot {
    active: Option<EncodingSession>,
    /// Most recent terminal session, reported until the next start
    finished: Option<EncodingSession>,
}

pub struct EncodingSessionManager {
    slot: Mutex<Slot>,
    library: Arc<dyn AlbumLibrary>,
    bus: Arc<EventBus>,
    poll_interval_ms: u64,
}

impl EncodingSessionManager {
    pub fn new(library: Arc<dyn AlbumLibrary>, bus: Arc<EventBus>, poll_interval_ms: u64) -> Self {
        Self {
            slot: Mutex::new(Slot::default()),
            library,
            bus,
            poll_interval_ms,
        }
    }

    /// Claim the slot for `album_id`
    pub fn start(&self, album_id: AlbumId) -> Result<Uuid> {
        if !self.library.contains(album_id) {
            return Err(Error::NotFound(format!("album {}", album_id)));
        }

        let mut slot = self.slot.lock();
        if slot.active.is_some() {
            return Err(Error::SessionBusy);
        }
        let session = EncodingSession::new(album_id);
        let session_id = session.session_id;
        info!("Encoding session {} started for album {}", session_id, album_id);
        slot.active = Some(session);
        slot.finished = None;
        Ok(session_id)
    }

    /// Cancel the active session, if any
    ///
    /// Returns true when a session was cancelled.
    pub fn stop(&self) -> bool {
        self.advance(|session| {
            session.transition_to(EncodingState::Cancelled);
            true
        })
    }

    /// A tag was presented to the reader
    pub fn tag_detected(&self, uid: &str) -> bool {
        self.advance(|session| {
            if session.state != EncodingState::Waiting {
                return false;
            }
            session.last_uid = Some(uid.to_string());
            session.transition_to(EncodingState::Encoding)
        })
    }

    /// The album reference was written to tag `uid`
    ///
    /// Accepted while still waiting: the detect step is implied.
    pub fn tag_written(&self, uid: &str) -> bool {
        self.advance(|session| {
            session.last_uid = Some(uid.to_string());
            session.transition_to(EncodingState::Success)
        })
    }

    pub fn tag_write_failed(&self, reason: &str) -> bool {
        self.advance(|session| {
            info!("Encoding session {} failed: {}", session.session_id, reason);
            session.transition_to(EncodingState::Failure)
        })
    }

    /// Apply `step` to the active session, releasing the slot if it ended
    ///
    /// `EncodingFinished` is published after the slot lock is released.
    fn advance(&self, step: impl FnOnce(&mut EncodingSession) -> bool) -> bool {
        let finished = {
            let mut slot = self.slot.lock();
            let Some(session) = slot.active.as_mut() else {
                debug!("No active encoding session, ignoring");
                return false;
            };
            if !step(session) {
                return false;
            }
            if session.state.is_terminal() {
                let done = slot.active.take();
                slot.finished = done.clone();
                done
            } else {
                None
            }
        };

        if let Some(session) = finished {
            info!(
                "Encoding session {} finished: {}",
                session.session_id, session.state
            );
            self.bus.publish(JukeboxEvent::EncodingFinished {
                session_id: session.session_id,
                album_id: session.album_id,
                state: session.state,
                uid: session.last_uid,
            });
        }
        true
    }

    pub fn status(&self) -> EncodingStatus {
        let slot = self.slot.lock();
        let session = slot.active.as_ref().or(slot.finished.as_ref());
        EncodingStatus {
            encoding_mode: slot.active.is_some(),
            success: session.is_some_and(|s| s.state == EncodingState::Success),
            last_uid: session.and_then(|s| s.last_uid.clone()),
            session_id: session.map(|s| s.session_id),
            state: session.map(|s| s.state),
            poll_interval_ms: self.poll_interval_ms,
        }
    }

    /// Active session, if any
    pub fn active_session(&self) -> Option<EncodingSession> {
        self.slot.lock().active.clone()
    }
}

impl EventHandler for EncodingSessionManager {
    fn name(&self) -> &str {
        "EncodingSessionManager"
    }

    fn handle(&self, event: &Event) -> HandlerResult {
        match &event.payload {
            JukeboxEvent::TagDetected { uid } => {
                self.tag_detected(uid);
            }
            JukeboxEvent::TagWritten { uid } => {
                self.tag_written(uid);
            }
            JukeboxEvent::TagWriteFailed { reason } => {
                self.tag_write_failed(reason);
            }
            _ => {}
        }
        Ok(())
    }
}
