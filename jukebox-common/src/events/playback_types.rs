//! Playback-related type definitions
//!
//! Value types for the canonical "now playing" state. Instances travel inside
//! events as immutable snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Album identifier used by the library and the tag encoder
pub type AlbumId = u64;

/// Playback status enumeration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackStatus {
    /// Nothing playing (initial state, end of playlist, after stop)
    #[default]
    Idle,
    Playing,
    Paused,
}

impl std::fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackStatus::Idle => write!(f, "idle"),
            PlaybackStatus::Playing => write!(f, "playing"),
            PlaybackStatus::Paused => write!(f, "paused"),
        }
    }
}

/// One playable track
///
/// Inside a playlist `track_number` is the track's 0-based position in that
/// playlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub track_number: usize,
    pub title: String,
    pub artist: String,
    pub album: String,
    #[serde(default)]
    pub year: Option<u16>,
    /// Duration in seconds
    pub duration: f64,
    #[serde(default)]
    pub thumb: Option<String>,
    /// Media location handed to the playback device
    pub uri: String,
}

/// Canonical playback state
///
/// `elapsed_time` is a checkpoint taken at `checkpoint_at`, not a running
/// clock. Consumers extrapolate between checkpoints while `status` is
/// `Playing`.
///
/// Invariant: `current_track`, when set, indexes an entry of `playlist`;
/// an empty playlist has no current track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    pub current_track: Option<Track>,
    pub playlist: Vec<Track>,
    pub status: PlaybackStatus,
    /// Seconds since the current track started
    pub elapsed_time: f64,
    pub checkpoint_at: DateTime<Utc>,
    /// Device volume, 0-100
    pub volume: u8,
    pub device_name: Option<String>,
    #[serde(rename = "repeat_flag")]
    pub repeat: bool,
}

impl PlaybackState {
    /// Empty state used at process start and on reset
    pub fn empty() -> Self {
        Self {
            current_track: None,
            playlist: Vec::new(),
            status: PlaybackStatus::Idle,
            elapsed_time: 0.0,
            checkpoint_at: Utc::now(),
            volume: 50,
            device_name: None,
            repeat: false,
        }
    }

    /// Position of the current track in the playlist
    pub fn current_index(&self) -> Option<usize> {
        self.current_track.as_ref().map(|t| t.track_number)
    }

    /// Check the current-track/playlist invariant
    pub fn is_consistent(&self) -> bool {
        match &self.current_track {
            None => true,
            Some(track) => self
                .playlist
                .get(track.track_number)
                .is_some_and(|entry| entry == track),
        }
    }
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self::empty()
    }
}
