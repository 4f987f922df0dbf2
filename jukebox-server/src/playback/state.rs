//! Playback state bookkeeping
//!
//! Pure state kept behind the PlaybackManager lock: the canonical
//! [`PlaybackState`], the clock behind its `elapsed_time` checkpoints, and
//! playlist navigation rules.

use chrono::Utc;
use jukebox_common::events::{PlaybackState, PlaybackStatus, Track};
use std::time::Instant;

/// `previous` restarts the current track once this much of it has played
pub const RESTART_THRESHOLD_SECS: f64 = 3.0;

/// Where `next` goes from the current position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    To(usize),
    /// Past the last track without repeat
    End,
}

/// Position after `current` in a playlist of `len` tracks
pub fn next_position(current: Option<usize>, len: usize, repeat: bool) -> Advance {
    match current {
        None => Advance::To(0),
        Some(index) if index + 1 < len => Advance::To(index + 1),
        Some(_) if repeat => Advance::To(0),
        Some(_) => Advance::End,
    }
}

/// Position `previous` selects
pub fn previous_position(current: Option<usize>, len: usize, repeat: bool, elapsed: f64) -> usize {
    match current {
        None => 0,
        Some(index) if elapsed >= RESTART_THRESHOLD_SECS => index,
        Some(0) if repeat => len.saturating_sub(1),
        Some(0) => 0,
        Some(index) => index - 1,
    }
}

/// Running clock for the current track
///
/// Accumulates while playing; frozen while paused.
#[derive(Debug, Default)]
pub struct ElapsedClock {
    base: f64,
    running_since: Option<Instant>,
}

impl ElapsedClock {
    pub fn elapsed(&self) -> f64 {
        match self.running_since {
            Some(since) => self.base + since.elapsed().as_secs_f64(),
            None => self.base,
        }
    }

    pub fn start(&mut self) {
        if self.running_since.is_none() {
            self.running_since = Some(Instant::now());
        }
    }

    pub fn pause(&mut self) {
        self.base = self.elapsed();
        self.running_since = None;
    }

    pub fn reset(&mut self) {
        self.base = 0.0;
        self.running_since = None;
    }
}

/// State guarded by the playback lock
#[derive(Debug, Default)]
pub struct PlaybackCore {
    pub state: PlaybackState,
    pub clock: ElapsedClock,
    /// Device the current track was last handed to
    pub loaded_on: Option<String>,
}

impl PlaybackCore {
    /// Replace the playlist, numbering tracks by position
    pub fn load_playlist(&mut self, tracks: Vec<Track>) {
        self.state.playlist = tracks
            .into_iter()
            .enumerate()
            .map(|(index, mut track)| {
                track.track_number = index;
                track
            })
            .collect();
        self.state.current_track = None;
        self.clock.reset();
    }

    /// Make `index` the current track, rewound to its start
    ///
    /// `index` must be within the playlist.
    pub fn select(&mut self, index: usize) -> Option<&Track> {
        let track = self.state.playlist.get(index)?.clone();
        self.state.current_track = Some(track);
        self.clock.reset();
        self.state.current_track.as_ref()
    }

    pub fn set_status(&mut self, status: PlaybackStatus) {
        match status {
            PlaybackStatus::Playing => self.clock.start(),
            PlaybackStatus::Paused => self.clock.pause(),
            PlaybackStatus::Idle => self.clock.reset(),
        }
        self.state.status = status;
    }

    /// Clear the playlist, keeping device, volume and repeat settings
    pub fn reset(&mut self) {
        self.state.playlist.clear();
        self.state.current_track = None;
        self.loaded_on = None;
        self.set_status(PlaybackStatus::Idle);
    }

    /// Record the elapsed checkpoint into the state
    pub fn checkpoint(&mut self) {
        self.state.elapsed_time = self.clock.elapsed();
        self.state.checkpoint_at = Utc::now();
    }
}
