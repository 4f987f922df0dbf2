//! Playback state and control

pub mod manager;
pub mod state;

pub use manager::PlaybackManager;
