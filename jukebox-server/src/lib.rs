//! # Jukebox server
//!
//! Playback-state synchronization and device-connection core of the home
//! jukebox.
//!
//! **Purpose:** Keep one connection to a network playback device, own the
//! canonical "now playing" state, push it to every live client, and run
//! NFC tag-encoding sessions.
//!
//! **Architecture:** Managers coordinated through the synchronous
//! [`EventBus`](jukebox_common::events::EventBus), served over axum
//! (REST + WebSocket).

pub mod api;
pub mod broadcast;
pub mod connection;
pub mod device;
pub mod encoding;
pub mod error;
pub mod library;
pub mod playback;
pub mod state;

pub use error::{Error, Result};
pub use state::SharedState;
