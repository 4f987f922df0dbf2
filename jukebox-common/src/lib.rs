//! # Jukebox Common Library
//!
//! Shared code for the jukebox services including:
//! - Event types (JukeboxEvent enum) and the synchronous EventBus
//! - Playback and tag-encoding value types
//! - Configuration loading

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
