//! Test helper modules for jukebox-server integration tests
//!
//! - TestServer: full jukebox over simulated devices, driven through the router

#![allow(dead_code)]

pub mod test_server;

pub use test_server::{wait_until, TestServer, ALBUM_ID, BATHROOM, KITCHEN, LIVING_ROOM};
