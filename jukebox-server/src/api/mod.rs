//! REST and WebSocket API

pub mod handlers;
pub mod server;
pub mod ws;

pub use server::{create_router, run, AppContext};
