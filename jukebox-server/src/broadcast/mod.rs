//! Live status push to connected clients

pub mod broadcaster;
pub mod envelope;

pub use broadcaster::{StatusBroadcaster, SubscriberId, Subscription};
pub use envelope::{Envelope, Frame};
