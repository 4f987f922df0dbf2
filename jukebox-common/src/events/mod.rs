//! Event types for the jukebox event system
//!
//! Provides the shared event vocabulary and the synchronous EventBus that
//! connects hardware callbacks, API handlers and the managers.

mod encoding_types;
mod playback_types;

pub use encoding_types::EncodingState;
pub use playback_types::{AlbumId, PlaybackState, PlaybackStatus, Track};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};
use uuid::Uuid;

/// Jukebox event payloads
///
/// Events are published on the EventBus and can be serialized for the live
/// channel. Each variant maps to exactly one [`EventKind`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JukeboxEvent {
    /// Active playback device replaced
    ///
    /// Triggers:
    /// - PlaybackManager: update device name, resync volume
    /// - Live channel: notification
    DeviceChanged { device_name: String },

    /// Canonical playback state mutated
    ///
    /// Carries a full snapshot taken under the playback lock.
    PlaybackStateChanged { state: PlaybackState },

    /// Device client reported the end of the current track
    TrackFinished { device_name: String },

    /// Non-fatal playback failure to surface to connected clients
    PlaybackError { message: String },

    /// Tag reader saw a tag while an encoding session may be waiting
    TagDetected { uid: String },

    /// Tag writer finished writing the album reference
    TagWritten { uid: String },

    /// Tag write failed
    TagWriteFailed { reason: String },

    /// Encoding session reached a terminal state
    EncodingFinished {
        session_id: Uuid,
        album_id: AlbumId,
        state: EncodingState,
        uid: Option<String>,
    },
}

/// Event kind discriminant used for subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    DeviceChanged,
    PlaybackStateChanged,
    TrackFinished,
    PlaybackError,
    TagDetected,
    TagWritten,
    TagWriteFailed,
    EncodingFinished,
}

impl JukeboxEvent {
    /// Kind of this event, used for handler routing
    pub fn kind(&self) -> EventKind {
        match self {
            JukeboxEvent::DeviceChanged { .. } => EventKind::DeviceChanged,
            JukeboxEvent::PlaybackStateChanged { .. } => EventKind::PlaybackStateChanged,
            JukeboxEvent::TrackFinished { .. } => EventKind::TrackFinished,
            JukeboxEvent::PlaybackError { .. } => EventKind::PlaybackError,
            JukeboxEvent::TagDetected { .. } => EventKind::TagDetected,
            JukeboxEvent::TagWritten { .. } => EventKind::TagWritten,
            JukeboxEvent::TagWriteFailed { .. } => EventKind::TagWriteFailed,
            JukeboxEvent::EncodingFinished { .. } => EventKind::EncodingFinished,
        }
    }
}

/// A published event: payload plus publication time
///
/// Immutable once published; handlers receive a shared reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(flatten)]
    pub payload: JukeboxEvent,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Stamp a payload with the current time
    pub fn new(payload: JukeboxEvent) -> Self {
        Self {
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Error reported by a failing handler
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Result returned by [`EventHandler::handle`]
pub type HandlerResult = std::result::Result<(), HandlerError>;

/// Subscriber interface for bus events
///
/// Handlers run on the publisher's thread and must return promptly. Work
/// that may block is handed to another execution context by the handler.
pub trait EventHandler: Send + Sync {
    /// Name used in logs when the handler fails
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn handle(&self, event: &Event) -> HandlerResult;
}

impl<F> EventHandler for F
where
    F: Fn(&Event) -> HandlerResult + Send + Sync,
{
    fn handle(&self, event: &Event) -> HandlerResult {
        self(event)
    }
}

/// Token returned by [`EventBus::subscribe`], used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type HandlerEntry = (SubscriptionId, Arc<dyn EventHandler>);

/// Central event distribution bus
///
/// Dispatch is synchronous: [`publish`](EventBus::publish) invokes every
/// handler subscribed to the event's kind, in subscription order, before
/// returning. The handler list is copied before dispatch, so handlers may
/// subscribe or unsubscribe while an event is being delivered.
///
/// A handler that returns an error or panics is logged and skipped; the
/// remaining handlers still run and the publisher is never affected.
///
/// # Examples
///
/// ```
/// use jukebox_common::events::{Event, EventBus, EventKind, HandlerResult, JukeboxEvent};
/// use std::sync::Arc;
///
/// let bus = EventBus::new();
/// bus.subscribe(
///     EventKind::DeviceChanged,
///     Arc::new(|event: &Event| -> HandlerResult {
///         println!("device changed at {}", event.timestamp);
///         Ok(())
///     }),
/// );
///
/// let delivered = bus.publish(JukeboxEvent::DeviceChanged {
///     device_name: "Living Room".to_string(),
/// });
/// assert_eq!(delivered, 1);
/// ```
pub struct EventBus {
    handlers: Mutex<HashMap<EventKind, Vec<HandlerEntry>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a handler for one event kind
    pub fn subscribe(&self, kind: EventKind, handler: Arc<dyn EventHandler>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!("EventBus: {} subscribed to {:?}", handler.name(), kind);
        self.handlers.lock().entry(kind).or_default().push((id, handler));
        id
    }

    /// Remove a handler; returns false if the id was unknown
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.lock();
        for entries in handlers.values_mut() {
            if let Some(pos) = entries.iter().position(|(entry_id, _)| *entry_id == id) {
                entries.remove(pos);
                return true;
            }
        }
        false
    }

    /// Stamp and publish an event
    ///
    /// Returns the number of handlers that completed successfully.
    pub fn publish(&self, payload: JukeboxEvent) -> usize {
        self.publish_event(&Event::new(payload))
    }

    /// Publish an already stamped event
    pub fn publish_event(&self, event: &Event) -> usize {
        let kind = event.kind();
        let snapshot: Vec<HandlerEntry> = match self.handlers.lock().get(&kind) {
            Some(entries) => entries.clone(),
            None => Vec::new(),
        };

        if snapshot.is_empty() {
            debug!("EventBus: no handlers for {:?}", kind);
            return 0;
        }

        let mut delivered = 0;
        for (_, handler) in &snapshot {
            match catch_unwind(AssertUnwindSafe(|| handler.handle(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    warn!("EventBus: handler {} failed on {:?}: {}", handler.name(), kind, e);
                }
                Err(_) => {
                    warn!("EventBus: handler {} panicked on {:?}", handler.name(), kind);
                }
            }
        }
        delivered
    }

    /// Number of handlers registered for a kind
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.handlers.lock().get(&kind).map_or(0, Vec::len)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscribes a handler without keeping it alive
///
/// Managers own the bus through an `Arc` while the bus holds their handlers;
/// a weak subscription breaks that cycle. Once the target is dropped the
/// handler is a no-op.
pub struct WeakHandler<T> {
    target: Weak<T>,
}

impl<T> WeakHandler<T> {
    pub fn new(target: &Arc<T>) -> Self {
        Self {
            target: Arc::downgrade(target),
        }
    }
}

impl<T: EventHandler + 'static> EventHandler for WeakHandler<T> {
    fn name(&self) -> &str {
        std::any::type_name::<T>()
    }

    fn handle(&self, event: &Event) -> HandlerResult {
        match self.target.upgrade() {
            Some(target) => target.handle(event),
            None => Ok(()),
        }
    }
}

impl EventBus {
    /// Subscribe `target` to several kinds through weak references
    pub fn subscribe_weak<T: EventHandler + 'static>(
        &self,
        target: &Arc<T>,
        kinds: &[EventKind],
    ) -> Vec<SubscriptionId> {
        kinds
            .iter()
            .map(|kind| self.subscribe(*kind, Arc::new(WeakHandler::new(target))))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn device_changed(name: &str) -> JukeboxEvent {
        JukeboxEvent::DeviceChanged {
            device_name: name.to_string(),
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(device_changed("Kitchen")), 0);
    }

    #[test]
    fn test_publish_routes_by_kind() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        bus.subscribe(
            EventKind::DeviceChanged,
            Arc::new(move |_: &Event| -> HandlerResult {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        bus.publish(JukeboxEvent::TagDetected {
            uid: "04:AA".to_string(),
        });
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        assert_eq!(bus.publish(device_changed("Kitchen")), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handlers_run_in_subscription_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = order.clone();
            bus.subscribe(
                EventKind::DeviceChanged,
                Arc::new(move |_: &Event| -> HandlerResult {
                    order.lock().push(i);
                    Ok(())
                }),
            );
        }

        bus.publish(device_changed("Kitchen"));
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_failing_handler_does_not_stop_others() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        bus.subscribe(
            EventKind::DeviceChanged,
            Arc::new(|_: &Event| -> HandlerResult { Err(HandlerError::new("boom")) }),
        );
        bus.subscribe(
            EventKind::DeviceChanged,
            Arc::new(|_: &Event| -> HandlerResult { panic!("handler panic") }),
        );
        let counter = hits.clone();
        bus.subscribe(
            EventKind::DeviceChanged,
            Arc::new(move |_: &Event| -> HandlerResult {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        let delivered = bus.publish(device_changed("Kitchen"));
        assert_eq!(delivered, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let id = bus.subscribe(EventKind::TagWritten, Arc::new(|_: &Event| -> HandlerResult { Ok(()) }));
        assert_eq!(bus.subscriber_count(EventKind::TagWritten), 1);

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.subscriber_count(EventKind::TagWritten), 0);
    }

    #[test]
    fn test_subscribe_during_dispatch() {
        let bus = Arc::new(EventBus::new());
        let inner_bus = bus.clone();

        bus.subscribe(
            EventKind::DeviceChanged,
            Arc::new(move |_: &Event| -> HandlerResult {
                inner_bus.subscribe(EventKind::DeviceChanged, Arc::new(|_: &Event| -> HandlerResult { Ok(()) }));
                Ok(())
            }),
        );

        // Handler added mid-dispatch is not part of the current snapshot
        assert_eq!(bus.publish(device_changed("Kitchen")), 1);
        assert_eq!(bus.subscriber_count(EventKind::DeviceChanged), 2);
    }

    #[test]
    fn test_weak_handler_stops_after_drop() {
        struct Counter(AtomicUsize);
        impl EventHandler for Counter {
            fn handle(&self, _: &Event) -> HandlerResult {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let bus = EventBus::new();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let ids = bus.subscribe_weak(&counter, &[EventKind::DeviceChanged, EventKind::TrackFinished]);
        assert_eq!(ids.len(), 2);

        bus.publish(device_changed("Kitchen"));
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert_eq!(Arc::strong_count(&counter), 1);

        drop(counter);
        assert_eq!(bus.publish(device_changed("Kitchen")), 1);
    }

    #[test]
    fn test_event_serialization_carries_type_tag() {
        let event = Event::new(device_changed("Living Room"));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "DeviceChanged");
        assert_eq!(json["device_name"], "Living Room");
        assert!(json["timestamp"].is_string());
        assert_eq!(event.kind(), EventKind::DeviceChanged);
    }
}
