//! Live subscriber registry and fan-out

use super::envelope::{Envelope, Frame};
use jukebox_common::config::BroadcastConfig;
use jukebox_common::events::{Event, EventHandler, HandlerError, HandlerResult, JukeboxEvent};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Registry key of one live client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Receiving end handed to a live client connection
pub struct Subscription {
    pub id: SubscriberId,
    pub receiver: mpsc::Receiver<Frame>,
}

struct Subscriber {
    sender: mpsc::Sender<Frame>,
    /// Heartbeats sent since the last acknowledgement
    missed: u32,
}

/// Pushes envelopes to every live client
///
/// The registry has its own lock, never held while delivering: fan-out
/// works on a copy of the registry. A subscriber whose queue is closed or
/// full is removed; delivery to the others continues.
pub struct StatusBroadcaster {
    subscribers: Mutex<HashMap<SubscriberId, Subscriber>>,
    next_id: AtomicU64,
    buffer: usize,
    max_missed: u32,
}

impl StatusBroadcaster {
    /// `buffer` is the per-subscriber queue length; subscribers missing
    /// `max_missed` consecutive heartbeats are pruned
    pub fn new(buffer: usize, max_missed: u32) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
            max_missed: max_missed.max(1),
        }
    }

    pub fn from_config(config: &BroadcastConfig) -> Self {
        Self::new(config.subscriber_buffer, config.max_missed_heartbeats)
    }

    pub fn subscribe(&self) -> Subscription {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::channel(self.buffer);
        let count = {
            let mut subscribers = self.subscribers.lock();
            subscribers.insert(id, Subscriber { sender, missed: 0 });
            subscribers.len()
        };
        info!("Live client {} connected, total clients: {}", id, count);
        Subscription { id, receiver }
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        if self.subscribers.lock().remove(&id).is_some() {
            info!("Live client {} disconnected", id);
        }
    }

    /// Record that the client answered; resets its missed-heartbeat count
    pub fn acknowledge(&self, id: SubscriberId) {
        if let Some(subscriber) = self.subscribers.lock().get_mut(&id) {
            subscriber.missed = 0;
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Deliver an envelope to every registered subscriber
    ///
    /// Returns the number of subscribers that accepted it.
    pub fn broadcast(&self, envelope: &Envelope) -> usize {
        let frame = match envelope.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Cannot serialize live envelope: {}", e);
                return 0;
            }
        };

        let targets: Vec<(SubscriberId, mpsc::Sender<Frame>)> = self
            .subscribers
            .lock()
            .iter()
            .map(|(id, subscriber)| (*id, subscriber.sender.clone()))
            .collect();

        self.deliver(targets, &frame)
    }

    fn deliver(&self, targets: Vec<(SubscriberId, mpsc::Sender<Frame>)>, frame: &Frame) -> usize {
        let mut delivered = 0;
        let mut failed = Vec::new();
        for (id, sender) in targets {
            match sender.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("Live client {} is not keeping up, dropping it", id);
                    failed.push(id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("Live client {} went away", id);
                    failed.push(id);
                }
            }
        }

        if !failed.is_empty() {
            let mut subscribers = self.subscribers.lock();
            for id in &failed {
                subscribers.remove(id);
            }
        }
        delivered
    }

    /// Ping every subscriber, pruning those that stopped acknowledging
    ///
    /// Returns the number of subscribers pruned.
    pub fn heartbeat(&self) -> usize {
        let mut pruned = 0;
        let targets: Vec<(SubscriberId, mpsc::Sender<Frame>)> = {
            let mut subscribers = self.subscribers.lock();
            let max_missed = self.max_missed;
            subscribers.retain(|id, subscriber| {
                if subscriber.missed >= max_missed {
                    info!("Live client {} missed {} heartbeats, pruning", id, subscriber.missed);
                    pruned += 1;
                    false
                } else {
                    true
                }
            });
            subscribers
                .iter_mut()
                .map(|(id, subscriber)| {
                    subscriber.missed += 1;
                    (*id, subscriber.sender.clone())
                })
                .collect()
        };

        let before = targets.len();
        match Envelope::Ping.to_frame() {
            Ok(frame) => {
                let delivered = self.deliver(targets, &frame);
                pruned + (before - delivered)
            }
            Err(e) => {
                warn!("Cannot serialize ping: {}", e);
                pruned
            }
        }
    }

    /// Run [`heartbeat`](Self::heartbeat) every `interval` until the
    /// broadcaster is dropped
    pub fn spawn_heartbeat(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(broadcaster) = weak.upgrade() else {
                    break;
                };
                let pruned = broadcaster.heartbeat();
                if pruned > 0 {
                    debug!("Heartbeat pruned {} live clients", pruned);
                }
            }
        })
    }
}

impl EventHandler for StatusBroadcaster {
    fn name(&self) -> &str {
        "StatusBroadcaster"
    }

    fn handle(&self, event: &Event) -> HandlerResult {
        let envelope = match &event.payload {
            JukeboxEvent::PlaybackStateChanged { state } => Envelope::CurrentTrack {
                payload: state.clone(),
            },
            JukeboxEvent::PlaybackError { message } => Envelope::Error {
                message: message.clone(),
            },
            JukeboxEvent::DeviceChanged { .. } | JukeboxEvent::EncodingFinished { .. } => {
                Envelope::notification(event).map_err(|e| HandlerError::new(e.to_string()))?
            }
            _ => return Ok(()),
        };

        let delivered = self.broadcast(&envelope);
        debug!("{:?} pushed to {} live clients", event.kind(), delivered);
        Ok(())
    }
}
