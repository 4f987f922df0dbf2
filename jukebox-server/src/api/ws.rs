//! WebSocket live channel
//!
//! Each client gets its own subscriber queue in the [`StatusBroadcaster`].
//! The current playback state is pushed right after the upgrade so a
//! client never has to wait for the next change to render. Anything the
//! client sends counts as a heartbeat acknowledgement.

use crate::api::server::AppContext;
use crate::broadcast::{Envelope, StatusBroadcaster, SubscriberId, Subscription};
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use jukebox_common::events::PlaybackState;
use std::sync::Arc;
use tracing::{debug, warn};

/// Removes the subscriber however the connection ends
struct SubscriberGuard {
    id: SubscriberId,
    broadcaster: Arc<StatusBroadcaster>,
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.broadcaster.unsubscribe(self.id);
    }
}

/// GET /ws - Upgrade to the live channel
pub async fn live_channel(
    ws: WebSocketUpgrade,
    State(ctx): State<AppContext>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, ctx))
}

async fn handle_socket(socket: WebSocket, ctx: AppContext) {
    let broadcaster = ctx.state.broadcaster.clone();
    let Subscription { id, mut receiver } = broadcaster.subscribe();
    let _guard = SubscriberGuard {
        id,
        broadcaster: broadcaster.clone(),
    };

    let (mut sender, mut incoming) = socket.split();

    let hydrate = Envelope::CurrentTrack {
        payload: PlaybackState::clone(&ctx.state.playback.get_snapshot()),
    };
    match hydrate.to_frame() {
        Ok(frame) => {
            if sender.send(Message::Text(frame.text().to_string())).await.is_err() {
                return;
            }
        }
        Err(e) => warn!("Cannot serialize playback state: {}", e),
    }

    loop {
        tokio::select! {
            frame = receiver.recv() => {
                let Some(frame) = frame else {
                    debug!("Live client {} pruned", id);
                    break;
                };
                if frame.is_ping() && sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
                if sender.send(Message::Text(frame.text().to_string())).await.is_err() {
                    break;
                }
            }
            message = incoming.next() => match message {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => broadcaster.acknowledge(id),
                Some(Err(e)) => {
                    debug!("Live client {} socket error: {}", id, e);
                    break;
                }
            },
        }
    }

    let _ = sender.close().await;
}
