//! Live progress fan-out.
//!
//! ## Design
//! - `ProgressHub`: Arc<Mutex<HashMap<query id, Channel>>> shared by the
//!   orchestrator (publisher) and every WebSocket connection (subscribers)
//! - Each channel is a `tokio::sync::broadcast` sender plus the last update
//!   published, so a subscriber that connects late starts from current state
//! - Subscribing and reading the snapshot happen under one lock, so no update
//!   can slip between them
//!
//! ## WebSocket lifecycle
//! 1. Client connects to `/ws/queries/{id}/status`
//! 2. Server sends the current snapshot (if any)
//! 3. Every published update is forwarded as a JSON text frame
//! 4. After a terminal update (`complete` / `error`) the server closes

use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::debug;

use crate::types::ProgressUpdate;

const CHANNEL_CAPACITY: usize = 64;

struct Channel {
    tx: broadcast::Sender<ProgressUpdate>,
    last: Option<ProgressUpdate>,
}

impl Channel {
    fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx, last: None }
    }
}

/// Per-query broadcast channels with a last-update snapshot.
#[derive(Clone, Default)]
pub struct ProgressHub {
    channels: Arc<Mutex<HashMap<String, Channel>>>,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `update` as the latest state of `query_id` and send it to
    /// every current subscriber. Having no subscribers is not an error.
    pub fn publish(&self, query_id: &str, update: ProgressUpdate) {
        if let Ok(mut guard) = self.channels.lock() {
            let channel = guard
                .entry(query_id.to_string())
                .or_insert_with(Channel::new);
            channel.last = Some(update.clone());
            let _ = channel.tx.send(update);
        }
    }

    /// Subscribe to `query_id`, returning the snapshot taken at the same
    /// moment.
    pub fn subscribe(
        &self,
        query_id: &str,
    ) -> (Option<ProgressUpdate>, broadcast::Receiver<ProgressUpdate>) {
        match self.channels.lock() {
            Ok(mut guard) => {
                let channel = guard
                    .entry(query_id.to_string())
                    .or_insert_with(Channel::new);
                (channel.last.clone(), channel.tx.subscribe())
            }
            Err(_) => {
                // Poisoned hub: hand out a receiver that reports Closed.
                let (tx, rx) = broadcast::channel(1);
                drop(tx);
                (None, rx)
            }
        }
    }

    pub fn snapshot(&self, query_id: &str) -> Option<ProgressUpdate> {
        self.channels
            .lock()
            .ok()
            .and_then(|g| g.get(query_id).and_then(|c| c.last.clone()))
    }

    /// Drop the stored snapshot, e.g. before a retry starts over.
    pub fn reset(&self, query_id: &str) {
        if let Ok(mut guard) = self.channels.lock() {
            if let Some(channel) = guard.get_mut(query_id) {
                channel.last = None;
            }
        }
    }

    pub fn subscriber_count(&self, query_id: &str) -> usize {
        self.channels
            .lock()
            .ok()
            .and_then(|g| g.get(query_id).map(|c| c.tx.receiver_count()))
            .unwrap_or(0)
    }
}

/// Serve one progress WebSocket.
///
/// `fallback` is sent first when the hub has no snapshot for the query yet
/// (e.g. a query that finished before the server restarted).
pub async fn handle_ws(
    ws_stream: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    hub: ProgressHub,
    query_id: String,
    fallback: Option<ProgressUpdate>,
) {
    let (snapshot, mut rx) = hub.subscribe(&query_id);
    let (mut ws_sink, mut ws_stream) = ws_stream.split();

    if let Some(initial) = snapshot.or(fallback) {
        let terminal = initial.status.is_terminal();
        if let Ok(text) = serde_json::to_string(&initial) {
            if ws_sink.send(WsMessage::Text(text)).await.is_err() {
                return;
            }
        }
        if terminal {
            let _ = ws_sink.send(WsMessage::Close(None)).await;
            return;
        }
    }

    loop {
        tokio::select! {
            msg = ws_stream.next() => {
                match msg {
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                    // Clients have nothing to say on this socket.
                    Some(Ok(_)) => {}
                }
            }

            update = rx.recv() => {
                match update {
                    Ok(update) => {
                        let terminal = update.status.is_terminal();
                        if let Ok(text) = serde_json::to_string(&update) {
                            if ws_sink.send(WsMessage::Text(text)).await.is_err() {
                                break;
                            }
                        }
                        if terminal {
                            let _ = ws_sink.send(WsMessage::Close(None)).await;
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!(query_id = %query_id, skipped = n, "progress subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}
