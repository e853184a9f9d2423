//! Streaming endpoint for hub collaborators.
//!
//! # Data Flow
//! ```text
//! client ──text frame──▶ gateway ──StreamMessage──▶ bus
//! bus collaborator ──StreamBroadcaster::send──▶ gateway ──text frame──▶ every client
//! ```
//!
//! # Design Decisions
//! - One broadcast channel per server; each client gets its own receiver
//! - Connected clients are counted through `Stats`; the guard lives as long
//!   as the connection task
//! - Slow clients skip frames instead of holding the others back

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use crate::hub::{Bus, GatewayEvent};
use crate::observability::Stats;

const BROADCAST_CAPACITY: usize = 64;

/// Pushes text frames to every connected streaming client.
#[derive(Debug, Clone)]
pub struct StreamBroadcaster {
    tx: broadcast::Sender<String>,
}

impl StreamBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { tx }
    }

    /// Send a frame to all clients. Returns how many were connected.
    pub fn send(&self, text: impl Into<String>) -> usize {
        self.tx.send(text.into()).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}

impl Default for StreamBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared state for the upgrade handler.
#[derive(Clone)]
pub struct StreamingState {
    pub broadcaster: StreamBroadcaster,
    pub stats: Arc<Stats>,
    pub bus: Arc<dyn Bus>,
}

/// Router serving the streaming endpoint at `path`.
pub fn router(path: &str, state: StreamingState) -> Router {
    Router::new()
        .route(path, get(upgrade))
        .with_state(state)
}

async fn upgrade(ws: WebSocketUpgrade, State(state): State<StreamingState>) -> Response {
    ws.on_upgrade(move |socket| serve_client(socket, state))
}

async fn serve_client(socket: WebSocket, state: StreamingState) {
    let _connected = state.stats.client_connected();
    let client = Uuid::new_v4().to_string();
    let mut frames = state.broadcaster.subscribe();
    let (mut sink, mut stream) = socket.split();
    tracing::debug!(client = %client, "streaming client connected");

    loop {
        tokio::select! {
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    state.bus.publish(GatewayEvent::StreamMessage {
                        client: client.clone(),
                        text: text.as_str().to_owned(),
                    });
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(client = %client, error = %e, "streaming client errored");
                    break;
                }
            },
            outbound = frames.recv() => match outbound {
                Ok(text) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(client = %client, skipped, "streaming client lagging; frames dropped");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    tracing::debug!(client = %client, "streaming client disconnected");
}
