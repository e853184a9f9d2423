//! Notifications the gateway publishes on the bus.

use std::net::SocketAddr;

use axum_server::Handle;

use crate::http::websocket::StreamBroadcaster;

/// Everything the gateway announces to other hub modules.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// `start()` is about to bind; pre-start hooks are running.
    PreStart,
    /// The listener is bound and serving.
    Listening {
        bind: String,
        port: u16,
        local_addr: SocketAddr,
        tls: bool,
        /// The live server; collaborators may watch connections or shut it
        /// down through it.
        server: Handle,
    },
    /// Human-readable readiness message for the hub.
    Ready(String),
    /// The streaming endpoint is up; use the broadcaster to push frames.
    Streaming(StreamBroadcaster),
    /// A text frame received from a streaming client.
    StreamMessage { client: String, text: String },
    /// The listener has closed.
    Closed,
}
