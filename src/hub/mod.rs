//! Hub (event bus) interface.
//!
//! # Data Flow
//! ```text
//! gateway ──publish(GatewayEvent)──▶ bus ──▶ any subscriber
//! bridge  ──dispatch(DataEnvelope)─▶ bus ──▶ data layer ──Reply──▶ bridge
//! lifecycle ──request_shutdown────▶ bus ──▶ host process exits
//! ```
//!
//! # Design Decisions
//! - The bus is shared and externally owned; the gateway only holds an `Arc<dyn Bus>`
//! - Event kinds and data operations are closed enums, not topic strings
//! - `LocalHub` is the in-process implementation used by the binary and tests

pub mod data;
pub mod events;
pub mod memory;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::lifecycle::Shutdown;

pub use data::{
    DataEnvelope, DataOp, DataRequest, DataResult, ReadSelector, Reply, ReplyError, ReplyHandle,
};
pub use events::GatewayEvent;
pub use memory::MemoryStore;

/// Errors raised when handing something to the bus.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BusError {
    /// Nobody is consuming data requests.
    #[error("no data layer subscribed")]
    NoSubscriber,
}

/// The narrow interface the gateway needs from its hosting hub.
pub trait Bus: Send + Sync + 'static {
    /// Announce a gateway event to every subscriber.
    fn publish(&self, event: GatewayEvent);

    /// Hand a data request to the data layer.
    fn dispatch(&self, envelope: DataEnvelope) -> Result<(), BusError>;

    /// Ask the hosting process to terminate.
    fn request_shutdown(&self, reason: &str);
}

/// In-process bus backed by tokio channels.
pub struct LocalHub {
    events: broadcast::Sender<GatewayEvent>,
    data_tx: mpsc::UnboundedSender<DataEnvelope>,
    data_rx: Mutex<Option<mpsc::UnboundedReceiver<DataEnvelope>>>,
    shutdown: Shutdown,
    shutdown_requests: AtomicUsize,
}

impl LocalHub {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        let (data_tx, data_rx) = mpsc::unbounded_channel();
        Self {
            events,
            data_tx,
            data_rx: Mutex::new(Some(data_rx)),
            shutdown: Shutdown::new(),
            shutdown_requests: AtomicUsize::new(0),
        }
    }

    /// Subscribe to gateway events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.events.subscribe()
    }

    /// Take the data request stream. Only the first caller gets it.
    pub fn take_data_requests(&self) -> Option<mpsc::UnboundedReceiver<DataEnvelope>> {
        self.data_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    /// Receiver that fires when a fatal shutdown is requested.
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    /// How many fatal shutdowns have been requested.
    pub fn shutdown_requests(&self) -> usize {
        self.shutdown_requests.load(Ordering::SeqCst)
    }
}

impl Default for LocalHub {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus for LocalHub {
    fn publish(&self, event: GatewayEvent) {
        // No subscribers is fine; events are notifications.
        let _ = self.events.send(event);
    }

    fn dispatch(&self, envelope: DataEnvelope) -> Result<(), BusError> {
        self.data_tx
            .send(envelope)
            .map_err(|_| BusError::NoSubscriber)
    }

    fn request_shutdown(&self, reason: &str) {
        self.shutdown_requests.fetch_add(1, Ordering::SeqCst);
        tracing::error!(reason = %reason, "Fatal shutdown requested");
        self.shutdown.trigger();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn dispatch_reaches_data_layer() {
        let hub = LocalHub::new();
        let mut requests = hub.take_data_requests().unwrap();
        assert!(hub.take_data_requests().is_none());

        let (envelope, _handle) = DataEnvelope::new(DataRequest::Create {
            resource: "widgets".into(),
            body: json!({"a": 1}),
        });
        hub.dispatch(envelope).unwrap();
        let received = requests.recv().await.unwrap();
        assert_eq!(received.request.op(), DataOp::Create);
    }

    #[test]
    fn dispatch_without_data_layer_fails() {
        let hub = LocalHub::new();
        drop(hub.take_data_requests());
        let (envelope, _handle) = DataEnvelope::new(DataRequest::Delete {
            resource: "widgets".into(),
            id: "1".into(),
        });
        assert_eq!(hub.dispatch(envelope), Err(BusError::NoSubscriber));
    }

    #[tokio::test]
    async fn shutdown_request_is_counted_and_broadcast() {
        let hub = LocalHub::new();
        let mut signal = hub.shutdown_signal();
        hub.request_shutdown("test");
        assert_eq!(hub.shutdown_requests(), 1);
        assert!(signal.recv().await.is_ok());
    }
}
