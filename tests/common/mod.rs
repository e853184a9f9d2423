//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use hub_gateway::config::{CorsPolicy, GatewayConfig};
use hub_gateway::hub::{Bus, DataEnvelope, DataResult, LocalHub, MemoryStore};
use hub_gateway::observability::{AccessLog, AccessRecord, ErrorRecord};
use hub_gateway::Gateway;

/// Loopback config on an ephemeral port, streaming off.
pub fn test_config() -> GatewayConfig {
    GatewayConfig {
        port: 0,
        enable_socket_io: false,
        cors: CorsPolicy::Disabled,
        ..GatewayConfig::default()
    }
}

/// Records everything the gateway logs through `AccessLog`.
#[derive(Clone, Default)]
pub struct CollectingLog {
    access: Arc<Mutex<Vec<AccessRecord>>>,
    errors: Arc<Mutex<Vec<ErrorRecord>>>,
}

impl CollectingLog {
    pub fn access(&self) -> Vec<AccessRecord> {
        self.access.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<ErrorRecord> {
        self.errors.lock().unwrap().clone()
    }
}

impl AccessLog for CollectingLog {
    fn record_access(&self, record: &AccessRecord) {
        self.access.lock().unwrap().push(record.clone());
    }

    fn record_error(&self, record: &ErrorRecord) {
        self.errors.lock().unwrap().push(record.clone());
    }
}

/// Tracing layer counting WARN events.
#[derive(Clone, Default)]
pub struct WarnCounter(Arc<AtomicUsize>);

impl WarnCounter {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl<S: Subscriber> Layer<S> for WarnCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::WARN {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Attach an in-memory data layer to the hub.
pub fn attach_memory_store(hub: &LocalHub) {
    let requests = hub.take_data_requests().unwrap();
    tokio::spawn(MemoryStore::new().serve(requests));
}

/// Attach a data layer that answers with `respond` and records every
/// request it saw.
pub fn attach_responder<F>(hub: &LocalHub, respond: F) -> Arc<Mutex<Vec<hub_gateway::hub::DataRequest>>>
where
    F: Fn(&hub_gateway::hub::DataRequest) -> DataResult + Send + 'static,
{
    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&seen);
    let mut requests = hub.take_data_requests().unwrap();
    tokio::spawn(async move {
        while let Some(DataEnvelope { request, reply }) = requests.recv().await {
            let result = respond(&request);
            record.lock().unwrap().push(request);
            reply.send(result);
        }
    });
    seen
}

/// Gateway on `hub` with a collecting access log.
pub fn gateway(hub: &Arc<LocalHub>, log: &CollectingLog) -> Gateway {
    Gateway::new(Arc::clone(hub) as Arc<dyn Bus>).with_access_log(Arc::new(log.clone()))
}

/// Poll `check` until it holds or a second passes.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
