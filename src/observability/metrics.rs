//! Stat counters and metrics exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): every request that entered the pipeline
//! - `gateway_streaming_clients` (gauge): connected streaming clients
//! - `gateway_request_duration_seconds` (histogram): by method and status
//!
//! `Stats` is the owned source of truth; the `metrics` facade mirrors it for
//! scraping when an exporter is installed.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

/// Record a finished request's latency.
pub fn record_duration(method: &str, status: Option<u16>, elapsed: Duration) {
    let status = status.map_or_else(|| "closed".to_string(), |s| s.to_string());
    metrics::histogram!(
        "gateway_request_duration_seconds",
        "method" => method.to_string(),
        "status" => status
    )
    .record(elapsed.as_secs_f64());
}

/// Process-lifetime counters, shared by `Arc` with the stages that update them.
#[derive(Debug, Default)]
pub struct Stats {
    total_requests: AtomicU64,
    streaming_clients: AtomicUsize,
}

impl Stats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Count a request. Returns the new total.
    pub fn record_request(&self) -> u64 {
        metrics::counter!("gateway_requests_total").increment(1);
        self.total_requests.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn streaming_clients(&self) -> usize {
        self.streaming_clients.load(Ordering::SeqCst)
    }

    /// Record a connected streaming client. Dropping the guard records the disconnect.
    pub fn client_connected(self: &Arc<Self>) -> StreamingClientGuard {
        let now = self.streaming_clients.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::gauge!("gateway_streaming_clients").set(now as f64);
        StreamingClientGuard {
            stats: Arc::clone(self),
        }
    }
}

/// Held for the lifetime of a streaming connection.
#[derive(Debug)]
pub struct StreamingClientGuard {
    stats: Arc<Stats>,
}

impl Drop for StreamingClientGuard {
    fn drop(&mut self) {
        let now = self.stats.streaming_clients.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::gauge!("gateway_streaming_clients").set(now as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_counter_is_monotonic() {
        let stats = Stats::new();
        assert_eq!(stats.record_request(), 1);
        assert_eq!(stats.record_request(), 2);
        assert_eq!(stats.total_requests(), 2);
    }

    #[test]
    fn streaming_guard_tracks_clients() {
        let stats = Stats::new();
        let a = stats.client_connected();
        let b = stats.client_connected();
        assert_eq!(stats.streaming_clients(), 2);
        drop(a);
        assert_eq!(stats.streaming_clients(), 1);
        drop(b);
        assert_eq!(stats.streaming_clients(), 0);
    }
}
