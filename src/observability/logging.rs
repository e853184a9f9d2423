//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber from `ObservabilityConfig`
//! - Define the access and error records written by the logging and error stages
//! - Provide the default `AccessLog` sink backed by `tracing`

use std::net::IpAddr;

use axum::http::Method;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, ObservabilityConfig};

/// Target used for access and error records.
pub const ACCESS_TARGET: &str = "hub_gateway::access";

/// Initialize the global subscriber. `RUST_LOG` wins over the configured level.
/// Calling it twice is harmless; the second call is ignored.
pub fn init_logging(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "hub_gateway={0},tower_http={0},axum_server={0}",
            config.log_level
        )
        .into()
    });
    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.log_format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// One completed request.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessRecord {
    pub method: Method,
    pub src: Option<IpAddr>,
    pub url: String,
    /// `None` when the connection closed before a response was produced.
    pub status: Option<u16>,
    /// Fractional milliseconds, never rounded.
    pub elapsed_ms: f64,
    pub request_id: Option<String>,
}

/// One request that ended in the error stage.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorRecord {
    pub method: Method,
    pub src: Option<IpAddr>,
    pub url: String,
    pub status: u16,
    pub error: String,
    pub request_id: Option<String>,
}

/// Sink for access and error records.
pub trait AccessLog: Send + Sync + 'static {
    fn record_access(&self, record: &AccessRecord);
    fn record_error(&self, record: &ErrorRecord);
}

/// Writes records as structured `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAccessLog;

impl AccessLog for TracingAccessLog {
    fn record_access(&self, r: &AccessRecord) {
        tracing::info!(
            target: ACCESS_TARGET,
            method = %r.method,
            src = ?r.src,
            url = %r.url,
            status = ?r.status,
            ms = r.elapsed_ms,
            request_id = ?r.request_id,
            "http request"
        );
    }

    fn record_error(&self, r: &ErrorRecord) {
        tracing::error!(
            target: ACCESS_TARGET,
            method = %r.method,
            src = ?r.src,
            url = %r.url,
            status = r.status,
            error = %r.error,
            request_id = ?r.request_id,
            "http error"
        );
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Keeps every record in memory.
    #[derive(Clone, Default)]
    pub struct CollectingLog {
        pub access: Arc<Mutex<Vec<AccessRecord>>>,
        pub errors: Arc<Mutex<Vec<ErrorRecord>>>,
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
}
