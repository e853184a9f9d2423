//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! logging stage / error stage
//!     → logging.rs (AccessLog sink → structured tracing events)
//! request counter / streaming endpoint
//!     → metrics.rs (Stats atomics, mirrored to the metrics facade)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Prometheus scrape endpoint (optional)
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, AccessLog, AccessRecord, ErrorRecord, TracingAccessLog};
pub use metrics::{Stats, StreamingClientGuard};
