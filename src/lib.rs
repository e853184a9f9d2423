//! Pluggable HTTP gateway for an in-process event hub.
//!
//! The gateway runs an ordered request pipeline (counter, CORS, body parser,
//! access log, user stages, route handlers, error stage), bridges CRUD routes
//! to typed data-layer requests on the hub, and manages its own listener
//! through a small lifecycle state machine.

pub mod config;
pub mod error;
pub mod http;
pub mod hub;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use http::{AppBuilder, ResourceDescriptor};
pub use hub::{Bus, GatewayEvent, LocalHub};
pub use lifecycle::{Gateway, GatewayHandle, LifecycleError, LifecycleState};
