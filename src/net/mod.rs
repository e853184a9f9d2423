//! Network layer.
//!
//! # Data Flow
//! ```text
//! GatewayConfig
//!     → tls.rs (load and check PEM material, when HTTPS is configured)
//!     → listener.rs (bind bind:port synchronously, classify failures)
//!     → BoundListener handed to axum-server by the lifecycle controller
//! ```
//!
//! # Design Decisions
//! - Binding happens before any task is spawned, so the controller sees
//!   address-in-use and other bind errors directly
//! - TLS material problems are reported as bind failures

pub mod listener;
pub mod tls;

pub use listener::{bind, bind_tcp, BindError, BoundListener};
pub use tls::load_tls_config;
