//! HTTP request pipeline.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → request-id layer (assign / propagate x-request-id)
//!     → middleware/chain.rs (framework stages, user stages)
//!     → route handlers (crud.rs, websocket.rs, hook routes)
//!     → middleware/error.rs (failures only)
//!     → response.rs (stage headers merged)
//!     → client
//! ```

pub mod crud;
pub mod middleware;
pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

/// Header carrying the per-request correlation ID.
pub const X_REQUEST_ID: &str = "x-request-id";

pub use crud::{BridgeError, CrudBridge, ResourceDescriptor, RouteBinding};
pub use request::{Completion, ParsedBody, Payload, RequestContext};
pub use server::{build_app, AppBuilder, AppContext, BuiltApp, PreStartHook};
pub use websocket::StreamBroadcaster;
