//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Host commands (controller.rs, via GatewayHandle):
//!     use / crud / pre_start / configure → start → stop
//!
//! start():
//!     PreStart event → hooks extend the app → error stage appended
//!     → bind (TLS or plain) → Listening + Ready events
//!     bind failure → fatal shutdown request, or a warning
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → host stops the gateway
//! ```
//!
//! # Design Decisions
//! - One task owns the server; commands are processed one at a time
//! - No retries: recovery is the host's call

pub mod controller;
pub mod shutdown;
pub mod signals;
pub mod state;

pub use controller::{Gateway, GatewayHandle, LifecycleError};
pub use shutdown::Shutdown;
pub use signals::terminate_signal;
pub use state::LifecycleState;
