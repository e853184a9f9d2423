//! Server lifecycle states.

use std::fmt;

/// Where the gateway's HTTP server is in its life.
///
/// ```text
/// Unconfigured → Configured → Binding → Listening → Closing → Closed
///                    ▲           │
///                    └─ warn ────┤ (error_on_bind_fail = false)
///                                └──→ Failed      (error_on_bind_fail = true)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Unconfigured,
    Configured,
    Binding,
    Listening,
    Closing,
    Closed,
    /// Terminal: binding failed and a fatal shutdown was requested.
    Failed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Unconfigured => "unconfigured",
            LifecycleState::Configured => "configured",
            LifecycleState::Binding => "binding",
            LifecycleState::Listening => "listening",
            LifecycleState::Closing => "closing",
            LifecycleState::Closed => "closed",
            LifecycleState::Failed => "failed",
        };
        f.write_str(name)
    }
}
