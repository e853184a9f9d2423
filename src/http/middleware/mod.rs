//! Request-processing stages.
//!
//! # Data Flow
//! ```text
//! request
//!     → counter.rs  (total_requests)
//!     → cors.rs     (annotate / answer preflight)
//!     → body.rs     (parse JSON, urlencoded, text)
//!     → logging.rs  (access hook is armed on entry, written on completion)
//!     → user stages (registration order)
//!     → route handlers
//!     → error.rs    (only when something above failed)
//! ```
//!
//! Each stage returns an `Outcome`: keep going, answer now, or fail. The
//! first non-`Continue` outcome ends the walk.

pub mod body;
pub mod chain;
pub mod cors;
pub mod counter;
pub mod error;
pub mod logging;

use std::future::ready;

use axum::response::Response;
use futures_util::future::BoxFuture;

use crate::error::GatewayError;
use crate::http::request::RequestContext;

pub use body::BodyParser;
pub use chain::{framework_stages, ChainBuilder, Pipeline};
pub use cors::CorsStage;
pub use counter::RequestCounter;
pub use error::ErrorStage;
pub use logging::AccessLogger;

/// Result of running one stage.
#[derive(Debug)]
pub enum Outcome {
    /// Pass the request to the next stage.
    Continue,
    /// Stop here and send this response.
    Respond(Response),
    /// Stop here and hand the failure to the error stage.
    Fail(GatewayError),
}

/// One unit of the ordered request pipeline.
pub trait Stage: Send + Sync + 'static {
    /// Name used in debug output.
    fn name(&self) -> &str;

    /// Called for every stage as soon as the request arrives, before any
    /// stage runs. Completion hooks registered here fire even when an
    /// earlier stage answers or fails.
    fn enter(&self, _ctx: &RequestContext) {}

    fn process<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, Outcome>;
}

/// A synchronous stage built from a closure.
pub struct FnStage<F> {
    name: String,
    f: F,
}

impl<F> Stage for FnStage<F>
where
    F: Fn(&mut RequestContext) -> Outcome + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, Outcome> {
        Box::pin(ready((self.f)(ctx)))
    }
}

/// Wrap a closure as a stage.
pub fn stage_fn<F>(name: impl Into<String>, f: F) -> FnStage<F>
where
    F: Fn(&mut RequestContext) -> Outcome + Send + Sync + 'static,
{
    FnStage {
        name: name.into(),
        f,
    }
}
