//! Access logging stage.

use std::sync::Arc;

use futures_util::future::BoxFuture;

use super::{Outcome, Stage};
use crate::http::request::RequestContext;
use crate::observability::metrics::record_duration;
use crate::observability::{AccessLog, AccessRecord};

/// Writes one access record per request once its response completes (or the
/// connection is dropped). Never holds the request back.
pub struct AccessLogger {
    enabled: bool,
    log: Arc<dyn AccessLog>,
}

impl AccessLogger {
    pub fn new(enabled: bool, log: Arc<dyn AccessLog>) -> Self {
        Self { enabled, log }
    }
}

impl Stage for AccessLogger {
    fn name(&self) -> &str {
        "access-log"
    }

    fn enter(&self, ctx: &RequestContext) {
        if !self.enabled {
            return;
        }
        let started = ctx.started();
        let log = Arc::clone(&self.log);
        let method = ctx.method().clone();
        let src = ctx.source_addr();
        let url = ctx.url().to_string();
        let request_id = ctx.request_id().map(str::to_string);

        ctx.on_complete(move |completion| {
            let elapsed = started.elapsed();
            let status = completion.status.map(|s| s.as_u16());
            record_duration(method.as_str(), status, elapsed);
            log.record_access(&AccessRecord {
                method,
                src,
                url,
                status,
                elapsed_ms: elapsed.as_secs_f64() * 1e3,
                request_id,
            });
        });
    }

    fn process<'a>(&'a self, _ctx: &'a mut RequestContext) -> BoxFuture<'a, Outcome> {
        Box::pin(async { Outcome::Continue })
    }
}
