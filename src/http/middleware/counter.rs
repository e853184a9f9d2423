//! Request counter stage.

use std::sync::Arc;

use futures_util::future::BoxFuture;

use super::{Outcome, Stage};
use crate::http::request::RequestContext;
use crate::observability::Stats;

/// Bumps `total_requests` for every request entering the pipeline.
pub struct RequestCounter {
    stats: Arc<Stats>,
}

impl RequestCounter {
    pub fn new(stats: Arc<Stats>) -> Self {
        Self { stats }
    }
}

impl Stage for RequestCounter {
    fn name(&self) -> &str {
        "request-counter"
    }

    fn process<'a>(&'a self, _ctx: &'a mut RequestContext) -> BoxFuture<'a, Outcome> {
        self.stats.record_request();
        Box::pin(async { Outcome::Continue })
    }
}
