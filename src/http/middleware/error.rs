//! Terminal error stage.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::error::GatewayError;
use crate::http::request::RequestContext;
use crate::observability::{AccessLog, ErrorRecord};

/// Converts a failure into a bodiless response with the failure's declared
/// status (500 when it has none), logging it first when logging is enabled.
///
/// It is not a `Stage`: the pipeline holds it in a dedicated slot after the
/// route handlers and only calls it on failure.
pub struct ErrorStage {
    logging: bool,
    log: Arc<dyn AccessLog>,
}

impl ErrorStage {
    pub fn new(logging: bool, log: Arc<dyn AccessLog>) -> Self {
        Self { logging, log }
    }

    pub fn handle(&self, ctx: &RequestContext, error: &GatewayError) -> Response {
        let status = error
            .status_code()
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if self.logging {
            self.log.record_error(&ErrorRecord {
                method: ctx.method().clone(),
                src: ctx.source_addr(),
                url: ctx.url().to_string(),
                status: status.as_u16(),
                error: error.to_string(),
                request_id: ctx.request_id().map(str::to_string),
            });
        }
        status.into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::logging::testing::CollectingLog;
    use axum::body::Body;
    use axum::http::Request;

    fn ctx() -> RequestContext {
        RequestContext::new(Request::builder().uri("/x").body(Body::empty()).unwrap(), false)
    }

    #[test]
    fn uses_declared_status_and_logs() {
        let log = CollectingLog::default();
        let stage = ErrorStage::new(true, Arc::new(log.clone()));
        let response = stage.handle(&ctx(), &GatewayError::with_status(StatusCode::FORBIDDEN, "nope"));
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let errors = log.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error, "nope");
        assert_eq!(errors[0].url, "/x");
    }

    #[test]
    fn falls_back_to_500_without_logging() {
        let log = CollectingLog::default();
        let stage = ErrorStage::new(false, Arc::new(log.clone()));
        let response = stage.handle(&ctx(), &GatewayError::Internal("boom".into()));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(log.errors().is_empty());
    }
}
