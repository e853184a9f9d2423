//! Pipeline assembly and execution.
//!
//! # Responsibilities
//! - Build the framework stages from configuration, in their fixed order
//! - Append user stages in registration order
//! - Run stages, then the route handlers, then the error stage on failure
//! - Merge stage headers into the final response and tie completion hooks
//!   to the response body

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use tower::ServiceExt;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use super::{AccessLogger, BodyParser, CorsStage, ErrorStage, Outcome, RequestCounter, Stage};
use crate::config::GatewayConfig;
use crate::error::HandlerFailure;
use crate::http::request::{CompletionBody, RequestContext};
use crate::http::response::merge_headers;
use crate::observability::{AccessLog, Stats};

/// Stages every gateway runs before user middleware: request counter, CORS
/// (when a policy is set), body parser (when enabled), access logging.
pub fn framework_stages(
    config: &GatewayConfig,
    stats: Arc<Stats>,
    log: Arc<dyn AccessLog>,
) -> Vec<Arc<dyn Stage>> {
    let mut stages: Vec<Arc<dyn Stage>> = vec![Arc::new(RequestCounter::new(stats))];
    if config.cors.is_enabled() {
        stages.push(Arc::new(CorsStage::new(config.cors.clone())));
    }
    if config.enable_body_parser {
        stages.push(Arc::new(BodyParser::new(config.body_parser_limit.as_usize())));
    }
    stages.push(Arc::new(AccessLogger::new(config.logging, log)));
    stages
}

/// Collects stages in order and seals them into a `Pipeline`.
pub struct ChainBuilder {
    stages: Vec<Arc<dyn Stage>>,
}

impl ChainBuilder {
    pub fn new(framework: Vec<Arc<dyn Stage>>) -> Self {
        Self { stages: framework }
    }

    /// Append user stages after everything already registered.
    pub fn with_user<I>(mut self, stages: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Stage>>,
    {
        self.stages.extend(stages);
        self
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name().to_string()).collect()
    }

    /// Seal the chain. The error stage always comes last.
    pub fn finish(self, routes: Router, error: ErrorStage, trust_proxy: bool) -> Pipeline {
        tracing::debug!(stages = ?self.stage_names(), "middleware chain built");
        Pipeline {
            stages: self.stages.into(),
            routes,
            error: Arc::new(error),
            trust_proxy,
        }
    }
}

/// The composed request handler.
#[derive(Clone)]
pub struct Pipeline {
    stages: Arc<[Arc<dyn Stage>]>,
    routes: Router,
    error: Arc<ErrorStage>,
    trust_proxy: bool,
}

impl Pipeline {
    /// Run one request through the chain. Always yields exactly one response.
    pub async fn handle(&self, request: Request<Body>) -> Response {
        let mut ctx = RequestContext::new(request, self.trust_proxy);
        for stage in self.stages.iter() {
            stage.enter(&ctx);
        }

        for stage in self.stages.iter() {
            match stage.process(&mut ctx).await {
                Outcome::Continue => {}
                Outcome::Respond(response) => return self.finish(&ctx, response),
                Outcome::Fail(error) => {
                    tracing::debug!(stage = stage.name(), error = %error, "stage failed");
                    let response = self.error.handle(&ctx, &error);
                    return self.finish(&ctx, response);
                }
            }
        }

        let mut response = match self.routes.clone().oneshot(ctx.take_request()).await {
            Ok(response) => response,
            Err(never) => match never {},
        };
        if let Some(HandlerFailure(error)) = response.extensions_mut().remove::<HandlerFailure>() {
            response = self.error.handle(&ctx, &error);
        }
        self.finish(&ctx, response)
    }

    /// Merge stage headers and hand the completion guard to the body, so
    /// hooks fire once the body is sent or the connection drops.
    fn finish(&self, ctx: &RequestContext, mut response: Response) -> Response {
        merge_headers(&mut response, ctx.response_headers());
        let status = response.status();
        ctx.completion().set_status(status);
        let bodiless = ctx.method() == Method::HEAD
            || status == StatusCode::NO_CONTENT
            || status == StatusCode::NOT_MODIFIED;
        let guard = ctx.completion().clone();
        response.map(|body| Body::new(CompletionBody::new(body, guard, bodiless)))
    }

    /// Wrap the pipeline as a catch-all router with request ID handling.
    pub fn into_router(self) -> Router {
        Router::new()
            .fallback(move |request: Request<Body>| {
                let pipeline = self.clone();
                async move { pipeline.handle(request).await }
            })
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }
}
