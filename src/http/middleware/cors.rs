//! CORS policy stage.
//!
//! Annotates responses according to the configured origin policy. Credentials
//! are always allowed, so an allowed origin is echoed back verbatim rather
//! than answered with a literal `*`. Preflight requests are answered here with
//! `204 No Content`; nothing is ever rejected.

use axum::http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_REQUEST_HEADERS, ACCESS_CONTROL_REQUEST_METHOD,
    CONTENT_LENGTH, ORIGIN, VARY,
};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::IntoResponse;
use futures_util::future::BoxFuture;

use super::{Outcome, Stage};
use crate::config::CorsPolicy;
use crate::http::request::RequestContext;

const ALLOWED_METHODS: &str = "GET,HEAD,PUT,PATCH,POST,DELETE";

pub struct CorsStage {
    policy: CorsPolicy,
    /// Pre-validated header value for `CorsPolicy::Origin`.
    fixed_origin: Option<HeaderValue>,
}

impl CorsStage {
    pub fn new(policy: CorsPolicy) -> Self {
        tracing::info!(policy = %policy, "using CORS");
        if policy == CorsPolicy::Any {
            tracing::warn!(
                "CORS wildcard policy with credentials enabled reflects every request origin"
            );
        }
        let fixed_origin = match &policy {
            CorsPolicy::Origin(origin) => match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin = %origin, "CORS origin is not a valid header value; ignoring");
                    None
                }
            },
            _ => None,
        };
        Self {
            policy,
            fixed_origin,
        }
    }

    /// The `Access-Control-Allow-Origin` value for a request, if any.
    fn allowed_origin(&self, request_origin: Option<&HeaderValue>) -> Option<HeaderValue> {
        match &self.policy {
            CorsPolicy::Disabled => None,
            CorsPolicy::Any => request_origin.cloned(),
            CorsPolicy::Origin(_) => self.fixed_origin.clone(),
            CorsPolicy::List(origins) => request_origin
                .filter(|o| origins.iter().any(|allowed| o.as_bytes() == allowed.as_bytes()))
                .cloned(),
        }
    }
}

impl Stage for CorsStage {
    fn name(&self) -> &str {
        "cors"
    }

    fn process<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            if !self.policy.is_enabled() {
                return Outcome::Continue;
            }

            let request_origin = ctx.headers().get(ORIGIN).cloned();
            let requested_headers = ctx.headers().get(ACCESS_CONTROL_REQUEST_HEADERS).cloned();
            let preflight = ctx.method() == Method::OPTIONS
                && ctx.headers().contains_key(ACCESS_CONTROL_REQUEST_METHOD);

            let headers = ctx.response_headers_mut();
            headers.append(VARY, HeaderValue::from_static("Origin"));
            if let Some(origin) = self.allowed_origin(request_origin.as_ref()) {
                headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
                headers.insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
            }

            if !preflight {
                return Outcome::Continue;
            }

            headers.insert(
                ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static(ALLOWED_METHODS),
            );
            if let Some(requested) = requested_headers {
                headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, requested);
                headers.append(VARY, HeaderValue::from_static("Access-Control-Request-Headers"));
            }
            headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
            Outcome::Respond(StatusCode::NO_CONTENT.into_response())
        })
    }
}
