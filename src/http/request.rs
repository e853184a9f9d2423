//! Per-request state carried through the pipeline.
//!
//! # Responsibilities
//! - Capture the entry timestamp, request ID and resolved source address
//! - Hold the parsed body once the body stage has run
//! - Collect response headers set by stages before the handler answers
//! - Fire completion hooks exactly once, when the response is done or the
//!   request is abandoned
//!
//! A `RequestContext` is created at request entry and dropped at response
//! completion; it is never shared between requests.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::body::{Body, Bytes, HttpBody};
use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::{request::Parts, HeaderMap, Method, Request, StatusCode};
use http_body::{Frame, SizeHint};
use serde_json::{Map, Value};

use crate::http::X_REQUEST_ID;

/// Request body after the body stage.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedBody {
    Empty,
    Json(Value),
    Form(Map<String, Value>),
    Text(String),
    /// A content type no parser claimed.
    Raw(Bytes),
}

impl ParsedBody {
    /// JSON view of the body as handed to the data layer. Bodies with no
    /// parser (empty or unrecognised) become `{}`.
    pub fn to_value(&self) -> Value {
        match self {
            ParsedBody::Json(value) => value.clone(),
            ParsedBody::Form(map) => Value::Object(map.clone()),
            ParsedBody::Text(text) => Value::String(text.clone()),
            ParsedBody::Empty | ParsedBody::Raw(_) => Value::Object(Map::new()),
        }
    }
}

/// Handler extractor for the parsed body. Yields `Null` when the body stage
/// is disabled.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload(pub Value);

impl<S: Send + Sync> FromRequestParts<S> for Payload {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Payload(
            parts
                .extensions
                .get::<ParsedBody>()
                .map(ParsedBody::to_value)
                .unwrap_or(Value::Null),
        ))
    }
}

/// What completion hooks observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// `None` if the request was abandoned before its response was fully
    /// sent.
    pub status: Option<StatusCode>,
}

type CompletionHook = Box<dyn FnOnce(&Completion) + Send>;

struct CompletionState {
    status: Mutex<Option<StatusCode>>,
    hooks: Mutex<Vec<CompletionHook>>,
}

impl Drop for CompletionState {
    fn drop(&mut self) {
        let completion = Completion {
            status: *self
                .status
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner),
        };
        let hooks = self.hooks.get_mut().unwrap_or_else(PoisonError::into_inner);
        for hook in hooks.drain(..) {
            hook(&completion);
        }
    }
}

/// Shared completion trigger. The last clone to drop fires the hooks; the
/// pipeline hands one clone to the response body so hooks run once the body
/// has been sent or dropped.
#[derive(Clone)]
pub struct CompletionGuard(Arc<CompletionState>);

impl CompletionGuard {
    pub fn new() -> Self {
        Self(Arc::new(CompletionState {
            status: Mutex::new(None),
            hooks: Mutex::new(Vec::new()),
        }))
    }

    pub fn on_complete(&self, hook: impl FnOnce(&Completion) + Send + 'static) {
        self.0
            .hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(hook));
    }

    pub fn set_status(&self, status: StatusCode) {
        *self.0.status.lock().unwrap_or_else(PoisonError::into_inner) = Some(status);
    }

    /// Forget the status: the response never fully reached the client.
    pub fn abandon(&self) {
        *self.0.status.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Response body carrying the request's completion guard.
///
/// The guard is released when the inner body reaches its end. A body dropped
/// before that (the peer closed the connection mid-transfer) marks the
/// request abandoned, unless the response never had a body to send.
pub(crate) struct CompletionBody {
    inner: Body,
    guard: Option<CompletionGuard>,
    bodiless: bool,
}

impl CompletionBody {
    /// `bodiless` responses (HEAD, 204, 304) complete when dropped unread.
    pub(crate) fn new(inner: Body, guard: CompletionGuard, bodiless: bool) -> Self {
        Self {
            inner,
            guard: Some(guard),
            bodiless,
        }
    }
}

impl HttpBody for CompletionBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, axum::Error>>> {
        let polled = Pin::new(&mut self.inner).poll_frame(cx);
        match &polled {
            Poll::Ready(None) => {
                self.guard.take();
            }
            Poll::Ready(Some(Err(_))) => {
                if let Some(guard) = self.guard.take() {
                    guard.abandon();
                }
            }
            _ => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for CompletionBody {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.take() {
            if !self.bodiless && !self.inner.is_end_stream() {
                guard.abandon();
            }
        }
    }
}

impl Default for CompletionGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CompletionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionGuard").finish_non_exhaustive()
    }
}

/// Resolve the client address: forwarded IP (when trusted), then the
/// `X-Real-IP` field (when trusted), then the connection's peer address.
pub fn resolve_source(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> Option<IpAddr> {
    let header_ip = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse::<IpAddr>().ok())
    };
    let forwarded = trust_proxy.then(|| header_ip("x-forwarded-for")).flatten();
    let real_ip = trust_proxy.then(|| header_ip("x-real-ip")).flatten();
    forwarded.or(real_ip).or(peer.map(|p| p.ip()))
}

/// Transient per-request state.
pub struct RequestContext {
    request: Request<Body>,
    method: Method,
    url: String,
    request_id: Option<String>,
    started: Instant,
    source: Option<IpAddr>,
    body: Option<ParsedBody>,
    response_headers: HeaderMap,
    completion: CompletionGuard,
}

impl RequestContext {
    pub fn new(request: Request<Body>, trust_proxy: bool) -> Self {
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let source = resolve_source(request.headers(), peer, trust_proxy);
        let url = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| request.uri().path().to_string());
        let request_id = request
            .headers()
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Self {
            method: request.method().clone(),
            url,
            request_id,
            started: Instant::now(),
            source,
            body: None,
            response_headers: HeaderMap::new(),
            completion: CompletionGuard::new(),
            request,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Path and query as received.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        self.request.headers()
    }

    pub fn request(&self) -> &Request<Body> {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request<Body> {
        &mut self.request
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn source_addr(&self) -> Option<IpAddr> {
        self.source
    }

    /// When the request entered the pipeline.
    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn body(&self) -> Option<&ParsedBody> {
        self.body.as_ref()
    }

    pub fn set_body(&mut self, body: ParsedBody) {
        self.body = Some(body);
    }

    /// Take the raw body stream, leaving an empty one behind.
    pub fn take_body_stream(&mut self) -> Body {
        std::mem::replace(self.request.body_mut(), Body::empty())
    }

    /// Headers merged into whatever response this request ends with.
    pub fn response_headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.response_headers
    }

    pub fn response_headers(&self) -> &HeaderMap {
        &self.response_headers
    }

    /// Run `hook` once the response completes or the request is abandoned.
    pub fn on_complete(&self, hook: impl FnOnce(&Completion) + Send + 'static) {
        self.completion.on_complete(hook);
    }

    /// Move the request out for the route handlers, attaching the parsed body.
    pub(crate) fn take_request(&mut self) -> Request<Body> {
        let mut request = std::mem::replace(&mut self.request, Request::new(Body::empty()));
        if let Some(body) = &self.body {
            request.extensions_mut().insert(body.clone());
        }
        request
    }

    pub(crate) fn completion(&self) -> &CompletionGuard {
        &self.completion
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("request_id", &self.request_id)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}
