//! Body parsing stage.
//!
//! Reads the request body up to the configured limit and decodes it by
//! content type: JSON (`application/json`, `*+json`), urlencoded forms and
//! `text/*`. Anything else is kept as raw bytes.

use axum::body::{to_bytes, Bytes};
use axum::http::header::CONTENT_TYPE;
use futures_util::future::BoxFuture;
use http_body_util::LengthLimitError;
use serde_json::{Map, Value};

use super::{Outcome, Stage};
use crate::error::GatewayError;
use crate::http::request::{ParsedBody, RequestContext};

pub struct BodyParser {
    limit: usize,
}

impl BodyParser {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }

    async fn read(&self, ctx: &mut RequestContext) -> Result<Bytes, GatewayError> {
        to_bytes(ctx.take_body_stream(), self.limit)
            .await
            .map_err(|e| {
                if exceeded_limit(&e) {
                    GatewayError::PayloadTooLarge { limit: self.limit }
                } else {
                    GatewayError::MalformedBody(e.to_string())
                }
            })
    }
}

/// Whether a body read stopped at the size limit rather than on a transport
/// error.
fn exceeded_limit(error: &axum::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(error);
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return true;
        }
        source = e.source();
    }
    false
}

/// Media type without parameters, lowercased.
fn media_type(ctx: &RequestContext) -> Option<String> {
    ctx.headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase())
}

/// Decode `bytes` according to `media_type`.
pub fn parse_body(media_type: Option<&str>, bytes: Bytes) -> Result<ParsedBody, GatewayError> {
    if bytes.is_empty() {
        return Ok(ParsedBody::Empty);
    }
    match media_type {
        Some(mt) if mt == "application/json" || mt.ends_with("+json") => {
            serde_json::from_slice(&bytes)
                .map(ParsedBody::Json)
                .map_err(|e| GatewayError::MalformedBody(e.to_string()))
        }
        Some("application/x-www-form-urlencoded") => Ok(ParsedBody::Form(parse_form(&bytes))),
        Some(mt) if mt.starts_with("text/") => {
            Ok(ParsedBody::Text(String::from_utf8_lossy(&bytes).into_owned()))
        }
        _ => Ok(ParsedBody::Raw(bytes)),
    }
}

/// Repeated keys collect into an array.
fn parse_form(bytes: &[u8]) -> Map<String, Value> {
    let mut map = Map::new();
    for (key, value) in url::form_urlencoded::parse(bytes) {
        let value = Value::String(value.into_owned());
        match map.get_mut(key.as_ref()) {
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                map.insert(key.into_owned(), value);
            }
        }
    }
    map
}

impl Stage for BodyParser {
    fn name(&self) -> &str {
        "body-parser"
    }

    fn process<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            let media_type = media_type(ctx);
            let parsed = match self.read(ctx).await {
                Ok(bytes) => parse_body(media_type.as_deref(), bytes),
                Err(e) => Err(e),
            };
            match parsed {
                Ok(body) => {
                    ctx.set_body(body);
                    Outcome::Continue
                }
                Err(e) => Outcome::Fail(e),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::json;

    fn ctx(content_type: &str, body: &'static str) -> RequestContext {
        let request = Request::builder()
            .method("POST")
            .uri("/widgets")
            .header(CONTENT_TYPE, content_type)
            .body(Body::from(body))
            .unwrap();
        RequestContext::new(request, false)
    }

    #[tokio::test]
    async fn parses_json() {
        let mut c = ctx("application/json; charset=utf-8", r#"{"a":1}"#);
        assert!(matches!(BodyParser::new(1024).process(&mut c).await, Outcome::Continue));
        assert_eq!(c.body(), Some(&ParsedBody::Json(json!({"a": 1}))));
    }

    #[tokio::test]
    async fn parses_forms_and_text() {
        let mut form = ctx("application/x-www-form-urlencoded", "a=1&b=x+y&a=2");
        BodyParser::new(1024).process(&mut form).await;
        assert_eq!(
            form.body().unwrap().to_value(),
            json!({"a": ["1", "2"], "b": "x y"})
        );

        let mut text = ctx("text/plain", "hello");
        BodyParser::new(1024).process(&mut text).await;
        assert_eq!(text.body(), Some(&ParsedBody::Text("hello".into())));
    }

    #[tokio::test]
    async fn rejects_oversized_body() {
        let mut c = ctx("application/json", r#"{"a":"0123456789"}"#);
        match BodyParser::new(8).process(&mut c).await {
            Outcome::Fail(GatewayError::PayloadTooLarge { limit }) => assert_eq!(limit, 8),
            other => panic!("expected payload too large, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn rejects_oversized_chunked_body() {
        let chunks = futures_util::stream::iter(
            ["0123", "4567", "89ab"].map(|chunk| Ok::<_, std::io::Error>(Bytes::from_static(chunk.as_bytes()))),
        );
        let request = Request::post("/widgets")
            .header(CONTENT_TYPE, "text/plain")
            .body(Body::from_stream(chunks))
            .unwrap();
        let mut c = RequestContext::new(request, false);
        assert!(matches!(
            BodyParser::new(6).process(&mut c).await,
            Outcome::Fail(GatewayError::PayloadTooLarge { limit: 6 })
        ));
    }

    #[tokio::test]
    async fn malformed_json_fails() {
        let mut c = ctx("application/json", "{nope");
        assert!(matches!(
            BodyParser::new(1024).process(&mut c).await,
            Outcome::Fail(GatewayError::MalformedBody(_))
        ));
    }

    #[test]
    fn unknown_types_stay_raw() {
        let parsed = parse_body(Some("application/octet-stream"), Bytes::from_static(b"\x00\x01"));
        assert!(matches!(parsed, Ok(ParsedBody::Raw(_))));
        assert_eq!(parse_body(None, Bytes::new()).unwrap(), ParsedBody::Empty);
    }
}
