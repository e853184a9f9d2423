//! Response construction shared by the bridge and the pipeline.
//!
//! # Design Decisions
//! - Strings are sent as `text/plain`, everything else as JSON
//! - Headers collected on the request context are merged last, without
//!   overwriting what the handler set

use std::collections::HashSet;

use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde_json::Value;

/// Serialize a data-layer payload with the given status.
pub fn payload_response(status: StatusCode, payload: Value) -> Response {
    match payload {
        Value::String(text) => (status, text).into_response(),
        Value::Null => status.into_response(),
        other => (status, Json(other)).into_response(),
    }
}

/// Merge stage-provided headers into a response. Headers already present on
/// the response win.
pub fn merge_headers(response: &mut Response, headers: &HeaderMap) {
    let present: HashSet<HeaderName> = response.headers().keys().cloned().collect();
    for (name, value) in headers {
        if !present.contains(name) {
            response.headers_mut().append(name.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::{CONTENT_TYPE, VARY};
    use serde_json::json;

    #[test]
    fn strings_are_plain_text() {
        let response = payload_response(StatusCode::INTERNAL_SERVER_ERROR, json!("not found"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers()[CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/plain"));
    }

    #[test]
    fn objects_are_json() {
        let response = payload_response(StatusCode::OK, json!({"id": 1}));
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
    }

    #[test]
    fn merge_keeps_handler_headers() {
        let mut response = payload_response(StatusCode::OK, json!({}));
        let mut extra = HeaderMap::new();
        extra.insert(CONTENT_TYPE, "text/html".parse().unwrap());
        extra.append(VARY, "Origin".parse().unwrap());
        extra.append(VARY, "Access-Control-Request-Headers".parse().unwrap());
        merge_headers(&mut response, &extra);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(response.headers().get_all(VARY).iter().count(), 2);
    }
}
