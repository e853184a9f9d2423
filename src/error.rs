//! Per-request failures.
//!
//! Every failure raised by a stage or a route handler ends up here and is
//! turned into a terminal response by the error stage. Nothing in this enum
//! escalates beyond the request that produced it.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::hub::BusError;

/// Errors surfaced while handling a single request.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Request body exceeded `body_parser_limit`.
    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    /// Request body could not be read or decoded.
    #[error("malformed request body: {0}")]
    MalformedBody(String),

    /// No data layer is attached to the bus.
    #[error("data layer unavailable: {0}")]
    DataLayerUnavailable(#[from] BusError),

    /// The data layer did not reply in time.
    #[error("data layer did not reply within {0:?}")]
    DataLayerTimeout(Duration),

    /// The data layer dropped the reply without answering.
    #[error("data layer dropped the request without replying")]
    DataLayerDropped,

    /// A failure carrying its own status code.
    #[error("{message}")]
    Status { status: StatusCode, message: String },

    /// Anything else; answered with 500.
    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    pub fn with_status(status: StatusCode, message: impl Into<String>) -> Self {
        GatewayError::Status {
            status,
            message: message.into(),
        }
    }

    /// The status this failure declares, if any.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            GatewayError::PayloadTooLarge { .. } => Some(StatusCode::PAYLOAD_TOO_LARGE),
            GatewayError::MalformedBody(_) => Some(StatusCode::BAD_REQUEST),
            GatewayError::DataLayerUnavailable(_) => Some(StatusCode::SERVICE_UNAVAILABLE),
            GatewayError::DataLayerTimeout(_) => Some(StatusCode::GATEWAY_TIMEOUT),
            GatewayError::Status { status, .. } => Some(*status),
            GatewayError::DataLayerDropped | GatewayError::Internal(_) => None,
        }
    }
}

/// Marker attached to responses produced from a handler's `Err`, so the
/// pipeline hands them to the error stage instead of sending them as-is.
#[derive(Debug, Clone)]
pub struct HandlerFailure(pub Arc<GatewayError>);

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self
            .status_code()
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = status.into_response();
        response
            .extensions_mut()
            .insert(HandlerFailure(Arc::new(self)));
        response
    }
}
