//! CRUD-to-event bridge.
//!
//! # Routes
//! ```text
//! POST   /path        → create(name, body)
//! GET    /path        → read(name, {})
//! POST   /path/query  → read(name, body)
//! GET    /path/{id}   → read(name, id)
//! PUT    /path/{id}   → update(name, id, body)
//! DELETE /path/{id}   → delete(name, id)
//! ```
//!
//! Each request becomes one `DataEnvelope` on the bus. In `await` mode the
//! handler suspends on the reply handle until the data layer answers or the
//! bridge timeout passes; in `acknowledge` mode it answers `202` right away.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::{BridgeConfig, BridgeMode};
use crate::error::GatewayError;
use crate::http::request::Payload;
use crate::http::response::payload_response;
use crate::http::server::route_key;
use crate::hub::{Bus, DataEnvelope, DataOp, DataRequest, ReadSelector, ReplyError};

/// A logical entity exposed over CRUD routes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ResourceDescriptor {
    pub name: String,
    pub path: String,
}

/// Why a descriptor was not registered.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BridgeError {
    #[error("resource descriptor has no name")]
    MissingName,
    #[error("resource descriptor has no path")]
    MissingPath,
    #[error("resource path {0} may not contain route parameters")]
    InvalidPath(String),
    #[error("route {0} is already bound")]
    Overlap(String),
}

/// One verb/path pair a descriptor expands to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteBinding {
    pub method: Method,
    pub path: String,
    pub op: DataOp,
}

impl fmt::Display for RouteBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} -> {}", self.method, self.path, self.op)
    }
}

impl ResourceDescriptor {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.name.trim().is_empty() {
            return Err(BridgeError::MissingName);
        }
        if self.path.trim().is_empty() {
            return Err(BridgeError::MissingPath);
        }
        if self.path.contains(['{', '}', '*']) {
            return Err(BridgeError::InvalidPath(self.path.clone()));
        }
        Ok(())
    }

    /// Collection path with a leading slash and no trailing slash.
    pub fn base_path(&self) -> String {
        let trimmed = self.path.trim().trim_matches('/');
        format!("/{}", trimmed)
    }

    fn sub_path(&self, suffix: &str) -> String {
        let base = self.base_path();
        if base == "/" {
            format!("/{}", suffix)
        } else {
            format!("{}/{}", base, suffix)
        }
    }

    /// Whether any of this descriptor's routes answers at `path`.
    pub fn binds(&self, path: &str) -> bool {
        let key = route_key(path);
        self.bindings().iter().any(|b| route_key(&b.path) == key)
    }

    /// Every route this descriptor binds.
    pub fn bindings(&self) -> Vec<RouteBinding> {
        let collection = self.base_path();
        let query = self.sub_path("query");
        let item = self.sub_path("{id}");
        let bind = |method: Method, path: &str, op: DataOp| RouteBinding {
            method,
            path: path.to_string(),
            op,
        };
        vec![
            bind(Method::POST, &collection, DataOp::Create),
            bind(Method::GET, &collection, DataOp::Read),
            bind(Method::POST, &query, DataOp::Read),
            bind(Method::GET, &item, DataOp::Read),
            bind(Method::PUT, &item, DataOp::Update),
            bind(Method::DELETE, &item, DataOp::Delete),
        ]
    }
}

/// Turns HTTP requests into data-layer requests and relays the replies.
pub struct CrudBridge {
    bus: Arc<dyn Bus>,
    mode: BridgeMode,
    timeout: Duration,
}

impl CrudBridge {
    pub fn new(bus: Arc<dyn Bus>, config: &BridgeConfig) -> Self {
        Self {
            bus,
            mode: config.mode,
            timeout: config.timeout(),
        }
    }

    /// Router serving one resource. The descriptor must already be valid.
    pub fn routes(self: &Arc<Self>, descriptor: &ResourceDescriptor) -> Router {
        let state = ResourceState {
            name: Arc::from(descriptor.name.as_str()),
            bridge: Arc::clone(self),
        };
        for binding in descriptor.bindings() {
            tracing::debug!(resource = %descriptor.name, route = %binding, "bridging route");
        }
        Router::new()
            .route(&descriptor.base_path(), post(create).get(read_all))
            .route(&descriptor.sub_path("query"), post(read_query))
            .route(
                &descriptor.sub_path("{id}"),
                get(read_one).put(update).delete(remove),
            )
            .with_state(state)
    }

    /// Send `request` to the data layer and build the HTTP answer.
    pub async fn call(&self, request: DataRequest) -> Result<Response, GatewayError> {
        let op = request.op();
        let resource = request.resource().to_string();
        let (envelope, reply) = DataEnvelope::new(request);
        self.bus.dispatch(envelope)?;

        if self.mode == BridgeMode::Acknowledge {
            return Ok(StatusCode::ACCEPTED.into_response());
        }

        match reply.wait(self.timeout).await {
            Ok(Ok(document)) => Ok(payload_response(StatusCode::OK, document)),
            Ok(Err(error)) => {
                tracing::debug!(resource = %resource, op = %op, error = %error, "data layer reported an error");
                Ok(payload_response(StatusCode::INTERNAL_SERVER_ERROR, error))
            }
            Err(ReplyError::TimedOut) => Err(GatewayError::DataLayerTimeout(self.timeout)),
            Err(ReplyError::Dropped) => Err(GatewayError::DataLayerDropped),
        }
    }
}

#[derive(Clone)]
struct ResourceState {
    name: Arc<str>,
    bridge: Arc<CrudBridge>,
}

impl ResourceState {
    fn resource(&self) -> String {
        self.name.to_string()
    }
}

async fn create(
    State(state): State<ResourceState>,
    Payload(body): Payload,
) -> Result<Response, GatewayError> {
    let request = DataRequest::Create {
        resource: state.resource(),
        body,
    };
    state.bridge.call(request).await
}

async fn read_all(State(state): State<ResourceState>) -> Result<Response, GatewayError> {
    let request = DataRequest::Read {
        resource: state.resource(),
        selector: ReadSelector::Query(Value::Object(Map::new())),
    };
    state.bridge.call(request).await
}

async fn read_query(
    State(state): State<ResourceState>,
    Payload(query): Payload,
) -> Result<Response, GatewayError> {
    let request = DataRequest::Read {
        resource: state.resource(),
        selector: ReadSelector::Query(query),
    };
    state.bridge.call(request).await
}

async fn read_one(
    State(state): State<ResourceState>,
    Path(id): Path<String>,
) -> Result<Response, GatewayError> {
    let request = DataRequest::Read {
        resource: state.resource(),
        selector: ReadSelector::Id(id),
    };
    state.bridge.call(request).await
}

async fn update(
    State(state): State<ResourceState>,
    Path(id): Path<String>,
    Payload(body): Payload,
) -> Result<Response, GatewayError> {
    let request = DataRequest::Update {
        resource: state.resource(),
        id,
        body,
    };
    state.bridge.call(request).await
}

async fn remove(
    State(state): State<ResourceState>,
    Path(id): Path<String>,
) -> Result<Response, GatewayError> {
    let request = DataRequest::Delete {
        resource: state.resource(),
        id,
    };
    state.bridge.call(request).await
}
