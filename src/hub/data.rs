//! Typed requests to the data layer and their single-use replies.

use std::fmt;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;

/// Outcome reported by the data layer: `Ok(document)` or `Err(error payload)`.
pub type DataResult = Result<Value, Value>;

/// The four generic operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataOp {
    Create,
    Read,
    Update,
    Delete,
}

impl fmt::Display for DataOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataOp::Create => "create",
            DataOp::Read => "read",
            DataOp::Update => "update",
            DataOp::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// What a read targets.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadSelector {
    /// Documents matching a query object; `{}` matches everything.
    Query(Value),
    /// A single document by id.
    Id(String),
}

/// A request for the data layer, tagged with the resource name.
#[derive(Debug, Clone, PartialEq)]
pub enum DataRequest {
    Create { resource: String, body: Value },
    Read { resource: String, selector: ReadSelector },
    Update { resource: String, id: String, body: Value },
    Delete { resource: String, id: String },
}

impl DataRequest {
    pub fn op(&self) -> DataOp {
        match self {
            DataRequest::Create { .. } => DataOp::Create,
            DataRequest::Read { .. } => DataOp::Read,
            DataRequest::Update { .. } => DataOp::Update,
            DataRequest::Delete { .. } => DataOp::Delete,
        }
    }

    pub fn resource(&self) -> &str {
        match self {
            DataRequest::Create { resource, .. }
            | DataRequest::Read { resource, .. }
            | DataRequest::Update { resource, .. }
            | DataRequest::Delete { resource, .. } => resource,
        }
    }
}

/// Sending half of a request's result channel. Consumed on use, so the
/// data layer can answer at most once.
#[derive(Debug)]
pub struct Reply(oneshot::Sender<DataResult>);

impl Reply {
    /// Deliver the result. Returns false if the requester is gone.
    pub fn send(self, result: DataResult) -> bool {
        self.0.send(result).is_ok()
    }

    pub fn ok(self, document: Value) -> bool {
        self.send(Ok(document))
    }

    pub fn err(self, error: impl Into<Value>) -> bool {
        self.send(Err(error.into()))
    }
}

/// Why a reply never arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyError {
    TimedOut,
    Dropped,
}

/// Receiving half of a request's result channel.
#[derive(Debug)]
pub struct ReplyHandle(oneshot::Receiver<DataResult>);

impl ReplyHandle {
    /// Wait for the reply, giving up after `timeout`.
    pub async fn wait(self, timeout: Duration) -> Result<DataResult, ReplyError> {
        match tokio::time::timeout(timeout, self.0).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(ReplyError::Dropped),
            Err(_) => Err(ReplyError::TimedOut),
        }
    }
}

/// A request travelling over the bus together with its reply channel.
#[derive(Debug)]
pub struct DataEnvelope {
    pub request: DataRequest,
    pub reply: Reply,
}

impl DataEnvelope {
    pub fn new(request: DataRequest) -> (Self, ReplyHandle) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                request,
                reply: Reply(tx),
            },
            ReplyHandle(rx),
        )
    }
}
