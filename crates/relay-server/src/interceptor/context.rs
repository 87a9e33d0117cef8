//! Per-call context shared by interceptors and handlers.

use axum::http::HeaderMap;
use parking_lot::Mutex;
use relay_core::ids::RequestId;
use relay_core::sse::LAST_EVENT_ID_HEADER;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::rpc::ProcedureKind;

/// Everything known about one inbound call besides its input value.
///
/// Interceptors receive `&CallContext` and can leave values for inner
/// interceptors and the handler with [`set`](Self::set).
#[derive(Debug)]
pub struct CallContext {
    request_id: RequestId,
    procedure: String,
    kind: ProcedureKind,
    headers: HeaderMap,
    last_event_id: String,
    cancel: CancellationToken,
    values: Mutex<Map<String, Value>>,
}

impl CallContext {
    /// Create a context for a call to `procedure`.
    pub fn new(procedure: impl Into<String>, kind: ProcedureKind, cancel: CancellationToken) -> Self {
        Self {
            request_id: RequestId::new(),
            procedure: procedure.into(),
            kind,
            headers: HeaderMap::new(),
            last_event_id: String::new(),
            cancel,
            values: Mutex::new(Map::new()),
        }
    }

    /// Attach the request headers. Picks up `Last-Event-ID` when present.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.last_event_id = headers
            .get(LAST_EVENT_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        self.headers = headers;
        self
    }

    /// Unique id of this call.
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Name of the procedure being called.
    pub fn procedure(&self) -> &str {
        &self.procedure
    }

    /// Kind of the procedure being called.
    pub fn kind(&self) -> ProcedureKind {
        self.kind
    }

    /// Inbound request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// A single header as UTF-8, if present and valid.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Client-supplied resumption hint, empty when none was sent.
    pub fn last_event_id(&self) -> &str {
        &self.last_event_id
    }

    /// Token cancelled when the client goes away or the server shuts down.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the call has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Store a value for later interceptors and the handler.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        let _ = self.values.lock().insert(key.into(), value);
    }

    /// Read a value stored with [`set`](Self::set).
    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.lock().get(key).cloned()
    }
}
