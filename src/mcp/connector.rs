//! Request/response correlation over a transport
//!
//! A connector wraps one transport and turns it into "send a request, await
//! the matching response". It owns request-ID allocation and, for stream
//! transports, the pending-response table serviced by a background read loop.
//!
//! # Variants
//!
//! - [`StreamConnector`] drives any [`Transport`] (stdio, WebSocket, fake).
//!   In-flight requests live in a `pending` map keyed by `u64` request ID.
//!   Each entry is a `oneshot::Sender` resolved by the read loop when the
//!   matching response arrives, or with a connection error when the
//!   connection ends. A caller that times out removes its own entry.
//! - [`HttpConnector`] drives an [`HttpTransport`]. There is no inbound
//!   stream and no read loop: each request is one POST whose body is the
//!   response.
//!
//! [`Connector`] is the closed set of both, dispatched by `match`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, RouterUseError};
use crate::mcp::transport::http::HttpTransport;
use crate::mcp::transport::{Transport, TransportKind};
use crate::mcp::types::{
    correlation_id, JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    ERROR_INTERNAL, ERROR_METHOD_NOT_FOUND,
};

/// Default timeout applied to every request when the caller does not specify one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The pending-response map type: maps request ID to the oneshot sender.
type PendingMap = HashMap<u64, oneshot::Sender<Result<Value>>>;

/// Lifecycle of a connector. `Released` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    Idle,
    Open,
    Released,
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ---------------------------------------------------------------------------
// Stream connector
// ---------------------------------------------------------------------------

/// Connector for persistent, stream-based transports.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use mcp_router_use::mcp::connector::StreamConnector;
/// use mcp_router_use::mcp::transport::fake::FakeTransport;
/// use mcp_router_use::mcp::transport::TransportKind;
///
/// # #[tokio::main]
/// # async fn main() -> mcp_router_use::Result<()> {
/// let (transport, mut handle) = FakeTransport::new();
/// let connector = StreamConnector::new(transport, TransportKind::Fake)
///     .with_request_timeout(Duration::from_secs(5));
/// connector.connect().await?;
///
/// tokio::spawn(async move {
///     let req = handle.next_outbound_json().await.unwrap();
///     let reply = serde_json::json!({"jsonrpc": "2.0", "id": req["id"], "result": {}});
///     handle.inbound_tx.send(reply.to_string()).unwrap();
///     handle
/// });
///
/// let result = connector.request("ping", serde_json::json!({}), None).await?;
/// assert_eq!(result, serde_json::json!({}));
/// connector.disconnect().await?;
/// # Ok(())
/// # }
/// ```
pub struct StreamConnector {
    transport: Arc<dyn Transport>,
    kind: TransportKind,
    /// Monotonically increasing request ID counter.
    next_id: AtomicU64,
    /// In-flight requests waiting for a response.
    pending: Arc<Mutex<PendingMap>>,
    request_timeout: Duration,
    /// Cancelled once the connection ends, by `disconnect` or by the peer.
    closed: CancellationToken,
    link: Mutex<Link>,
    read_loop: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for StreamConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConnector")
            .field("kind", &self.kind)
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .field("closed", &self.closed.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl StreamConnector {
    /// Wrap `transport`. No I/O happens until [`StreamConnector::connect`].
    pub fn new<T: Transport + 'static>(transport: T, kind: TransportKind) -> Self {
        Self::from_arc(Arc::new(transport), kind)
    }

    /// Wrap an already shared transport.
    pub fn from_arc(transport: Arc<dyn Transport>, kind: TransportKind) -> Self {
        Self {
            transport,
            kind,
            next_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            closed: CancellationToken::new(),
            link: Mutex::new(Link::Idle),
            read_loop: Mutex::new(None),
        }
    }

    /// Override the default per-request deadline.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// The transport variant this connector drives.
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// The deadline used when a request does not supply its own.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Whether the connection is open and has not ended.
    pub fn is_connected(&self) -> bool {
        !self.closed.is_cancelled() && self.transport.is_open()
    }

    /// Number of requests currently awaiting a response.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Open the transport and start the background read loop.
    ///
    /// Calling `connect` on an open connector is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`RouterUseError::Connection`] if the transport cannot open or
    /// the connector was already disconnected. A failed open releases the
    /// transport and leaves the connector disconnected.
    pub async fn connect(&self) -> Result<()> {
        let mut link = self.link.lock().await;
        match *link {
            Link::Open => return Ok(()),
            Link::Released => {
                return Err(RouterUseError::Connection(
                    "connector has been disconnected".into(),
                ))
            }
            Link::Idle => {}
        }

        if let Err(e) = self.transport.open().await {
            tracing::warn!(kind = %self.kind, error = %e, "failed to open transport");
            let _ = self.transport.close().await;
            self.closed.cancel();
            *link = Link::Released;
            return Err(e);
        }

        let handle = start_read_loop(
            Arc::clone(&self.transport),
            Arc::clone(&self.pending),
            self.closed.clone(),
            self.kind,
        );
        *self.read_loop.lock().await = Some(handle);
        *link = Link::Open;
        tracing::debug!(kind = %self.kind, "connector connected");
        Ok(())
    }

    /// Send a JSON-RPC request and await the matching response's `result`.
    ///
    /// # Arguments
    ///
    /// * `method` - The JSON-RPC method name.
    /// * `params` - The `params` object.
    /// * `timeout` - Per-call deadline; defaults to the connector's timeout.
    ///
    /// # Errors
    ///
    /// - [`RouterUseError::Connection`] if not connected, the send fails, or
    ///   the connection ends before the response arrives.
    /// - [`RouterUseError::Timeout`] if the deadline elapses. The connection
    ///   stays usable.
    /// - [`RouterUseError::Remote`] if the server answers with an error.
    pub async fn request(&self, method: &str, params: Value, timeout: Option<Duration>) -> Result<Value> {
        if !self.is_connected() {
            return Err(RouterUseError::Connection(format!(
                "cannot send `{}`: connector is not connected",
                method
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        // Register the pending slot before sending so the response can never
        // arrive before we are ready to receive it.
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let message = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;
        tracing::debug!(kind = %self.kind, id, method, "sending request");

        if let Err(e) = self.transport.send(message).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        let deadline = timeout.unwrap_or(self.request_timeout);
        let outcome = tokio::select! {
            biased;
            outcome = tokio::time::timeout(deadline, rx) => outcome,
            _ = self.closed.cancelled() => {
                self.pending.lock().await.remove(&id);
                return Err(RouterUseError::Connection(format!(
                    "connection closed while awaiting `{}`",
                    method
                )));
            }
        };

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RouterUseError::Connection(format!(
                "connection closed while awaiting `{}`",
                method
            ))),
            Err(_) => {
                // Abandoned locally; a late response is logged and dropped.
                self.pending.lock().await.remove(&id);
                tracing::warn!(kind = %self.kind, id, method, "request timed out");
                Err(RouterUseError::Timeout {
                    method: method.to_string(),
                    timeout_ms: millis(deadline),
                })
            }
        }
    }

    /// Send a JSON-RPC notification (no response expected).
    ///
    /// # Errors
    ///
    /// Returns [`RouterUseError::Connection`] if not connected or the send fails.
    pub async fn notify(&self, method: &str, params: Value) -> Result<()> {
        if !self.is_connected() {
            return Err(RouterUseError::Connection(format!(
                "cannot send `{}`: connector is not connected",
                method
            )));
        }
        let message = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        self.transport.send(message).await
    }

    /// Close the transport and fail every outstanding request with a
    /// connection error. Safe to call at any time, any number of times.
    pub async fn disconnect(&self) -> Result<()> {
        let mut link = self.link.lock().await;
        if *link == Link::Released {
            return Ok(());
        }
        let was_open = *link == Link::Open;
        *link = Link::Released;

        self.closed.cancel();
        if let Err(e) = self.transport.close().await {
            tracing::warn!(kind = %self.kind, error = %e, "error closing transport");
        }
        if let Some(handle) = self.read_loop.lock().await.take() {
            let _ = handle.await;
        }
        let failed = fail_pending(&self.pending, "connection closed").await;
        if was_open {
            tracing::debug!(kind = %self.kind, failed, "connector disconnected");
        }
        Ok(())
    }
}

impl Drop for StreamConnector {
    /// Stop the read loop so it releases the transport. Pending callers see
    /// a connection error.
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

/// Resolve every pending request with a connection error; returns how many.
async fn fail_pending(pending: &Mutex<PendingMap>, reason: &str) -> usize {
    let drained: Vec<_> = pending.lock().await.drain().collect();
    let count = drained.len();
    for (_, tx) in drained {
        let _ = tx.send(Err(RouterUseError::Connection(reason.to_string())));
    }
    count
}

/// Start the read loop as a background Tokio task.
///
/// The loop consumes the transport's inbound stream and dispatches each
/// message:
///
/// - **Response** (has `"id"` and `"result"` or `"error"`): resolves the
///   matching pending sender.
/// - **Server-initiated request** (has `"id"` and `"method"`): answered with
///   JSON-RPC `-32601 Method not found`.
/// - **Notification** (has `"method"` but no `"id"`): logged and dropped.
///
/// When the stream ends the connection is marked closed and every pending
/// request fails with a connection error.
fn start_read_loop(
    transport: Arc<dyn Transport>,
    pending: Arc<Mutex<PendingMap>>,
    closed: CancellationToken,
    kind: TransportKind,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut inbound = transport.receive();
        loop {
            tokio::select! {
                biased;

                _ = closed.cancelled() => break,

                maybe_msg = inbound.next() => {
                    let Some(raw) = maybe_msg else {
                        tracing::info!(kind = %kind, "connection closed by peer");
                        closed.cancel();
                        fail_pending(&pending, "connection closed by peer").await;
                        break;
                    };
                    dispatch_message(&raw, transport.as_ref(), &pending).await;
                }
            }
        }
    })
}

/// Classify and dispatch a single inbound JSON string.
async fn dispatch_message(raw: &str, transport: &dyn Transport, pending: &Mutex<PendingMap>) {
    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "discarding unparsable inbound message");
            return;
        }
    };

    let has_id = value.get("id").is_some_and(|id| !id.is_null());
    let has_method = value.get("method").is_some();
    let has_result = value.get("result").is_some();
    let has_error = value.get("error").is_some();

    if has_id && has_method {
        answer_server_request(&value, transport).await;
    } else if has_id && (has_result || has_error) {
        handle_response(value, pending).await;
    } else if has_method {
        tracing::debug!(
            method = value["method"].as_str().unwrap_or_default(),
            "ignoring server notification"
        );
    } else {
        tracing::warn!(
            has_id,
            has_method,
            has_result,
            has_error,
            "discarding unclassifiable inbound message"
        );
    }
}

/// Resolve a pending request sender with the response value or error.
async fn handle_response(value: Value, pending: &Mutex<PendingMap>) {
    let Some(id) = correlation_id(&value["id"]) else {
        tracing::warn!(id = %value["id"], "discarding response with non-integer id");
        return;
    };

    let Some(tx) = pending.lock().await.remove(&id) else {
        tracing::warn!(id, "discarding response for unknown request id");
        return;
    };

    let outcome = match value.get("error") {
        Some(error_val) => match serde_json::from_value::<JsonRpcError>(error_val.clone()) {
            Ok(e) => Err(RouterUseError::remote(e)),
            Err(_) => Err(RouterUseError::remote(JsonRpcError {
                code: ERROR_INTERNAL,
                message: format!("malformed error object: {error_val}"),
                data: None,
            })),
        },
        None => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
    };

    // The caller may have already timed out.
    let _ = tx.send(outcome);
}

/// Reply to a server-initiated request. The client implements none.
async fn answer_server_request(value: &Value, transport: &dyn Transport) {
    let method = value["method"].as_str().unwrap_or_default();
    tracing::debug!(method, "rejecting server-initiated request");

    let response = JsonRpcResponse {
        jsonrpc: "2.0".to_string(),
        id: value.get("id").cloned(),
        result: None,
        error: Some(JsonRpcError {
            code: ERROR_METHOD_NOT_FOUND,
            message: format!("Method not found: {method}"),
            data: None,
        }),
    };
    match serde_json::to_string(&response) {
        Ok(serialized) => {
            if let Err(e) = transport.send(serialized).await {
                tracing::debug!(error = %e, "failed to answer server request");
            }
        }
        Err(e) => tracing::warn!(error = %e, "failed to serialize server request reply"),
    }
}

// ---------------------------------------------------------------------------
// HTTP connector
// ---------------------------------------------------------------------------

/// Connector for the HTTP endpoint transport.
///
/// Each request is answered inline by its POST, so there is no read loop
/// and no pending table; concurrent requests are simply concurrent POSTs.
#[derive(Debug)]
pub struct HttpConnector {
    transport: HttpTransport,
    next_id: AtomicU64,
    request_timeout: Duration,
    /// Cancelled by `disconnect`; aborts in-flight requests.
    closed: CancellationToken,
    connected: AtomicBool,
    link: Mutex<Link>,
}

impl HttpConnector {
    /// Wrap `transport`. No I/O happens until [`HttpConnector::connect`].
    pub fn new(transport: HttpTransport) -> Self {
        Self {
            transport,
            next_id: AtomicU64::new(1),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            closed: CancellationToken::new(),
            connected: AtomicBool::new(false),
            link: Mutex::new(Link::Idle),
        }
    }

    /// Override the default per-request deadline.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// The wrapped transport.
    pub fn transport(&self) -> &HttpTransport {
        &self.transport
    }

    /// The deadline used when a request does not supply its own.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Whether `connect` succeeded and `disconnect` has not run.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Validate the endpoint. Performs no network I/O.
    ///
    /// # Errors
    ///
    /// Returns [`RouterUseError::Connection`] for an unusable endpoint URL or
    /// a connector that was already disconnected.
    pub async fn connect(&self) -> Result<()> {
        let mut link = self.link.lock().await;
        match *link {
            Link::Open => return Ok(()),
            Link::Released => {
                return Err(RouterUseError::Connection(
                    "connector has been disconnected".into(),
                ))
            }
            Link::Idle => {}
        }
        if let Err(e) = self.transport.open().await {
            self.closed.cancel();
            *link = Link::Released;
            return Err(e);
        }
        self.connected.store(true, Ordering::SeqCst);
        *link = Link::Open;
        tracing::debug!(endpoint = %self.transport.endpoint(), "HTTP connector ready");
        Ok(())
    }

    /// POST a request and decode the response envelope.
    ///
    /// Errors follow [`StreamConnector::request`].
    pub async fn request(&self, method: &str, params: Value, timeout: Option<Duration>) -> Result<Value> {
        if !self.is_connected() {
            return Err(RouterUseError::Connection(format!(
                "cannot send `{}`: connector is not connected",
                method
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let message = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;
        tracing::debug!(id, method, endpoint = %self.transport.endpoint(), "POSTing request");

        let deadline = timeout.unwrap_or(self.request_timeout);
        let body = tokio::select! {
            biased;
            _ = self.closed.cancelled() => {
                return Err(RouterUseError::Connection(format!(
                    "connection closed while awaiting `{}`",
                    method
                )));
            }
            outcome = tokio::time::timeout(deadline, self.transport.exchange(message, Some(id))) => {
                match outcome {
                    Ok(body) => body?,
                    Err(_) => {
                        tracing::warn!(id, method, "request timed out");
                        return Err(RouterUseError::Timeout {
                            method: method.to_string(),
                            timeout_ms: millis(deadline),
                        });
                    }
                }
            }
        };

        let body = body.ok_or_else(|| {
            RouterUseError::Connection(format!("empty HTTP response to `{}`", method))
        })?;
        decode_response(&body, id)
    }

    /// POST a notification; any response body is ignored.
    pub async fn notify(&self, method: &str, params: Value) -> Result<()> {
        if !self.is_connected() {
            return Err(RouterUseError::Connection(format!(
                "cannot send `{}`: connector is not connected",
                method
            )));
        }
        let message = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        self.transport.exchange(message, None).await.map(|_| ())
    }

    /// Abort in-flight requests and end the HTTP session. Idempotent.
    pub async fn disconnect(&self) -> Result<()> {
        let mut link = self.link.lock().await;
        if *link == Link::Released {
            return Ok(());
        }
        *link = Link::Released;
        self.connected.store(false, Ordering::SeqCst);
        self.closed.cancel();
        if let Err(e) = self.transport.close().await {
            tracing::warn!(error = %e, "error closing HTTP transport");
        }
        Ok(())
    }
}

/// Decode a response body into its `result`, checking the correlation ID.
fn decode_response(body: &str, expected_id: u64) -> Result<Value> {
    let response: JsonRpcResponse = serde_json::from_str(body).map_err(|e| {
        RouterUseError::Protocol(format!("malformed JSON-RPC response: {}", e))
    })?;

    let id = response.id.as_ref().and_then(correlation_id);
    if id != Some(expected_id) {
        return Err(RouterUseError::Protocol(format!(
            "response id {:?} does not match request id {}",
            response.id, expected_id
        )));
    }

    match response.error {
        Some(error) => Err(RouterUseError::remote(error)),
        None => Ok(response.result.unwrap_or(Value::Null)),
    }
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// One connector per transport kind.
#[derive(Debug)]
pub enum Connector {
    /// HTTP endpoint; requests answered inline.
    Http(HttpConnector),
    /// Stdio, WebSocket or fake transport serviced by a read loop.
    Stream(StreamConnector),
}

impl Connector {
    /// The transport variant behind this connector.
    pub fn kind(&self) -> TransportKind {
        match self {
            Connector::Http(_) => TransportKind::Http,
            Connector::Stream(c) => c.kind(),
        }
    }

    /// See [`StreamConnector::connect`] and [`HttpConnector::connect`].
    pub async fn connect(&self) -> Result<()> {
        match self {
            Connector::Http(c) => c.connect().await,
            Connector::Stream(c) => c.connect().await,
        }
    }

    /// Send a request and await its result.
    pub async fn request(&self, method: &str, params: Value, timeout: Option<Duration>) -> Result<Value> {
        match self {
            Connector::Http(c) => c.request(method, params, timeout).await,
            Connector::Stream(c) => c.request(method, params, timeout).await,
        }
    }

    /// Send a notification.
    pub async fn notify(&self, method: &str, params: Value) -> Result<()> {
        match self {
            Connector::Http(c) => c.notify(method, params).await,
            Connector::Stream(c) => c.notify(method, params).await,
        }
    }

    /// Close the connection. Idempotent.
    pub async fn disconnect(&self) -> Result<()> {
        match self {
            Connector::Http(c) => c.disconnect().await,
            Connector::Stream(c) => c.disconnect().await,
        }
    }

    /// Whether the connector can currently carry requests.
    pub fn is_connected(&self) -> bool {
        match self {
            Connector::Http(c) => c.is_connected(),
            Connector::Stream(c) => c.is_connected(),
        }
    }
}

impl From<HttpConnector> for Connector {
    fn from(c: HttpConnector) -> Self {
        Connector::Http(c)
    }
}

impl From<StreamConnector> for Connector {
    fn from(c: StreamConnector) -> Self {
        Connector::Stream(c)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
