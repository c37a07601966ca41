//! HTTP endpoint transport for MCP Router
//!
//! [`HttpTransport`] sends every outbound JSON-RPC message as an HTTP POST
//! to a single endpoint URL. Unlike the stream transports it holds no
//! persistent connection, so it does not implement
//! [`crate::mcp::transport::Transport`]: the answer to a request comes back
//! inline with the POST that carried it, and [`HttpTransport::exchange`]
//! returns it directly.
//!
//! The server may reply with:
//!
//! - `application/json` -- a direct JSON response body
//! - `text/event-stream` -- an SSE body; the event carrying the response
//!   whose `id` matches the request is the answer
//! - `202 Accepted` -- an acknowledgement with no body (notifications)
//!
//! # Session management
//!
//! When a response carries an `Mcp-Session-Id` header the value is stored
//! and echoed on every subsequent POST. [`HttpTransport::close`] issues a
//! best-effort `DELETE` for an active session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::RwLock;

use crate::error::{Result, RouterUseError};
use crate::mcp::types::correlation_id;

/// Session header name used by MCP streamable HTTP servers.
pub const SESSION_HEADER: &str = "Mcp-Session-Id";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP endpoint transport.
///
/// # Examples
///
/// ```no_run
/// use std::collections::HashMap;
/// use mcp_router_use::mcp::transport::http::HttpTransport;
///
/// # #[tokio::main]
/// # async fn main() -> mcp_router_use::Result<()> {
/// let transport = HttpTransport::new(
///     "http://localhost:3282/mcp",
///     HashMap::new(),
///     Some("token".to_string()),
/// )?;
/// transport.open().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct HttpTransport {
    http_client: reqwest::Client,
    endpoint: String,
    headers: HashMap<String, String>,
    auth_token: Option<String>,
    /// Populated from the first response that carries a session header.
    session_id: RwLock<Option<String>>,
    open: AtomicBool,
}

impl HttpTransport {
    /// Construct a transport targeting `endpoint`. No network I/O happens.
    ///
    /// # Errors
    ///
    /// Returns [`RouterUseError::Config`] if the HTTP client cannot be built.
    pub fn new(
        endpoint: impl Into<String>,
        headers: HashMap<String, String>,
        auth_token: Option<String>,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| RouterUseError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            endpoint: endpoint.into(),
            headers,
            auth_token,
            session_id: RwLock::new(None),
            open: AtomicBool::new(false),
        })
    }

    /// The POST target.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Headers added to every request, excluding authorization.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// The bearer token, if any.
    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    /// The session ID the server assigned, if any.
    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    /// Whether `open` has succeeded and `close` has not been called.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Validate the endpoint URL. Performs no network I/O.
    ///
    /// # Errors
    ///
    /// Returns [`RouterUseError::Connection`] if the URL does not parse or
    /// its scheme is not `http`/`https`.
    pub async fn open(&self) -> Result<()> {
        let url = url::Url::parse(&self.endpoint).map_err(|e| {
            RouterUseError::Connection(format!("invalid endpoint URL `{}`: {}", self.endpoint, e))
        })?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(RouterUseError::Connection(format!(
                    "unsupported endpoint scheme `{}` in `{}`",
                    other, self.endpoint
                )))
            }
        }
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn apply_headers(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        if let Some(token) = &self.auth_token {
            req = req.bearer_auth(token);
        }
        req
    }

    /// POST one JSON-RPC message and return the correlated reply.
    ///
    /// `expected_id` is the request ID when `message` is a request, and
    /// `None` for notifications. Returns `Ok(None)` when the server
    /// acknowledged without a body.
    ///
    /// # Errors
    ///
    /// Returns [`RouterUseError::Connection`] if the transport is not open,
    /// the POST fails, the server answers `401`, any other non-2xx status,
    /// or an SSE body ends without the expected response.
    pub async fn exchange(&self, message: String, expected_id: Option<u64>) -> Result<Option<String>> {
        if !self.is_open() {
            return Err(RouterUseError::Connection(
                "HTTP transport is not open".into(),
            ));
        }

        let mut req = self
            .http_client
            .post(self.endpoint.as_str())
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .body(message);
        if let Some(id) = self.session_id.read().await.as_deref() {
            req = req.header(SESSION_HEADER, id);
        }
        req = self.apply_headers(req);

        let response = req
            .send()
            .await
            .map_err(|e| RouterUseError::Connection(format!("HTTP POST failed: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(RouterUseError::Connection(format!(
                "authentication failed for {} (HTTP 401)",
                self.endpoint
            )));
        }
        if !status.is_success() {
            return Err(RouterUseError::Connection(format!(
                "HTTP POST returned status {}",
                status
            )));
        }

        if let Some(new_session_id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
        {
            let mut sid = self.session_id.write().await;
            if sid.as_deref() != Some(new_session_id.as_str()) {
                tracing::debug!(session_id = %new_session_id, "MCP HTTP session established");
                *sid = Some(new_session_id);
            }
        }

        if status == reqwest::StatusCode::ACCEPTED {
            return Ok(None);
        }

        let content_type = response
            .headers()
            .get("Content-Type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.contains("text/event-stream") {
            let reply = read_sse_response(response.bytes_stream(), expected_id).await;
            return match (reply, expected_id) {
                (Some(data), _) => Ok(Some(data)),
                (None, None) => Ok(None),
                (None, Some(id)) => Err(RouterUseError::Connection(format!(
                    "SSE stream ended without a response for request {}",
                    id
                ))),
            };
        }

        let body = response.text().await.map_err(|e| {
            RouterUseError::Connection(format!("failed to read response body: {}", e))
        })?;
        if body.trim().is_empty() {
            Ok(None)
        } else {
            Ok(Some(body))
        }
    }

    /// Terminate the HTTP session, if one is active. Idempotent.
    ///
    /// The `DELETE` is best-effort; failures are logged, not returned.
    pub async fn close(&self) -> Result<()> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let Some(sid) = self.session_id.write().await.take() else {
            return Ok(());
        };

        let req = self
            .http_client
            .delete(self.endpoint.as_str())
            .header(SESSION_HEADER, sid.as_str())
            .timeout(Duration::from_secs(5));
        match self.apply_headers(req).send().await {
            Ok(resp) => {
                tracing::debug!(status = %resp.status(), "MCP HTTP session terminated");
            }
            Err(e) => {
                tracing::debug!(error = %e, "MCP HTTP session DELETE failed");
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SSE parser
// ---------------------------------------------------------------------------

/// One parsed server-sent event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseEvent {
    /// The `event:` field, if present.
    pub event: Option<String>,
    /// The `id:` field, if present.
    pub id: Option<String>,
    /// All `data:` lines joined with `\n`.
    pub data: String,
}

/// Parse a single SSE event block (the text between two blank lines).
///
/// Returns `None` for comment-only blocks, `ping` events, and `[PING]` data.
pub fn parse_sse_event(event_block: &str) -> Option<SseEvent> {
    let mut event = SseEvent::default();
    let mut data_lines: Vec<&str> = Vec::new();

    for line in event_block.lines() {
        if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.trim());
        } else if let Some(value) = line.strip_prefix("id:") {
            event.id = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("event:") {
            event.event = Some(value.trim().to_string());
        }
        // `retry:` and `:` comment lines are ignored.
    }

    if event
        .event
        .as_deref()
        .is_some_and(|et| et.eq_ignore_ascii_case("ping"))
    {
        return None;
    }

    event.data = data_lines.join("\n");
    if event.data.is_empty() || event.data.eq_ignore_ascii_case("[ping]") {
        return None;
    }
    Some(event)
}

/// Consume an SSE body until the response for `expected_id` arrives.
///
/// Events that are not the awaited response (server notifications or
/// requests) are logged and dropped. With `expected_id == None` the first
/// data event is returned.
pub async fn read_sse_response(
    byte_stream: impl Stream<Item = reqwest::Result<Bytes>>,
    expected_id: Option<u64>,
) -> Option<String> {
    // Raw bytes: chunk boundaries may split a UTF-8 sequence or a CRLF.
    let mut buffer: Vec<u8> = Vec::new();
    tokio::pin!(byte_stream);

    loop {
        while let Some(pos) = find_block_end(&buffer) {
            let block: Vec<u8> = buffer.drain(..pos + 2).collect();
            if let Some(found) = decode_block(&block).and_then(|b| match_event(&b, expected_id)) {
                return Some(found);
            }
        }

        match byte_stream.next().await {
            Some(Ok(chunk)) => {
                buffer.extend_from_slice(&chunk);
                normalize_crlf(&mut buffer);
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "SSE stream read failed");
                break;
            }
            None => break,
        }
    }

    match decode_block(&buffer) {
        Some(rest) if !rest.trim().is_empty() => match_event(&rest, expected_id),
        _ => None,
    }
}

/// Offset of the first blank-line separator (`\n\n`) in `buffer`.
fn find_block_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

/// Collapse every `\r\n` into `\n`. A trailing `\r` is kept until the
/// next chunk shows what follows it.
fn normalize_crlf(buffer: &mut Vec<u8>) {
    let mut write = 0;
    for read in 0..buffer.len() {
        if buffer[read] == b'\r' && buffer.get(read + 1) == Some(&b'\n') {
            continue;
        }
        buffer[write] = buffer[read];
        write += 1;
    }
    buffer.truncate(write);
}

fn decode_block(block: &[u8]) -> Option<String> {
    match std::str::from_utf8(block) {
        Ok(text) => Some(text.to_string()),
        Err(e) => {
            tracing::warn!(error = %e, "discarding non-UTF-8 SSE event");
            None
        }
    }
}

fn match_event(block: &str, expected_id: Option<u64>) -> Option<String> {
    let event = parse_sse_event(block)?;
    let Some(expected) = expected_id else {
        return Some(event.data);
    };
    let is_answer = serde_json::from_str::<serde_json::Value>(&event.data)
        .ok()
        .filter(|v| v.get("method").is_none())
        .and_then(|v| v.get("id").and_then(correlation_id))
        == Some(expected);
    if is_answer {
        Some(event.data)
    } else {
        tracing::debug!(data = %event.data, "dropping unrelated SSE event");
        None
    }
}
