//! WebSocket transport for MCP servers
//!
//! [`WebSocketTransport`] keeps one persistent WebSocket connection open and
//! carries exactly one JSON-RPC message per text frame. Headers and the
//! optional bearer token are attached to the upgrade request.
//!
//! On `open` the socket is split into a writer task (fed by an unbounded
//! channel) and a reader task that forwards text frames to the inbound
//! stream. The stream ends when the server closes the socket, the read side
//! errors, or `close` is called.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;

use crate::error::{Result, RouterUseError};
use crate::mcp::transport::{receiver_stream, SharedReceiver, Transport};

/// How long `close()` waits for the writer task to flush the close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Persistent WebSocket MCP transport.
#[derive(Debug)]
pub struct WebSocketTransport {
    url: String,
    headers: HashMap<String, String>,
    auth_token: Option<String>,
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    inbound_rx: SharedReceiver,
    outbound_tx: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    opened: AtomicBool,
    open: Arc<AtomicBool>,
}

impl WebSocketTransport {
    /// Describe a WebSocket endpoint; nothing is connected until `open`.
    ///
    /// # Arguments
    ///
    /// * `url` - A `ws://` or `wss://` URL.
    /// * `headers` - Extra headers for the upgrade request.
    /// * `auth_token` - Sent as `Authorization: Bearer <token>` when present.
    pub fn new(
        url: impl Into<String>,
        headers: HashMap<String, String>,
        auth_token: Option<String>,
    ) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
        Self {
            url: url.into(),
            headers,
            auth_token,
            inbound_tx: Mutex::new(Some(inbound_tx)),
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            outbound_tx: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            opened: AtomicBool::new(false),
            open: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Headers sent on the upgrade request, excluding authorization.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// The bearer token, if any.
    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    fn build_request(
        &self,
    ) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request> {
        let mut request = self.url.as_str().into_client_request().map_err(|e| {
            RouterUseError::Config(format!("invalid WebSocket URL `{}`: {}", self.url, e))
        })?;

        let headers = request.headers_mut();
        for (key, value) in &self.headers {
            let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                RouterUseError::Config(format!("invalid header name `{}`: {}", key, e))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                RouterUseError::Config(format!("invalid value for header `{}`: {}", key, e))
            })?;
            headers.insert(name, value);
        }
        if let Some(token) = &self.auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| RouterUseError::Config(format!("invalid auth token: {}", e)))?;
            headers.insert(
                tokio_tungstenite::tungstenite::http::header::AUTHORIZATION,
                value,
            );
        }
        Ok(request)
    }
}

#[async_trait::async_trait]
impl Transport for WebSocketTransport {
    /// Perform the WebSocket handshake and start the reader/writer tasks.
    ///
    /// # Errors
    ///
    /// Returns [`RouterUseError::Config`] for a malformed URL or header and
    /// [`RouterUseError::Connection`] if the handshake fails.
    async fn open(&self) -> Result<()> {
        if self.open.load(Ordering::SeqCst) {
            return Ok(());
        }
        if self.opened.load(Ordering::SeqCst) {
            return Err(RouterUseError::Connection(
                "WebSocket transport cannot be reopened after close".into(),
            ));
        }

        let request = self.build_request()?;
        tracing::info!(url = %self.url, "connecting to MCP WebSocket endpoint");

        let (ws, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| {
                RouterUseError::Connection(format!(
                    "WebSocket handshake with {} failed: {}",
                    self.url, e
                ))
            })?;

        let inbound_tx = self.inbound_tx.lock().await.take().ok_or_else(|| {
            RouterUseError::Connection("WebSocket transport cannot be reopened after close".into())
        })?;

        let (mut sink, mut stream) = ws.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

        // Writer task: outbound channel -> socket. A Close frame ends it.
        let writer = tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                let is_close = matches!(msg, Message::Close(_));
                if let Err(e) = sink.send(msg).await {
                    tracing::debug!(error = %e, "WebSocket write failed");
                    break;
                }
                if is_close {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // Reader task: socket -> inbound channel.
        let open = Arc::clone(&self.open);
        let url = self.url.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if inbound_tx.send(text).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => {
                            if inbound_tx.send(text).is_err() {
                                break;
                            }
                        }
                        Err(_) => {
                            tracing::warn!(url = %url, "discarding non-UTF-8 binary frame");
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        tracing::debug!(url = %url, ?frame, "WebSocket closed by server");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(url = %url, error = %e, "WebSocket read failed");
                        break;
                    }
                }
            }
            open.store(false, Ordering::SeqCst);
        });

        *self.outbound_tx.lock().await = Some(outbound_tx);
        self.tasks.lock().await.extend([writer, reader]);
        self.opened.store(true, Ordering::SeqCst);
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Send one JSON-RPC message as a text frame.
    async fn send(&self, message: String) -> Result<()> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(RouterUseError::Connection(
                "WebSocket transport is not open".into(),
            ));
        }
        let guard = self.outbound_tx.lock().await;
        let tx = guard.as_ref().ok_or_else(|| {
            RouterUseError::Connection("WebSocket transport is not open".into())
        })?;
        tx.send(Message::Text(message)).map_err(|e| {
            RouterUseError::Connection(format!("WebSocket writer closed: {}", e))
        })
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        receiver_stream(Arc::clone(&self.inbound_rx))
    }

    /// Send a close frame and stop both background tasks. Idempotent.
    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        self.opened.store(true, Ordering::SeqCst);
        self.inbound_tx.lock().await.take();

        if let Some(tx) = self.outbound_tx.lock().await.take() {
            let _ = tx.send(Message::Close(None));
        }

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        let mut tasks = tasks.into_iter();
        if let Some(writer) = tasks.next() {
            if tokio::time::timeout(CLOSE_GRACE, writer).await.is_err() {
                tracing::debug!(url = %self.url, "WebSocket writer did not finish in time");
            }
        }
        // Aborting the reader drops its sender, which ends the inbound stream.
        for task in tasks {
            task.abort();
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
