//! In-process fake transport for MCP tests
//!
//! This module provides [`FakeTransport`] and [`FakeTransportHandle`], an
//! in-process pair that replaces real network or process I/O in tests. It is
//! compiled into the library so integration tests and downstream crates can
//! drive a [`crate::mcp::session::Session`] without a real server.
//!
//! # Channel Wiring
//!
//! From the **client** perspective:
//!
//! - "outbound" = what the client *sends* = what the test reads via
//!   `handle.outbound_rx`.
//! - "inbound"  = what the client *receives* = what the test injects via
//!   `handle.inbound_tx`.
//!
//! ```text
//! client send() -----> outbound_tx -----> outbound_rx (handle reads)
//! handle inbound_tx -> inbound_tx  -----> inbound_rx  (client receive())
//! ```
//!
//! [`FakeTransportHandle::disconnect`] simulates the peer going away: the
//! inbound stream ends and further sends fail.
//!
//! # Example
//!
//! ```
//! use mcp_router_use::mcp::transport::fake::FakeTransport;
//! use mcp_router_use::mcp::transport::Transport;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let (transport, mut handle) = FakeTransport::new();
//! transport.open().await.unwrap();
//!
//! transport.send(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#.to_string()).await.unwrap();
//! let sent = handle.outbound_rx.recv().await.unwrap();
//! assert!(sent.contains("ping"));
//!
//! handle.inbound_tx.send(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#.to_string()).unwrap();
//!
//! use futures::StreamExt;
//! let received = transport.receive().next().await.unwrap();
//! assert!(received.contains("result"));
//! # }
//! ```

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::Stream;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, RouterUseError};
use crate::mcp::transport::{SharedReceiver, Transport};

/// In-process fake transport.
///
/// Create with [`FakeTransport::new`] to obtain both the transport and the
/// complementary [`FakeTransportHandle`].
#[derive(Debug)]
pub struct FakeTransport {
    outbound_tx: mpsc::UnboundedSender<String>,
    inbound_rx: SharedReceiver,
    /// Same channel as `handle.inbound_tx`; used by `inject_response()`.
    inbound_inject_tx: mpsc::UnboundedSender<String>,
    /// Cancelled on `close()` or by the handle's `disconnect()`.
    closed: CancellationToken,
    open: AtomicBool,
    fail_open: Arc<AtomicBool>,
}

impl FakeTransport {
    /// Create a new `(FakeTransport, FakeTransportHandle)` pair.
    ///
    /// # Examples
    ///
    /// ```
    /// use mcp_router_use::mcp::transport::fake::FakeTransport;
    ///
    /// let (transport, handle) = FakeTransport::new();
    /// ```
    pub fn new() -> (Self, FakeTransportHandle) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
        let closed = CancellationToken::new();
        let fail_open = Arc::new(AtomicBool::new(false));

        let transport = Self {
            outbound_tx,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            inbound_inject_tx: inbound_tx.clone(),
            closed: closed.clone(),
            open: AtomicBool::new(false),
            fail_open: Arc::clone(&fail_open),
        };

        let handle = FakeTransportHandle {
            outbound_rx,
            inbound_tx,
            closed,
            fail_open,
        };

        (transport, handle)
    }

    /// Serialize `response` and push it onto the inbound channel.
    ///
    /// The message is dropped silently if the transport was already closed.
    pub fn inject_response(&self, response: serde_json::Value) {
        let _ = self.inbound_inject_tx.send(response.to_string());
    }
}

/// The test-side handle for a [`FakeTransport`].
#[derive(Debug)]
pub struct FakeTransportHandle {
    /// Receives messages that the client sent via [`Transport::send`].
    pub outbound_rx: mpsc::UnboundedReceiver<String>,
    /// Sends server messages into the client's [`Transport::receive`] stream.
    pub inbound_tx: mpsc::UnboundedSender<String>,
    closed: CancellationToken,
    fail_open: Arc<AtomicBool>,
}

impl FakeTransportHandle {
    /// Simulate the remote peer dropping the connection.
    pub fn disconnect(&self) {
        self.closed.cancel();
    }

    /// Make the next `open()` call fail with a connection error. The flag
    /// clears once it has fired.
    pub fn fail_next_open(&self) {
        self.fail_open.store(true, Ordering::SeqCst);
    }

    /// Number of client messages sent but not yet read by the test.
    pub fn pending_outbound(&self) -> usize {
        self.outbound_rx.len()
    }

    /// Read the next outbound message and parse it as JSON.
    ///
    /// Returns `None` once the transport has been dropped.
    pub async fn next_outbound_json(&mut self) -> Option<serde_json::Value> {
        let raw = self.outbound_rx.recv().await?;
        serde_json::from_str(&raw).ok()
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn open(&self) -> Result<()> {
        if self.fail_open.swap(false, Ordering::SeqCst) {
            return Err(RouterUseError::Connection(
                "FakeTransport configured to refuse open".into(),
            ));
        }
        if self.closed.is_cancelled() {
            return Err(RouterUseError::Connection(
                "FakeTransport already closed".into(),
            ));
        }
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Record the outbound message so the test can read it via
    /// [`FakeTransportHandle::outbound_rx`].
    ///
    /// # Errors
    ///
    /// Returns [`RouterUseError::Connection`] if the transport is closed or
    /// the handle was dropped.
    async fn send(&self, message: String) -> Result<()> {
        if !self.is_open() {
            return Err(RouterUseError::Connection(
                "FakeTransport is not open".into(),
            ));
        }
        self.outbound_tx.send(message).map_err(|e| {
            RouterUseError::Connection(format!("FakeTransport outbound channel closed: {}", e))
        })
    }

    /// Returns a stream of injected messages that ends once the transport is
    /// closed or disconnected.
    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        let state = (Arc::clone(&self.inbound_rx), self.closed.clone());
        Box::pin(futures::stream::unfold(state, |(rx, closed)| async move {
            let item = {
                let mut guard = rx.lock().await;
                tokio::select! {
                    biased;
                    _ = closed.cancelled() => None,
                    item = guard.recv() => item,
                }
            }?;
            Some((item, (rx, closed)))
        }))
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        self.closed.cancel();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.closed.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use futures::StreamExt;

    async fn opened() -> (FakeTransport, FakeTransportHandle) {
        let (transport, handle) = FakeTransport::new();
        transport.open().await.unwrap();
        (transport, handle)
    }

    #[tokio::test]
    async fn test_send_delivers_to_handle_outbound_rx() {
        let (transport, mut handle) = opened().await;
        transport.send("hello".to_string()).await.unwrap();
        let received = tokio::time::timeout(Duration::from_secs(1), handle.outbound_rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed");
        assert_eq!(received, "hello");
    }

    #[tokio::test]
    async fn test_send_before_open_fails() {
        let (transport, handle) = FakeTransport::new();
        let err = transport.send("x".to_string()).await.unwrap_err();
        assert!(matches!(err, RouterUseError::Connection(_)));
        assert_eq!(handle.pending_outbound(), 0);
    }

    #[tokio::test]
    async fn test_inject_response_serializes_value() {
        let (transport, _handle) = opened().await;
        transport.inject_response(serde_json::json!({"jsonrpc": "2.0", "id": 7, "result": {}}));

        let mut stream = transport.receive();
        let msg = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("timed out")
            .expect("stream ended");
        let parsed: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(parsed["id"], 7);
    }

    #[tokio::test]
    async fn test_receive_multiple_messages_ordered() {
        let (transport, handle) = opened().await;
        for i in 0..3 {
            handle.inbound_tx.send(format!("msg{}", i)).unwrap();
        }
        let mut stream = transport.receive();
        for i in 0..3 {
            assert_eq!(stream.next().await.unwrap(), format!("msg{}", i));
        }
    }

    #[tokio::test]
    async fn test_disconnect_ends_stream_and_fails_send() {
        let (transport, handle) = opened().await;
        let mut stream = transport.receive();
        handle.disconnect();

        let next = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("stream should end promptly");
        assert!(next.is_none());
        assert!(!transport.is_open());
        assert!(transport.send("x".to_string()).await.is_err());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_blocks_reopen() {
        let (transport, _handle) = opened().await;
        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert!(!transport.is_open());
        assert!(transport.open().await.is_err());
    }

    #[tokio::test]
    async fn test_fail_next_open() {
        let (transport, handle) = FakeTransport::new();
        handle.fail_next_open();
        let err = transport.open().await.unwrap_err();
        assert!(matches!(err, RouterUseError::Connection(_)));
        assert!(!transport.is_open());

        // Only the next open is refused.
        transport.open().await.unwrap();
        assert!(transport.is_open());
    }

    #[tokio::test]
    async fn test_next_outbound_json_parses() {
        let (transport, mut handle) = opened().await;
        transport
            .send(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#.to_string())
            .await
            .unwrap();
        let value = handle.next_outbound_json().await.unwrap();
        assert_eq!(value["method"], "notifications/initialized");
    }

    #[test]
    fn test_fake_transport_is_object_safe() {
        let (transport, _handle) = FakeTransport::new();
        let _boxed: Box<dyn Transport> = Box::new(transport);
    }
}
