//! MCP transport abstraction and implementations
//!
//! This module defines the [`Transport`] trait satisfied by every
//! stream-based transport. Concrete implementations live in submodules:
//!
//! - [`stdio::StdioTransport`] -- spawns a child process and communicates
//!   over its stdin/stdout pipes (newline-delimited JSON).
//! - [`websocket::WebSocketTransport`] -- a persistent WebSocket connection,
//!   one JSON-RPC message per text frame.
//! - [`fake::FakeTransport`] -- in-process fake for tests.
//!
//! [`http::HttpTransport`] lives here too but does not implement
//! [`Transport`]: it holds no persistent connection and every response comes
//! back inline with the POST that carried the request, so there is no
//! inbound stream to read from.
//!
//! # Design
//!
//! Callers `open` the transport, `send` serialized JSON-RPC strings and
//! consume `receive`, a stream of serialized JSON-RPC strings that ends when
//! the transport closes. Framing is the responsibility of each
//! implementation. `close` is idempotent and safe to call on a transport
//! that never opened or only partially opened.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use tokio::sync::{mpsc, Mutex};

use crate::error::Result;

/// Abstraction over stream-based MCP transports.
///
/// A transport is exclusively owned by one connector; it is shared with that
/// connector's read loop through an `Arc<dyn Transport>`.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Open the underlying channel.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::RouterUseError::Connection`] if the channel
    /// cannot be established. Resources acquired before the failure are
    /// released before returning.
    async fn open(&self) -> Result<()>;

    /// Send a complete JSON-RPC message string to the remote peer.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::RouterUseError::Connection`] if the transport
    /// is not open or the underlying write fails.
    async fn send(&self, message: String) -> Result<()>;

    /// Returns a stream of inbound JSON-RPC message strings.
    ///
    /// The stream yields nothing until the transport is open and ends when
    /// the transport closes or the remote peer disconnects.
    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>>;

    /// Release the underlying channel. Idempotent.
    async fn close(&self) -> Result<()>;

    /// Whether the transport is currently open.
    fn is_open(&self) -> bool;
}

/// The transport variant a connector drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Stateless HTTP POSTs to an MCP endpoint.
    Http,
    /// Newline-delimited JSON over a child process's stdio.
    Stdio,
    /// A persistent WebSocket connection.
    WebSocket,
    /// In-memory test double.
    Fake,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportKind::Http => "http",
            TransportKind::Stdio => "stdio",
            TransportKind::WebSocket => "websocket",
            TransportKind::Fake => "fake",
        };
        f.write_str(name)
    }
}

/// Shared receiver end used by the stream transports.
pub(crate) type SharedReceiver = Arc<Mutex<mpsc::UnboundedReceiver<String>>>;

/// Turn a shared channel receiver into a message stream.
pub(crate) fn receiver_stream(
    rx: SharedReceiver,
) -> Pin<Box<dyn Stream<Item = String> + Send + 'static>> {
    Box::pin(futures::stream::unfold(rx, |rx| async move {
        let mut guard = rx.lock().await;
        let item = guard.recv().await?;
        drop(guard);
        Some((item, rx))
    }))
}

pub mod fake;
pub mod http;
pub mod stdio;
pub mod websocket;
