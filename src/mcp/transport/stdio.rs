//! Stdio transport for MCP child-process servers
//!
//! This module implements [`StdioTransport`], which spawns a child process
//! and communicates with it over its stdin/stdout pipes using
//! newline-delimited JSON framing. MCP Router treats this transport as
//! legacy; it remains available for servers that run locally.
//!
//! # Protocol
//!
//! - Outbound messages are written to the child's stdin as a single JSON
//!   object followed by a newline (`\n`).
//! - Inbound messages are read from the child's stdout, one JSON object per
//!   line (newline stripped before delivery, blank lines skipped).
//! - The child's stderr is drained and logged via `tracing::debug!`. It is
//!   diagnostic output only and never treated as an error condition.
//!
//! # Lifecycle
//!
//! [`StdioTransport::new`] only records the command line. [`Transport::open`]
//! spawns the child and starts three background Tokio tasks (stdin writer,
//! stdout reader, stderr drain). When the child exits or its stdout closes
//! the inbound stream ends. [`Transport::close`] closes stdin, waits up to
//! [`SHUTDOWN_GRACE`] for the child to exit and kills it afterwards. When
//! the transport is dropped while the child is still running, a best-effort
//! SIGTERM (Unix) or `start_kill` (non-Unix) is sent.

use std::collections::HashMap;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};

use crate::error::{Result, RouterUseError};
use crate::mcp::transport::{receiver_stream, SharedReceiver, Transport};

/// How long `close()` waits for the child to exit after stdin is closed.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Stdio-based MCP transport that drives a child process.
///
/// # Examples
///
/// ```no_run
/// use std::collections::HashMap;
/// use mcp_router_use::mcp::transport::stdio::StdioTransport;
/// use mcp_router_use::mcp::transport::Transport;
///
/// # #[tokio::main]
/// # async fn main() -> mcp_router_use::Result<()> {
/// let transport = StdioTransport::new(
///     "npx",
///     vec!["-y".into(), "@modelcontextprotocol/server-filesystem".into(), "/tmp".into()],
///     HashMap::new(),
/// );
/// transport.open().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct StdioTransport {
    command: String,
    args: Vec<String>,
    /// Overlay applied on top of the inherited environment.
    env: HashMap<String, String>,
    /// Sender for stdout lines; moved into the reader task on `open`.
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    /// Shared receiver exposed via `receive()`.
    inbound_rx: SharedReceiver,
    /// Sender side of the stdin channel; `send()` writes here.
    stdin_tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    /// Handle to the spawned child process.
    child: Arc<Mutex<Option<Child>>>,
    /// Set once `open` has succeeded; never reset.
    opened: AtomicBool,
    open: Arc<AtomicBool>,
}

impl StdioTransport {
    /// Describe a child process to spawn on `open`.
    ///
    /// No process is started here.
    ///
    /// # Arguments
    ///
    /// * `command` - The server executable.
    /// * `args` - Command-line arguments passed to the executable.
    /// * `env` - Variables merged onto the inherited environment; on
    ///   conflicting keys the overlay wins.
    pub fn new(command: impl Into<String>, args: Vec<String>, env: HashMap<String, String>) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
        Self {
            command: command.into(),
            args,
            env,
            inbound_tx: Mutex::new(Some(inbound_tx)),
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            stdin_tx: Mutex::new(None),
            child: Arc::new(Mutex::new(None)),
            opened: AtomicBool::new(false),
            open: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The executable this transport spawns.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// The arguments passed to the executable.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// The environment overlay.
    pub fn env(&self) -> &HashMap<String, String> {
        &self.env
    }

    fn build_command(&self) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        // `envs` layers on top of the inherited environment.
        cmd.envs(&self.env);
        cmd
    }
}

#[async_trait::async_trait]
impl Transport for StdioTransport {
    /// Spawn the child process and wire up its stdio pipes.
    ///
    /// # Errors
    ///
    /// Returns [`RouterUseError::Connection`] if the process cannot be
    /// spawned, if a pipe is unavailable, or if the transport was already
    /// closed. A child spawned before a later failure is killed.
    async fn open(&self) -> Result<()> {
        if self.open.load(Ordering::SeqCst) {
            return Ok(());
        }
        if self.opened.load(Ordering::SeqCst) {
            return Err(RouterUseError::Connection(
                "stdio transport cannot be reopened after close".into(),
            ));
        }

        let inbound_tx = self.inbound_tx.lock().await.take().ok_or_else(|| {
            RouterUseError::Connection("stdio transport cannot be reopened after close".into())
        })?;

        let mut child = self.build_command().spawn().map_err(|e| {
            RouterUseError::Connection(format!(
                "failed to spawn MCP server `{}`: {}",
                self.command, e
            ))
        })?;

        let pipes = (child.stdin.take(), child.stdout.take(), child.stderr.take());
        let (stdin, stdout, stderr) = match pipes {
            (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
            _ => {
                let _ = child.start_kill();
                return Err(RouterUseError::Connection(
                    "child stdio unavailable after spawn".into(),
                ));
            }
        };

        tracing::debug!(command = %self.command, pid = ?child.id(), "spawned MCP server");

        // Channel for writing to child stdin.
        let (stdin_tx, mut stdin_rx) = mpsc::unbounded_channel::<String>();

        // Background task: forward stdin_rx -> child stdin. Dropping every
        // sender closes stdin, which is the child's cue to exit.
        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(msg) = stdin_rx.recv().await {
                let line = format!("{}\n", msg);
                if stdin.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
        });

        // Background task: drain child stdout -> inbound channel. The
        // channel closes (and the inbound stream ends) on EOF or read error.
        let open = Arc::clone(&self.open);
        let command = self.command.clone();
        tokio::spawn(async move {
            let reader = BufReader::new(stdout);
            let mut lines = reader.lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        if inbound_tx.send(trimmed.to_string()).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        tracing::debug!(command = %command, "MCP server stdout closed");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(command = %command, error = %e, "error reading MCP server stdout");
                        break;
                    }
                }
            }
            open.store(false, Ordering::SeqCst);
        });

        // Background task: drain child stderr -> tracing log.
        tokio::spawn(async move {
            let reader = BufReader::new(stderr);
            let mut lines = reader.lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(
                    target: "mcp_router_use::mcp::transport::stdio",
                    "mcp server stderr: {}",
                    line
                );
            }
        });

        *self.stdin_tx.lock().await = Some(stdin_tx);
        *self.child.lock().await = Some(child);
        self.opened.store(true, Ordering::SeqCst);
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Send a JSON-RPC message to the child process via its stdin.
    ///
    /// # Errors
    ///
    /// Returns [`RouterUseError::Connection`] if the transport is not open
    /// or the background writer task has exited.
    async fn send(&self, message: String) -> Result<()> {
        let guard = self.stdin_tx.lock().await;
        let tx = guard
            .as_ref()
            .ok_or_else(|| RouterUseError::Connection("stdio transport is not open".into()))?;
        tx.send(message)
            .map_err(|e| RouterUseError::Connection(format!("stdin channel closed: {}", e)))
    }

    /// Returns a stream of JSON-RPC messages received from the child's
    /// stdout (one complete JSON object per item, newline stripped).
    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        receiver_stream(Arc::clone(&self.inbound_rx))
    }

    /// Close stdin, give the child [`SHUTDOWN_GRACE`] to exit, then kill it.
    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        self.opened.store(true, Ordering::SeqCst);

        // Dropping the sender ends the writer task and closes the pipe.
        self.stdin_tx.lock().await.take();
        // A transport that never opened still holds the inbound sender.
        self.inbound_tx.lock().await.take();

        let child = self.child.lock().await.take();
        let Some(mut child) = child else {
            return Ok(());
        };

        match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(command = %self.command, ?status, "MCP server process exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(command = %self.command, error = %e, "error waiting for MCP server process");
            }
            Err(_) => {
                tracing::warn!(command = %self.command, "MCP server did not exit within grace period, killing");
                if let Err(e) = child.kill().await {
                    tracing::warn!(command = %self.command, error = %e, "failed to kill MCP server process");
                }
            }
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

impl Drop for StdioTransport {
    /// Best-effort termination of a child that was never closed.
    ///
    /// This MUST NOT block. If the lock is contended the child is left to
    /// the OS.
    fn drop(&mut self) {
        if let Ok(mut guard) = self.child.try_lock() {
            if let Some(child) = guard.as_mut() {
                #[cfg(unix)]
                {
                    if let Some(pid) = child.id() {
                        // SAFETY: pid is a valid process ID obtained from tokio::process::Child.
                        unsafe {
                            libc::kill(pid as libc::pid_t, libc::SIGTERM);
                        }
                    }
                }
                #[cfg(not(unix))]
                {
                    let _ = child.start_kill();
                }
            }
        }
    }
}
