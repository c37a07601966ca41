//! Session protocol state machine
//!
//! A [`Session`] owns one [`Connector`] and drives the MCP lifecycle on top
//! of it:
//!
//! ```text
//! New -> Connecting -> Connected -> Initialized -> Closed
//! ```
//!
//! `Closed` is reachable from every state and is terminal. A connection
//! error raised by any request closes the session; timeouts and remote
//! errors leave it usable.
//!
//! The tool catalog is held behind an `Arc` and replaced wholesale by
//! [`Session::discover_tools`], so readers never observe a partial catalog.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, RouterUseError};
use crate::mcp::connector::Connector;
use crate::mcp::transport::TransportKind;
use crate::mcp::types::{
    CallToolParams, CallToolResponse, ClientCapabilities, Implementation, InitializeParams,
    InitializeResponse, ListToolsResponse, McpTool, PaginatedParams, LATEST_PROTOCOL_VERSION,
    METHOD_INITIALIZE, METHOD_INITIALIZED, METHOD_PING, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
    SUPPORTED_PROTOCOL_VERSIONS,
};

/// A session's tool catalog, keyed by tool name.
pub type ToolCatalog = HashMap<String, McpTool>;

/// Protocol state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Constructed, no I/O yet.
    New,
    /// The connector is opening its transport.
    Connecting,
    /// Transport open; handshake not yet done.
    Connected,
    /// Handshake complete; tools may be listed and called.
    Initialized,
    /// Terminal.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::New => "New",
            SessionState::Connecting => "Connecting",
            SessionState::Connected => "Connected",
            SessionState::Initialized => "Initialized",
            SessionState::Closed => "Closed",
        };
        f.write_str(name)
    }
}

/// A stateful MCP session over one connector.
///
/// # Examples
///
/// ```no_run
/// use mcp_router_use::config::ServerConfig;
/// use mcp_router_use::mcp::factory::create_connector;
/// use mcp_router_use::mcp::session::Session;
///
/// # #[tokio::main]
/// # async fn main() -> mcp_router_use::Result<()> {
/// let connector = create_connector(&ServerConfig::http("http://localhost:3282/mcp"))?;
/// let session = Session::new(connector);
/// session.connect().await?;
/// session.initialize().await?;
/// session.discover_tools().await?;
/// let result = session
///     .call_tool("echo", serde_json::json!({"msg": "hi"}))
///     .await?;
/// println!("{}", result.text());
/// session.disconnect().await?;
/// # Ok(())
/// # }
/// ```
pub struct Session {
    connector: Connector,
    state: Mutex<SessionState>,
    tools: RwLock<Arc<ToolCatalog>>,
    server: Mutex<Option<InitializeResponse>>,
    client_info: Implementation,
    capabilities: ClientCapabilities,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("kind", &self.connector.kind())
            .field("state", &self.state())
            .field("tools", &self.tools().len())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a session in state [`SessionState::New`].
    pub fn new(connector: Connector) -> Self {
        Self {
            connector,
            state: Mutex::new(SessionState::New),
            tools: RwLock::new(Arc::new(HashMap::new())),
            server: Mutex::new(None),
            client_info: Implementation::this_crate(),
            capabilities: ClientCapabilities::default(),
        }
    }

    /// Override the `clientInfo` sent during the handshake.
    pub fn with_client_info(mut self, client_info: Implementation) -> Self {
        self.client_info = client_info;
        self
    }

    /// Current protocol state.
    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Transition `from -> to` only if the session is still in `from`.
    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }

    fn require(&self, expected: SessionState, operation: &'static str) -> Result<()> {
        let state = self.state();
        if state == expected {
            Ok(())
        } else {
            Err(RouterUseError::ProtocolState {
                operation,
                state: state.to_string(),
            })
        }
    }

    /// The transport variant behind this session.
    pub fn kind(&self) -> TransportKind {
        self.connector.kind()
    }

    /// The underlying connector.
    pub fn connector(&self) -> &Connector {
        &self.connector
    }

    /// The current tool catalog snapshot.
    pub fn tools(&self) -> Arc<ToolCatalog> {
        Arc::clone(&self.tools.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Look up one tool by name.
    pub fn tool(&self, name: &str) -> Option<McpTool> {
        self.tools().get(name).cloned()
    }

    /// The server's handshake response, once initialized.
    pub fn server_info(&self) -> Option<InitializeResponse> {
        self.server
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Open the connector: `New -> Connecting -> Connected`.
    ///
    /// # Errors
    ///
    /// [`RouterUseError::ProtocolState`] outside `New`; otherwise whatever
    /// the connector's `connect` fails with, after which the session is
    /// `Closed`.
    pub async fn connect(&self) -> Result<()> {
        if !self.transition(SessionState::New, SessionState::Connecting) {
            return Err(RouterUseError::ProtocolState {
                operation: "connect",
                state: self.state().to_string(),
            });
        }

        if let Err(e) = self.connector.connect().await {
            self.set_state(SessionState::Closed);
            let _ = self.connector.disconnect().await;
            return Err(e);
        }

        if !self.transition(SessionState::Connecting, SessionState::Connected) {
            // Disconnected while the transport was opening.
            let _ = self.connector.disconnect().await;
            return Err(RouterUseError::Connection(
                "session closed while connecting".into(),
            ));
        }
        tracing::debug!(kind = %self.kind(), "session connected");
        Ok(())
    }

    /// Perform the initialize handshake: `Connected -> Initialized`.
    ///
    /// # Errors
    ///
    /// - [`RouterUseError::ProtocolState`] outside `Connected`.
    /// - [`RouterUseError::Protocol`] if the server picks an unsupported
    ///   protocol version.
    /// - Request errors as for [`Connector::request`].
    pub async fn initialize(&self) -> Result<InitializeResponse> {
        self.require(SessionState::Connected, "initialize")?;

        let params = InitializeParams {
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            capabilities: self.capabilities.clone(),
            client_info: self.client_info.clone(),
        };
        let response: InitializeResponse = self.rpc(METHOD_INITIALIZE, params, None).await?;

        // Verify the server selected a version we support.
        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&response.protocol_version.as_str()) {
            return Err(RouterUseError::Protocol(format!(
                "server selected unsupported protocol version `{}` (supported: {})",
                response.protocol_version,
                SUPPORTED_PROTOCOL_VERSIONS.join(", ")
            )));
        }

        if let Err(e) = self
            .connector
            .notify(METHOD_INITIALIZED, serde_json::json!({}))
            .await
        {
            return Err(self.fail(e).await);
        }

        *self.server.lock().unwrap_or_else(PoisonError::into_inner) = Some(response.clone());
        if !self.transition(SessionState::Connected, SessionState::Initialized) {
            return Err(RouterUseError::ProtocolState {
                operation: "initialize",
                state: self.state().to_string(),
            });
        }

        tracing::info!(
            kind = %self.kind(),
            server = %response.server_info.name,
            server_version = %response.server_info.version,
            protocol_version = %response.protocol_version,
            "MCP session initialized"
        );
        Ok(response)
    }

    /// List every tool (following pagination) and replace the catalog.
    ///
    /// A duplicate name keeps the last descriptor seen and logs a warning.
    ///
    /// # Errors
    ///
    /// [`RouterUseError::ProtocolState`] outside `Initialized`, or request
    /// errors. On error the previous catalog is left untouched.
    pub async fn discover_tools(&self) -> Result<Arc<ToolCatalog>> {
        self.require(SessionState::Initialized, "discover tools")?;

        let mut catalog: ToolCatalog = HashMap::new();
        let mut cursor: Option<String> = None;
        loop {
            let page: ListToolsResponse = self
                .rpc(METHOD_TOOLS_LIST, PaginatedParams { cursor }, None)
                .await?;

            for tool in page.tools {
                if catalog.contains_key(&tool.name) {
                    tracing::warn!(tool = %tool.name, "server listed duplicate tool name; keeping the last");
                }
                catalog.insert(tool.name.clone(), tool);
            }

            match page.next_cursor {
                Some(c) if !c.is_empty() => cursor = Some(c),
                _ => break,
            }
        }

        let catalog = Arc::new(catalog);
        *self.tools.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&catalog);
        tracing::debug!(kind = %self.kind(), count = catalog.len(), "tool catalog refreshed");
        Ok(catalog)
    }

    /// Invoke a tool from the catalog with the connector's default timeout.
    pub async fn call_tool(&self, name: &str, arguments: serde_json::Value) -> Result<CallToolResponse> {
        self.call_tool_with_timeout(name, arguments, None).await
    }

    /// Invoke a tool from the catalog.
    ///
    /// # Errors
    ///
    /// - [`RouterUseError::ProtocolState`] outside `Initialized`.
    /// - [`RouterUseError::UnknownTool`] if `name` is not in the catalog.
    ///   Neither error sends anything on the wire.
    /// - Request errors as for [`Connector::request`].
    pub async fn call_tool_with_timeout(
        &self,
        name: &str,
        arguments: serde_json::Value,
        timeout: Option<Duration>,
    ) -> Result<CallToolResponse> {
        self.require(SessionState::Initialized, "call a tool")?;
        if !self.tools().contains_key(name) {
            return Err(RouterUseError::UnknownTool(name.to_string()));
        }

        tracing::debug!(tool = name, "calling tool");
        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };
        self.rpc(METHOD_TOOLS_CALL, params, timeout).await
    }

    /// Liveness check.
    pub async fn ping(&self) -> Result<()> {
        self.require(SessionState::Initialized, "ping")?;
        let _: serde_json::Value = self.rpc(METHOD_PING, serde_json::json!({}), None).await?;
        Ok(())
    }

    /// Close the session. Valid from every state; idempotent.
    pub async fn disconnect(&self) -> Result<()> {
        let previous = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *state, SessionState::Closed)
        };
        if previous != SessionState::Closed {
            tracing::debug!(kind = %self.kind(), from = %previous, "session closing");
        }
        self.connector.disconnect().await
    }

    /// Issue a request and decode its result, closing on connection loss.
    async fn rpc<P, R>(&self, method: &str, params: P, timeout: Option<Duration>) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)?;
        let value = match self.connector.request(method, params, timeout).await {
            Ok(value) => value,
            Err(e) => return Err(self.fail(e).await),
        };
        serde_json::from_value(value)
            .map_err(|e| RouterUseError::Protocol(format!("invalid `{}` result: {}", method, e)))
    }

    async fn fail(&self, error: RouterUseError) -> RouterUseError {
        if error.is_connection_lost() {
            tracing::warn!(kind = %self.kind(), error = %error, "connection lost; closing session");
            self.set_state(SessionState::Closed);
            let _ = self.connector.disconnect().await;
        }
        error
    }
}
