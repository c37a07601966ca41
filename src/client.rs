//! Multi-server session manager
//!
//! [`McpClient`] owns a [`ClientConfig`] and the live [`Session`]s created
//! from it, keyed by server name.
//!
//! When the configuration has an `mcpRouter` section every session goes to
//! the router's `/mcp` endpoint: an [`EndpointResolver`] turns the server
//! name into a live endpoint and an HTTP connector is built for it.
//! Registering and starting the backing process is the resolver's business
//! and happens outside this crate. Without a router section each server's
//! own config goes through the connector factory.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ClientConfig, RouterConfig, ServerConfig};
use crate::error::{Result, RouterUseError};
use crate::mcp::connector::{Connector, DEFAULT_REQUEST_TIMEOUT};
use crate::mcp::factory::{create_connector_with_timeout, http_connector};
use crate::mcp::session::Session;

/// A live endpoint for one server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    /// HTTP endpoint URL.
    pub url: String,
    /// Extra request headers.
    pub headers: HashMap<String, String>,
    /// Bearer token.
    pub auth_token: Option<String>,
}

/// Resolves a server name to a live endpoint.
///
/// Implementations may register and start the backing server first.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait EndpointResolver: Send + Sync {
    /// Return the endpoint for `server_name`.
    async fn resolve(&self, server_name: &str) -> Result<ResolvedEndpoint>;
}

/// Resolves every server to the router's shared `/mcp` endpoint.
#[derive(Debug, Clone)]
pub struct RouterEndpointResolver {
    router: RouterConfig,
}

impl RouterEndpointResolver {
    /// Resolver for the given router section.
    pub fn new(router: RouterConfig) -> Self {
        Self { router }
    }

    /// The router's MCP endpoint.
    pub fn endpoint_url(&self) -> String {
        format!("{}/mcp", self.router.router_url.trim_end_matches('/'))
    }
}

#[async_trait::async_trait]
impl EndpointResolver for RouterEndpointResolver {
    async fn resolve(&self, server_name: &str) -> Result<ResolvedEndpoint> {
        if self.router.router_url.trim().is_empty() {
            return Err(RouterUseError::Config(
                "No MCP Router URL configured. Set mcpRouter.router_url in your config.".into(),
            ));
        }
        tracing::debug!(server = server_name, endpoint = %self.endpoint_url(), "resolved through router");
        Ok(ResolvedEndpoint {
            url: self.endpoint_url(),
            headers: self.router.headers.clone(),
            auth_token: self.router.auth_token.clone(),
        })
    }
}

/// Client managing configured servers and their sessions.
///
/// # Examples
///
/// ```no_run
/// use mcp_router_use::McpClient;
///
/// # #[tokio::main]
/// # async fn main() -> mcp_router_use::Result<()> {
/// let mut client = McpClient::from_config_file("mcp.json")?;
/// let session = client.create_session("filesystem", true).await?;
/// for name in session.tools().keys() {
///     println!("{name}");
/// }
/// client.close_all_sessions().await?;
/// # Ok(())
/// # }
/// ```
pub struct McpClient {
    config: ClientConfig,
    sessions: BTreeMap<String, Arc<Session>>,
    resolver: Option<Arc<dyn EndpointResolver>>,
    request_timeout: Duration,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("servers", &self.server_names())
            .field("sessions", &self.sessions.keys().collect::<Vec<_>>())
            .field("routed", &self.resolver.is_some())
            .finish_non_exhaustive()
    }
}

impl McpClient {
    /// Client over `config`. A router section installs a
    /// [`RouterEndpointResolver`].
    pub fn new(config: ClientConfig) -> Self {
        let resolver = config
            .mcp_router
            .clone()
            .map(|router| Arc::new(RouterEndpointResolver::new(router)) as Arc<dyn EndpointResolver>);
        Self {
            config,
            sessions: BTreeMap::new(),
            resolver,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Load [`ClientConfig`] from `path` (with environment overrides).
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(ClientConfig::load(path)?))
    }

    /// Route every session through `resolver` instead of the default.
    pub fn with_resolver(mut self, resolver: Arc<dyn EndpointResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Default request deadline for connectors this client builds.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// The current configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Add a server definition.
    ///
    /// # Errors
    ///
    /// [`RouterUseError::Config`] if `name` already exists.
    pub fn add_server(&mut self, name: impl Into<String>, server: ServerConfig) -> Result<()> {
        let name = name.into();
        if self.config.mcp_servers.contains_key(&name) {
            return Err(RouterUseError::Config(format!(
                "Server '{}' already exists",
                name
            )));
        }
        self.config.mcp_servers.insert(name, server);
        Ok(())
    }

    /// Remove a server definition and disconnect its session, if any.
    ///
    /// # Errors
    ///
    /// [`RouterUseError::Config`] if `name` is not configured. A failed
    /// disconnect is logged; the server is removed regardless.
    pub async fn remove_server(&mut self, name: &str) -> Result<()> {
        if self.config.mcp_servers.remove(name).is_none() {
            return Err(RouterUseError::Config(format!(
                "Server '{}' not found",
                name
            )));
        }
        if let Some(session) = self.sessions.remove(name) {
            tracing::debug!(server = name, "closing session of removed server");
            if let Err(e) = session.disconnect().await {
                tracing::warn!(server = name, error = %e, "failed to close session of removed server");
            }
        }
        Ok(())
    }

    /// Names of all configured servers, sorted.
    pub fn server_names(&self) -> Vec<String> {
        self.config.mcp_servers.keys().cloned().collect()
    }

    /// Write the configuration to `path`.
    pub fn save_config(&self, path: impl AsRef<Path>) -> Result<()> {
        self.config.save(path)
    }

    async fn build_connector(&self, name: &str, server: &ServerConfig) -> Result<Connector> {
        match &self.resolver {
            Some(resolver) => {
                let endpoint = resolver.resolve(name).await?;
                http_connector(
                    endpoint.url,
                    endpoint.headers,
                    endpoint.auth_token,
                    self.request_timeout,
                )
            }
            None => create_connector_with_timeout(server, self.request_timeout),
        }
    }

    /// Create, connect and store a session for `name`.
    ///
    /// With `auto_initialize` the handshake and tool discovery run too. An
    /// existing session for `name` is closed and replaced.
    ///
    /// # Errors
    ///
    /// [`RouterUseError::Config`] if no servers are configured or `name` is
    /// unknown; otherwise whatever resolution, connect, initialize or
    /// discovery fails with. A session that fails part-way is closed.
    pub async fn create_session(&mut self, name: &str, auto_initialize: bool) -> Result<Arc<Session>> {
        if self.config.mcp_servers.is_empty() {
            return Err(RouterUseError::Config(
                "No MCP servers defined in config".to_string(),
            ));
        }
        let server = self.config.mcp_servers.get(name).ok_or_else(|| {
            RouterUseError::Config(format!("Server '{}' not found in config", name))
        })?;

        let connector = self.build_connector(name, server).await?;
        let session = Arc::new(Session::new(connector));

        if let Err(e) = open_session(&session, auto_initialize).await {
            let _ = session.disconnect().await;
            return Err(e);
        }

        if let Some(previous) = self.sessions.insert(name.to_string(), Arc::clone(&session)) {
            tracing::debug!(server = name, "replacing existing session");
            let _ = previous.disconnect().await;
        }
        tracing::info!(server = name, kind = %session.kind(), "session created");
        Ok(session)
    }

    /// Create sessions for every configured server; stops at the first error.
    pub async fn create_all_sessions(&mut self, auto_initialize: bool) -> Result<BTreeMap<String, Arc<Session>>> {
        for name in self.server_names() {
            self.create_session(&name, auto_initialize).await?;
        }
        Ok(self.active_sessions())
    }

    /// The stored session for `name`.
    ///
    /// # Errors
    ///
    /// [`RouterUseError::Config`] if there is none.
    pub fn session(&self, name: &str) -> Result<Arc<Session>> {
        self.sessions.get(name).cloned().ok_or_else(|| {
            RouterUseError::Config(format!("No session exists for server '{}'", name))
        })
    }

    /// All stored sessions.
    pub fn active_sessions(&self) -> BTreeMap<String, Arc<Session>> {
        self.sessions.clone()
    }

    /// Disconnect and forget the session for `name`. Absent is not an error.
    pub async fn close_session(&mut self, name: &str) -> Result<()> {
        match self.sessions.remove(name) {
            Some(session) => session.disconnect().await,
            None => {
                tracing::warn!(server = name, "no active session to close");
                Ok(())
            }
        }
    }

    /// Disconnect every session, even when some fail.
    ///
    /// # Errors
    ///
    /// [`RouterUseError::Connection`] listing the sessions that failed to
    /// close; all sessions are forgotten either way.
    pub async fn close_all_sessions(&mut self) -> Result<()> {
        let sessions = std::mem::take(&mut self.sessions);
        let mut failures = Vec::new();
        for (name, session) in sessions {
            if let Err(e) = session.disconnect().await {
                tracing::warn!(server = %name, error = %e, "failed to close session");
                failures.push(format!("{}: {}", name, e));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(RouterUseError::Connection(format!(
                "Disconnect failed for {}",
                failures.join("; ")
            )))
        }
    }
}

async fn open_session(session: &Session, auto_initialize: bool) -> Result<()> {
    session.connect().await?;
    if auto_initialize {
        session.initialize().await?;
        session.discover_tools().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::connector::Connector;
    use crate::mcp::session::SessionState;
    use crate::mcp::transport::TransportKind;
    use mockall::predicate::eq;

    fn config_with(servers: &[(&str, ServerConfig)]) -> ClientConfig {
        let mut config = ClientConfig::default();
        for (name, server) in servers {
            config.mcp_servers.insert(name.to_string(), server.clone());
        }
        config
    }

    #[tokio::test]
    async fn test_add_and_remove_server() {
        let mut client = McpClient::new(ClientConfig::default());
        client
            .add_server("fs", ServerConfig::http("http://localhost/mcp"))
            .unwrap();
        assert_eq!(client.server_names(), vec!["fs".to_string()]);

        let err = client
            .add_server("fs", ServerConfig::http("http://other/mcp"))
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));

        client.remove_server("fs").await.unwrap();
        assert!(client.server_names().is_empty());
        assert!(client.remove_server("fs").await.is_err());
    }

    #[cfg(unix)]
    fn process_alive(pid: i32) -> bool {
        // Signal 0 only checks that the process exists.
        unsafe { libc::kill(pid, 0) == 0 }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_remove_server_stops_stdio_child() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let script = format!("echo $$ > {}; exec cat", pid_file.display());
        let mut client = McpClient::new(config_with(&[(
            "local",
            ServerConfig::stdio("sh", vec!["-c".into(), script]),
        )]));
        let session = client.create_session("local", false).await.unwrap();

        let mut pid = None;
        for _ in 0..100 {
            if let Ok(raw) = std::fs::read_to_string(&pid_file) {
                if let Ok(parsed) = raw.trim().parse::<i32>() {
                    pid = Some(parsed);
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let pid = pid.expect("child wrote its pid");
        assert!(process_alive(pid));

        client.remove_server("local").await.unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(client.session("local").is_err());
        assert!(!process_alive(pid), "child {pid} still running after removal");
    }

    #[tokio::test]
    async fn test_create_session_without_servers_is_config_error() {
        let mut client = McpClient::new(ClientConfig::default());
        let err = client.create_session("fs", false).await.unwrap_err();
        assert!(matches!(err, RouterUseError::Config(_)));
        assert!(err.to_string().contains("No MCP servers defined"));
    }

    #[tokio::test]
    async fn test_create_session_unknown_server_is_config_error() {
        let mut client = McpClient::new(config_with(&[(
            "fs",
            ServerConfig::http("http://localhost/mcp"),
        )]));
        let err = client.create_session("nope", false).await.unwrap_err();
        assert!(err.to_string().contains("Server 'nope' not found in config"));
    }

    #[tokio::test]
    async fn test_create_session_uses_factory_without_router() {
        let mut client = McpClient::new(config_with(&[(
            "fs",
            ServerConfig::http("http://localhost:3282/mcp").with_auth_token("tok"),
        )]));
        let session = client.create_session("fs", false).await.unwrap();
        assert_eq!(session.kind(), TransportKind::Http);
        assert_eq!(session.state(), SessionState::Connected);
        assert!(client.session("fs").is_ok());
        assert_eq!(client.active_sessions().len(), 1);

        client.close_session("fs").await.unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(client.session("fs").is_err());
        client.close_session("fs").await.unwrap();
    }

    #[tokio::test]
    async fn test_create_session_goes_through_resolver() {
        let mut resolver = MockEndpointResolver::new();
        resolver
            .expect_resolve()
            .with(eq("fs"))
            .times(1)
            .returning(|_| {
                Ok(ResolvedEndpoint {
                    url: "http://router:3282/mcp".to_string(),
                    headers: HashMap::new(),
                    auth_token: Some("router-token".to_string()),
                })
            });

        // The server's own (stdio) config is ignored when routed.
        let mut client = McpClient::new(config_with(&[(
            "fs",
            ServerConfig::stdio("npx", vec!["srv".into()]),
        )]))
        .with_resolver(Arc::new(resolver));

        let session = client.create_session("fs", false).await.unwrap();
        match session.connector() {
            Connector::Http(c) => {
                assert_eq!(c.transport().endpoint(), "http://router:3282/mcp");
                assert_eq!(c.transport().auth_token(), Some("router-token"));
            }
            other => panic!("unexpected connector: {other:?}"),
        }
        client.close_all_sessions().await.unwrap();
        assert!(client.active_sessions().is_empty());
    }

    #[tokio::test]
    async fn test_resolver_error_propagates() {
        let mut resolver = MockEndpointResolver::new();
        resolver
            .expect_resolve()
            .returning(|name| Err(RouterUseError::Connection(format!("{name} unavailable"))));

        let mut client = McpClient::new(config_with(&[("fs", ServerConfig::default())]))
            .with_resolver(Arc::new(resolver));
        let err = client.create_session("fs", false).await.unwrap_err();
        assert!(err.to_string().contains("fs unavailable"));
        assert!(client.active_sessions().is_empty());
    }

    #[tokio::test]
    async fn test_failed_connect_is_not_stored() {
        let mut client = McpClient::new(config_with(&[(
            "bad",
            ServerConfig::http("ftp://localhost/mcp"),
        )]));
        assert!(client.create_session("bad", false).await.is_err());
        assert!(client.session("bad").is_err());
    }

    #[tokio::test]
    async fn test_router_resolver_appends_mcp_path() {
        let resolver = RouterEndpointResolver::new(RouterConfig {
            router_url: "http://localhost:3282/".to_string(),
            auth_token: Some("t".to_string()),
            headers: HashMap::from([("X-Team".to_string(), "a".to_string())]),
        });
        let endpoint = resolver.resolve("anything").await.unwrap();
        assert_eq!(endpoint.url, "http://localhost:3282/mcp");
        assert_eq!(endpoint.auth_token.as_deref(), Some("t"));
        assert_eq!(endpoint.headers["X-Team"], "a");
    }

    #[tokio::test]
    async fn test_router_resolver_rejects_empty_url() {
        let resolver = RouterEndpointResolver::new(RouterConfig::default());
        assert!(matches!(
            resolver.resolve("fs").await,
            Err(RouterUseError::Config(_))
        ));
    }

    #[test]
    fn test_router_section_installs_resolver() {
        let mut config = config_with(&[("fs", ServerConfig::default())]);
        config.mcp_router = Some(RouterConfig {
            router_url: "http://localhost:3282".into(),
            ..RouterConfig::default()
        });
        let client = McpClient::new(config);
        assert!(format!("{client:?}").contains("routed: true"));
    }

    #[test]
    fn test_save_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp.json");
        let mut client = McpClient::new(ClientConfig::default());
        client
            .add_server("ws", ServerConfig::websocket("ws://localhost:9000"))
            .unwrap();
        client.save_config(&path).unwrap();

        let reloaded = McpClient::from_config_file(&path).unwrap();
        assert_eq!(reloaded.server_names(), vec!["ws".to_string()]);
    }
}
