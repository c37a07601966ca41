//! Configuration management for mcp-router-use
//!
//! This module handles loading, parsing, validating, and saving the client
//! configuration file, plus environment-variable overrides for the router
//! section.
//!
//! The file is JSON by default and YAML when the path ends in `.yaml` or
//! `.yml`:
//!
//! ```json
//! {
//!   "mcpRouter": { "router_url": "http://localhost:3282", "auth_token": "..." },
//!   "mcpServers": {
//!     "filesystem": { "url": "http://localhost:3282/mcp" },
//!     "local":      { "command": "npx", "args": ["-y", "server"] },
//!     "remote":     { "ws_url": "wss://example.com/mcp" }
//!   }
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RouterUseError};

/// Overrides `mcpRouter.router_url`.
pub const ENV_ROUTER_URL: &str = "MCP_ROUTER_URL";
/// Overrides `mcpRouter.auth_token`.
pub const ENV_ROUTER_AUTH_TOKEN: &str = "MCP_ROUTER_AUTH_TOKEN";

/// Top-level client configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Management-plane connection; when present every server is reached
    /// through the router.
    #[serde(rename = "mcpRouter", default, skip_serializing_if = "Option::is_none")]
    pub mcp_router: Option<RouterConfig>,
    /// Named server definitions.
    #[serde(rename = "mcpServers", default)]
    pub mcp_servers: BTreeMap<String, ServerConfig>,
}

/// Connection details for MCP Router.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Base URL of the router, e.g. `http://localhost:3282`.
    pub router_url: String,
    /// Bearer token for the router.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// Extra headers sent with every router request.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

/// Configuration record for one server.
///
/// Exactly one of three shapes is expected: `{url, headers?, auth_token?}`,
/// `{command, args, env?}` or `{ws_url, headers?, auth_token?}`. Which one is
/// used is decided by [`crate::mcp::factory::select_kind`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP endpoint URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Extra request headers for `url` and `ws_url` servers.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    /// Sent as `Authorization: Bearer <token>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// Executable for a local stdio server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Arguments for `command`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    /// Environment overlay for `command`.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    /// WebSocket endpoint URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_url: Option<String>,
    /// Identifier assigned by the router, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    /// Keys this crate does not interpret; preserved on save.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ServerConfig {
    /// A server reached over HTTP at `url`.
    pub fn http(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// A local server spawned as `command args...`.
    pub fn stdio(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: Some(command.into()),
            args: Some(args),
            ..Self::default()
        }
    }

    /// A server reached over a WebSocket at `ws_url`.
    pub fn websocket(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: Some(ws_url.into()),
            ..Self::default()
        }
    }

    /// Set the bearer token.
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Add a request header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Add an environment variable for the child process.
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }
}

impl ClientConfig {
    /// Load configuration from `path` and apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`RouterUseError::Config`] if the file is missing, unreadable,
    /// or does not parse.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_vars();
        Ok(config)
    }

    /// Parse the file at `path` without applying overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(RouterUseError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| RouterUseError::Config(format!("Failed to read config file: {}", e)))?;

        if is_yaml(path) {
            serde_yaml::from_str(&contents)
                .map_err(|e| RouterUseError::Config(format!("Failed to parse config: {}", e)))
        } else {
            serde_json::from_str(&contents)
                .map_err(|e| RouterUseError::Config(format!("Failed to parse config: {}", e)))
        }
    }

    /// Build a configuration from an in-memory JSON document.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| RouterUseError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Write the configuration to `path` as pretty-printed JSON, or YAML for
    /// `.yaml`/`.yml` paths.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let contents = if is_yaml(path) {
            serde_yaml::to_string(self)?
        } else {
            serde_json::to_string_pretty(self)?
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply `MCP_ROUTER_URL` and `MCP_ROUTER_AUTH_TOKEN`.
    ///
    /// A router URL from the environment creates the router section when
    /// the file had none.
    pub fn apply_env_vars(&mut self) {
        if let Ok(router_url) = std::env::var(ENV_ROUTER_URL) {
            if !router_url.is_empty() {
                self.mcp_router
                    .get_or_insert_with(RouterConfig::default)
                    .router_url = router_url;
            }
        }

        if let Ok(token) = std::env::var(ENV_ROUTER_AUTH_TOKEN) {
            match self.mcp_router.as_mut() {
                Some(router) => router.auth_token = Some(token),
                None => {
                    tracing::debug!("{} set without a router URL; ignoring", ENV_ROUTER_AUTH_TOKEN)
                }
            }
        }
    }

    /// Check the configuration for problems detectable without I/O.
    ///
    /// # Errors
    ///
    /// Returns [`RouterUseError::Config`] for an empty router URL, an empty
    /// server name, or a server entry that matches no connector shape.
    pub fn validate(&self) -> Result<()> {
        if let Some(router) = &self.mcp_router {
            if router.router_url.trim().is_empty() {
                return Err(RouterUseError::Config(
                    "mcpRouter.router_url cannot be empty".to_string(),
                ));
            }
        }

        for (name, server) in &self.mcp_servers {
            if name.trim().is_empty() {
                return Err(RouterUseError::Config(
                    "Server names cannot be empty".to_string(),
                ));
            }
            // Servers behind the router need no transport keys of their own.
            if self.mcp_router.is_none() {
                crate::mcp::factory::select_kind(server).map_err(|e| match e {
                    RouterUseError::Config(msg) => {
                        RouterUseError::Config(format!("server `{}`: {}", name, msg))
                    }
                    other => other,
                })?;
            }
        }

        Ok(())
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        std::env::remove_var(ENV_ROUTER_URL);
        std::env::remove_var(ENV_ROUTER_AUTH_TOKEN);
    }

    #[test]
    fn test_parse_all_three_shapes() {
        let config = ClientConfig::from_value(serde_json::json!({
            "mcpServers": {
                "http": {"url": "http://localhost:3282/mcp", "auth_token": "t", "headers": {"X-A": "1"}},
                "local": {"command": "npx", "args": ["-y", "srv"], "env": {"DEBUG": "1"}},
                "ws": {"ws_url": "ws://localhost:9000"}
            }
        }))
        .unwrap();

        assert_eq!(config.mcp_servers.len(), 3);
        let http = &config.mcp_servers["http"];
        assert_eq!(http.url.as_deref(), Some("http://localhost:3282/mcp"));
        assert_eq!(http.auth_token.as_deref(), Some("t"));
        assert_eq!(http.headers["X-A"], "1");
        let local = &config.mcp_servers["local"];
        assert_eq!(local.args.as_deref(), Some(&["-y".to_string(), "srv".to_string()][..]));
        assert_eq!(local.env["DEBUG"], "1");
        assert!(config.mcp_router.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_unknown_keys_are_preserved() {
        let config = ClientConfig::from_value(serde_json::json!({
            "mcpServers": {"s": {"url": "http://h/mcp", "description": "kept"}}
        }))
        .unwrap();
        let server = &config.mcp_servers["s"];
        assert_eq!(server.extra["description"], "kept");

        let round = serde_json::to_value(&config).unwrap();
        assert_eq!(round["mcpServers"]["s"]["description"], "kept");
    }

    #[test]
    fn test_validate_rejects_shapeless_server() {
        let config = ClientConfig::from_value(serde_json::json!({
            "mcpServers": {"broken": {"headers": {"a": "b"}}}
        }))
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("broken"));
        assert!(err.to_string().contains("Cannot determine connector type"));
    }

    #[test]
    fn test_validate_allows_bare_servers_behind_router() {
        let config = ClientConfig::from_value(serde_json::json!({
            "mcpRouter": {"router_url": "http://localhost:3282"},
            "mcpServers": {"fs": {}}
        }))
        .unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_empty_router_url() {
        let config = ClientConfig {
            mcp_router: Some(RouterConfig::default()),
            ..ClientConfig::default()
        };
        assert!(matches!(config.validate(), Err(RouterUseError::Config(_))));
    }

    #[test]
    fn test_from_file_missing_is_config_error() {
        let err = ClientConfig::from_file("/nonexistent/mcp.json").unwrap_err();
        assert!(matches!(err, RouterUseError::Config(_)));
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_from_file_invalid_json_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = ClientConfig::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_yaml_file_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp.yaml");
        std::fs::write(
            &path,
            "mcpServers:\n  fs:\n    url: http://localhost:3282/mcp\n    auth_token: abc\n",
        )
        .unwrap();
        let config = ClientConfig::from_file(&path).unwrap();
        assert_eq!(config.mcp_servers["fs"].auth_token.as_deref(), Some("abc"));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("mcp.json");

        let mut config = ClientConfig::default();
        config.mcp_servers.insert(
            "fs".to_string(),
            ServerConfig::http("http://localhost:3282/mcp").with_auth_token("tok"),
        );
        config.save(&path).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["mcpServers"]["fs"]["url"], "http://localhost:3282/mcp");
        assert!(raw.get("mcpRouter").is_none());

        assert_eq!(ClientConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    #[serial]
    fn test_env_router_url_creates_router_section() {
        clear_env();
        std::env::set_var(ENV_ROUTER_URL, "http://router:3282");
        std::env::set_var(ENV_ROUTER_AUTH_TOKEN, "env-token");

        let mut config = ClientConfig::default();
        config.apply_env_vars();
        clear_env();

        let router = config.mcp_router.unwrap();
        assert_eq!(router.router_url, "http://router:3282");
        assert_eq!(router.auth_token.as_deref(), Some("env-token"));
    }

    #[test]
    #[serial]
    fn test_env_token_without_router_is_ignored() {
        clear_env();
        std::env::set_var(ENV_ROUTER_AUTH_TOKEN, "env-token");
        let mut config = ClientConfig::default();
        config.apply_env_vars();
        clear_env();
        assert!(config.mcp_router.is_none());
    }

    #[test]
    #[serial]
    fn test_load_applies_env_over_file() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp.json");
        std::fs::write(
            &path,
            r#"{"mcpRouter":{"router_url":"http://file:1","auth_token":"file"},"mcpServers":{}}"#,
        )
        .unwrap();

        std::env::set_var(ENV_ROUTER_AUTH_TOKEN, "env");
        let config = ClientConfig::load(&path).unwrap();
        clear_env();

        let router = config.mcp_router.unwrap();
        assert_eq!(router.router_url, "http://file:1");
        assert_eq!(router.auth_token.as_deref(), Some("env"));
    }
}
