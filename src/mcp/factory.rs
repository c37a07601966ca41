//! Connector selection from server configuration
//!
//! [`create_connector`] maps a [`ServerConfig`] to the matching
//! [`Connector`] by first-match precedence on key presence:
//!
//! 1. `url` -> HTTP endpoint connector
//! 2. `command` and `args` -> stdio connector (legacy, local only)
//! 3. `ws_url` -> WebSocket connector
//!
//! The order is fixed; a config carrying keys for several shapes gets the
//! first one in this list. No I/O happens here.

use std::collections::HashMap;
use std::time::Duration;

use crate::config::ServerConfig;
use crate::error::{Result, RouterUseError};
use crate::mcp::connector::{Connector, HttpConnector, StreamConnector, DEFAULT_REQUEST_TIMEOUT};
use crate::mcp::transport::http::HttpTransport;
use crate::mcp::transport::stdio::StdioTransport;
use crate::mcp::transport::websocket::WebSocketTransport;
use crate::mcp::transport::TransportKind;

/// Decide which transport a server config selects.
///
/// # Errors
///
/// Returns [`RouterUseError::Config`] when no shape matches.
///
/// # Examples
///
/// ```
/// use mcp_router_use::config::ServerConfig;
/// use mcp_router_use::mcp::factory::select_kind;
/// use mcp_router_use::mcp::transport::TransportKind;
///
/// let mut cfg = ServerConfig::stdio("npx", vec![]);
/// cfg.url = Some("http://localhost:3282/mcp".into());
/// assert_eq!(select_kind(&cfg).unwrap(), TransportKind::Http);
/// ```
pub fn select_kind(config: &ServerConfig) -> Result<TransportKind> {
    if config.url.is_some() {
        Ok(TransportKind::Http)
    } else if config.command.is_some() && config.args.is_some() {
        Ok(TransportKind::Stdio)
    } else if config.ws_url.is_some() {
        Ok(TransportKind::WebSocket)
    } else {
        Err(RouterUseError::Config(
            "Cannot determine connector type from config. Expected 'url' for MCP Router \
             connection, 'command' and 'args' for a local process, or 'ws_url' for a WebSocket."
                .to_string(),
        ))
    }
}

/// Build the connector for `config` with the default request timeout.
pub fn create_connector(config: &ServerConfig) -> Result<Connector> {
    create_connector_with_timeout(config, DEFAULT_REQUEST_TIMEOUT)
}

/// Build the connector for `config`; requests default to `request_timeout`.
///
/// # Errors
///
/// Returns [`RouterUseError::Config`] when no shape matches or the HTTP
/// client cannot be built.
pub fn create_connector_with_timeout(
    config: &ServerConfig,
    request_timeout: Duration,
) -> Result<Connector> {
    let connector = match select_kind(config)? {
        TransportKind::Http => {
            let url = config.url.clone().unwrap_or_default();
            http_connector(url, config.headers.clone(), config.auth_token.clone(), request_timeout)?
        }
        TransportKind::Stdio => {
            let command = config.command.clone().unwrap_or_default();
            tracing::warn!(
                command = %command,
                "stdio connectors are a legacy path; prefer an MCP Router endpoint in production"
            );
            let transport = StdioTransport::new(
                command,
                config.args.clone().unwrap_or_default(),
                config.env.clone(),
            );
            StreamConnector::new(transport, TransportKind::Stdio)
                .with_request_timeout(request_timeout)
                .into()
        }
        TransportKind::WebSocket => {
            let transport = WebSocketTransport::new(
                config.ws_url.clone().unwrap_or_default(),
                config.headers.clone(),
                config.auth_token.clone(),
            );
            StreamConnector::new(transport, TransportKind::WebSocket)
                .with_request_timeout(request_timeout)
                .into()
        }
        TransportKind::Fake => {
            return Err(RouterUseError::Config(
                "the fake transport cannot be built from a server config".to_string(),
            ))
        }
    };
    Ok(connector)
}

/// Build an HTTP endpoint connector directly.
pub fn http_connector(
    url: impl Into<String>,
    headers: HashMap<String, String>,
    auth_token: Option<String>,
    request_timeout: Duration,
) -> Result<Connector> {
    let transport = HttpTransport::new(url, headers, auth_token)?;
    Ok(HttpConnector::new(transport)
        .with_request_timeout(request_timeout)
        .into())
}
