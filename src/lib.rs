//! mcp-router-use - MCP client library
//!
//! This library connects to Model Context Protocol servers, either through
//! an MCP Router endpoint or directly to a local subprocess or a WebSocket
//! server, and exposes their tools.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `mcp`: transports, request correlation, connector selection and the
//!   session state machine
//! - `client`: multi-server session manager and router endpoint resolution
//! - `config`: configuration file model, loading and environment overrides
//! - `logging`: debug level knob and tracing setup
//! - `error`: Error types and result aliases
//! - `cli` / `commands`: command-line interface definition and handlers
//!
//! # Example
//!
//! ```no_run
//! use mcp_router_use::{ClientConfig, McpClient};
//!
//! #[tokio::main]
//! async fn main() -> mcp_router_use::Result<()> {
//!     let config = ClientConfig::load("mcp.json")?;
//!     config.validate()?;
//!
//!     let mut client = McpClient::new(config);
//!     let session = client.create_session("filesystem", true).await?;
//!     let response = session
//!         .call_tool("read_file", serde_json::json!({ "path": "README.md" }))
//!         .await?;
//!     println!("{}", response.text());
//!     client.close_all_sessions().await
//! }
//! ```

pub mod cli;
pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod mcp;

// Re-export commonly used types
pub use client::{EndpointResolver, McpClient, ResolvedEndpoint, RouterEndpointResolver};
pub use config::{ClientConfig, RouterConfig, ServerConfig};
pub use error::{Result, RouterUseError};
pub use mcp::{create_connector, Connector, Session, SessionState, TransportKind};
