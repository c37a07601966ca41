//! MCP (Model Context Protocol) client stack
//!
//! The implementation targets protocol revision **2025-11-25** and accepts
//! servers that negotiate **2025-03-26** or **2024-11-05**.
//!
//! # Module Layout
//!
//! - `types`     -- JSON-RPC 2.0 envelopes and the MCP types the client uses
//! - `transport` -- `Transport` trait and concrete implementations (stdio,
//!   WebSocket, HTTP, fake)
//! - `connector` -- request/response correlation over one transport
//! - `factory`   -- maps a server config to the right connector
//! - `session`   -- handshake, tool discovery and tool invocation

pub mod connector;
pub mod factory;
pub mod session;
pub mod transport;
pub mod types;

pub use connector::{Connector, HttpConnector, StreamConnector, DEFAULT_REQUEST_TIMEOUT};
pub use factory::{create_connector, select_kind};
pub use session::{Session, SessionState, ToolCatalog};
pub use transport::TransportKind;
