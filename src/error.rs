//! Error types for mcp-router-use
//!
//! Every fallible operation in the library returns [`Result`], whose error
//! side is [`RouterUseError`]. The variants follow the failure taxonomy of the
//! connection stack: configuration problems are caught before any I/O,
//! transport failures surface as [`RouterUseError::Connection`], and
//! server-reported failures keep the server's code and message.

use thiserror::Error;

use crate::mcp::types::JsonRpcError;

/// Main error type for mcp-router-use operations
#[derive(Error, Debug)]
pub enum RouterUseError {
    /// Malformed or ambiguous configuration. Raised before any I/O happens.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The transport could not be opened, or it closed while a request was
    /// outstanding.
    #[error("Connection error: {0}")]
    Connection(String),

    /// No response arrived within the request deadline. The connection stays
    /// usable.
    #[error("MCP timeout waiting for `{method}` after {timeout_ms} ms")]
    Timeout {
        /// The JSON-RPC method that timed out
        method: String,
        /// The deadline that elapsed, in milliseconds
        timeout_ms: u64,
    },

    /// A well-formed JSON-RPC error envelope returned by the server.
    #[error("Remote error {code}: {message}")]
    Remote {
        /// Server-supplied error code
        code: i64,
        /// Server-supplied error message
        message: String,
        /// Optional server-supplied error data
        data: Option<serde_json::Value>,
    },

    /// An operation was invoked in a session state that does not permit it.
    #[error("Protocol state error: cannot {operation} while session is {state}")]
    ProtocolState {
        /// The operation that was attempted
        operation: &'static str,
        /// The state the session was in
        state: String,
    },

    /// The server answered the handshake with something the client cannot use.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The requested tool is not in the session's current catalog.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl RouterUseError {
    /// Build a [`RouterUseError::Remote`] from a JSON-RPC error object.
    pub fn remote(error: JsonRpcError) -> Self {
        Self::Remote {
            code: error.code,
            message: error.message,
            data: error.data,
        }
    }

    /// Whether this error means the underlying connection is gone.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

/// Result type alias for mcp-router-use operations
pub type Result<T> = std::result::Result<T, RouterUseError>;
