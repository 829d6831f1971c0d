//! Error types for the Minecraft agent bridge

use crate::ids::ConnectionId;
use thiserror::Error;

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Bridge error types
///
/// A command that reached the game but got no reply is not an error; see
/// `CommandReply::TimedOut` in `mc-bridge`.
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    /// No Minecraft client is connected
    #[error("No active connection")]
    NoActiveConnection,

    /// Explicit target connection is not registered
    #[error("Connection not found: {0}")]
    ConnectionNotFound(ConnectionId),

    /// Connection closed while the operation was in flight
    #[error("Connection closed: {0}")]
    ConnectionClosed(ConnectionId),

    /// Frame could not be written, retries included
    #[error("Send to {connection} failed after {attempts} attempt(s): {reason}")]
    SendFailed {
        connection: ConnectionId,
        attempts: u32,
        reason: String,
    },

    /// Transport-level failure (socket reset, write error)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Unexpected frame or message shape
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Tool is not registered
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Tool parameters did not match the tool's schema
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// Event handler failed
    #[error("Handler error: {0}")]
    Handler(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Transport(err.to_string())
    }
}

/// JSON-RPC error codes for the MCP surface
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    pub const NO_ACTIVE_CONNECTION: i32 = -32000;
    pub const CONNECTION_NOT_FOUND: i32 = -32001;
    pub const SEND_FAILED: i32 = -32002;
    pub const TOOL_NOT_FOUND: i32 = -32003;
}

impl BridgeError {
    /// JSON-RPC code reported for this error
    pub fn code(&self) -> i32 {
        match self {
            BridgeError::NoActiveConnection => error_codes::NO_ACTIVE_CONNECTION,
            BridgeError::ConnectionNotFound(_) => error_codes::CONNECTION_NOT_FOUND,
            BridgeError::ConnectionClosed(_) | BridgeError::SendFailed { .. } => {
                error_codes::SEND_FAILED
            }
            BridgeError::ToolNotFound(_) => error_codes::TOOL_NOT_FOUND,
            BridgeError::InvalidParams(_) | BridgeError::Serialization(_) => {
                error_codes::INVALID_PARAMS
            }
            _ => error_codes::INTERNAL_ERROR,
        }
    }
}
