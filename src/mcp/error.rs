//! MCP client error types.

use thiserror::Error;

use super::client::ClientState;

/// Errors raised by the transport, protocol client and tool registry.
#[derive(Debug, Error)]
pub enum McpError {
    /// The server configuration could not be read or parsed.
    #[error("config error: {reason}")]
    Config { reason: String },

    /// The server executable could not be started.
    #[error("failed to spawn server '{server}': {reason}")]
    Spawn { server: String, reason: String },

    /// Writing to or reading from the server's pipes failed.
    #[error("transport error for server '{server}': {reason}")]
    Transport { server: String, reason: String },

    /// The server answered with a JSON-RPC error object.
    #[error("server '{server}' returned error [{code}]: {message}")]
    Protocol {
        server: String,
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// A reply did not have the expected shape.
    #[error("malformed response from server '{server}': {reason}")]
    MalformedResponse { server: String, reason: String },

    /// A reply answered a different request than the one in flight.
    #[error("server '{server}' answered request {actual} while {expected} was outstanding")]
    ResponseIdMismatch {
        server: String,
        expected: String,
        actual: String,
    },

    /// The operation is not allowed in the client's current state.
    #[error("cannot {operation} server '{server}' while {state}")]
    InvalidState {
        server: String,
        operation: &'static str,
        state: ClientState,
    },

    /// No reply arrived before the deadline.
    #[error("{operation} on server '{server}' timed out after {timeout_ms}ms")]
    Timeout {
        server: String,
        operation: String,
        timeout_ms: u64,
    },

    /// The wait was abandoned because shutdown was requested.
    #[error("{operation} on server '{server}' was cancelled")]
    Cancelled { server: String, operation: String },

    /// The child process could not be confirmed terminated.
    #[error("failed to tear down server '{server}': {reason}")]
    Teardown { server: String, reason: String },

    /// Two servers advertised the same tool name under the fail-fast policy.
    #[error("tool '{tool}' is advertised by both '{first}' and '{second}'")]
    ToolNameCollision {
        tool: String,
        first: String,
        second: String,
    },
}

impl McpError {
    /// Name of the server the error relates to, if any.
    pub fn server(&self) -> Option<&str> {
        match self {
            Self::Spawn { server, .. }
            | Self::Transport { server, .. }
            | Self::Protocol { server, .. }
            | Self::MalformedResponse { server, .. }
            | Self::ResponseIdMismatch { server, .. }
            | Self::InvalidState { server, .. }
            | Self::Timeout { server, .. }
            | Self::Cancelled { server, .. }
            | Self::Teardown { server, .. } => Some(server),
            Self::Config { .. } | Self::ToolNameCollision { .. } => None,
        }
    }

    /// Whether the error describes a reply whose shape could not be trusted.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Self::MalformedResponse { .. } | Self::ResponseIdMismatch { .. }
        )
    }
}
