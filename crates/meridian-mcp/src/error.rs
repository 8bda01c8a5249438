//! MCP orchestration error types.

use thiserror::Error;

/// Errors that can occur while orchestrating MCP servers.
#[derive(Debug, Error)]
pub enum McpError {
    /// A server failed to start or complete the handshake.
    #[error("Failed to connect MCP server {name}: {reason}")]
    ConnectFailed {
        /// The server name.
        name: String,
        /// Reason for failure.
        reason: String,
    },

    /// A connection attempt was made for a server that is already connected.
    #[error("MCP server already connected: {name}")]
    AlreadyConnected {
        /// The server name.
        name: String,
    },

    /// No configuration is known for the server.
    #[error("MCP server not configured: {name}")]
    ServerNotFound {
        /// The server name.
        name: String,
    },

    /// The addressed server is absent or not in the `connected` state.
    #[error("MCP server not connected: {name}")]
    ServerNotConnected {
        /// The server name.
        name: String,
    },

    /// The server did not negotiate the capability the call needs.
    #[error("MCP server {server} does not support {capability}")]
    CapabilityNotSupported {
        /// Server name.
        server: String,
        /// Capability name (`tools`, `resources`, `prompts`, `sampling`).
        capability: &'static str,
    },

    /// The connected server returned a protocol-level error.
    #[error("{operation} failed on {server}: {reason}")]
    RemoteCallFailed {
        /// Server name.
        server: String,
        /// Operation that failed (e.g. `tools/call read_file`).
        operation: String,
        /// Underlying failure.
        reason: String,
    },

    /// A call exceeded its deadline. The connection stays usable.
    #[error("{operation} on {server} timed out after {timeout_ms}ms")]
    Timeout {
        /// Server name.
        server: String,
        /// Operation that timed out.
        operation: String,
        /// Deadline in milliseconds.
        timeout_ms: u64,
    },

    /// Elicitation data violates its schema.
    #[error("Elicitation data failed validation: {}", errors.join("; "))]
    ValidationFailed {
        /// Every violation found, in schema order.
        errors: Vec<String>,
    },

    /// The designated inference server is not connected.
    #[error("Inference server {server} is not connected")]
    InferenceServerUnavailable {
        /// The inference server name.
        server: String,
    },

    /// Fulfilling a sampling request failed.
    #[error("Sampling via {server} failed: {reason}")]
    SamplingFailed {
        /// The inference server name.
        server: String,
        /// Underlying failure.
        reason: String,
    },

    /// A root URI could not be converted.
    #[error("Invalid root URI {uri}: {reason}")]
    InvalidRootUri {
        /// The offending URI.
        uri: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl McpError {
    /// Whether this error is a deadline expiry.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether this error means the addressed server is not connected.
    #[must_use]
    pub fn is_not_connected(&self) -> bool {
        matches!(
            self,
            Self::ServerNotConnected { .. } | Self::InferenceServerUnavailable { .. }
        )
    }
}

impl From<serde_json::Error> for McpError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

/// Result type for MCP operations.
pub type McpResult<T> = Result<T, McpError>;
