//! Error types for the MCP crate.

/// Errors that can occur during MCP client operations.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    /// Failed to parse JSON.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Transport I/O error.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Invalid parameters or a malformed response.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// Tool execution failed on the server.
    #[error("tool execution failed: {0}")]
    ToolExecution(String),

    /// The server process exited, refused the handshake, or is unreachable.
    #[error("server unavailable: {0}")]
    ServerUnavailable(String),
}
