//! Remote tool boundary over the Model Context Protocol.
//!
//! Implements the client side of MCP (JSON-RPC 2.0 over newline-delimited
//! JSON): the initialize handshake, tool discovery, and `tools/call`
//! invocation. Remote tools surface inside the runtime through the
//! [`RemoteTool`] adapter, which implements the runtime's `Tool` trait and
//! flattens content blocks into textual outcomes.
//!
//! - **types**: JSON-RPC 2.0 and MCP-specific protocol types
//! - **transport**: pluggable transport (server subprocess stdio, channels)
//! - **client**: MCP client speaking to one server
//! - **remote**: `Tool` adapter for discovered remote tools
//! - **error**: unified error type

pub mod client;
pub mod error;
pub mod remote;
pub mod transport;
pub mod types;

pub use client::McpClient;
pub use error::McpError;
pub use remote::{remote_tools, RemoteTool};
pub use transport::{ChannelTransport, McpTransport, SubprocessTransport};
pub use types::*;
