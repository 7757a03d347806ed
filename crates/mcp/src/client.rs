//! MCP client implementation.
//!
//! Speaks to one server over a pluggable transport: performs the initialize
//! handshake, discovers tools, and invokes them via `tools/call`.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use marshal_core::{McpServerDecl, TransportKind};
use marshal_runtime::tool::ToolDescriptor;

use crate::error::McpError;
use crate::transport::{McpTransport, SubprocessTransport};
use crate::types::*;

struct ClientState {
    transport: Box<dyn McpTransport>,
    next_id: i64,
}

/// An MCP client bound to one server.
///
/// Tool discovery happens once at connect time; invocation is serialized per
/// client (one request/response in flight at a time).
pub struct McpClient {
    server_name: String,
    state: Mutex<ClientState>,
    tools: HashMap<String, ToolInfo>,
}

impl McpClient {
    /// Connect over an established transport: handshake, then discovery.
    pub async fn connect(
        transport: Box<dyn McpTransport>,
        server_name: impl Into<String>,
    ) -> Result<Self, McpError> {
        let mut client = Self {
            server_name: server_name.into(),
            state: Mutex::new(ClientState {
                transport,
                next_id: 1,
            }),
            tools: HashMap::new(),
        };

        client.initialize().await?;
        client.discover_tools().await?;
        Ok(client)
    }

    /// Spawn and connect the server a config declaration describes.
    /// Disabled servers are never spawned.
    pub async fn from_decl(decl: &McpServerDecl) -> Result<Self, McpError> {
        if !decl.enabled {
            return Err(McpError::ServerUnavailable(format!(
                "server '{}' is disabled",
                decl.name
            )));
        }
        match decl.transport {
            TransportKind::Stdio => {
                let transport = SubprocessTransport::from_decl(decl)?;
                Self::connect(Box::new(transport), decl.name.clone()).await
            }
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Send a JSON-RPC request and wait for its response, skipping any
    /// server-initiated notifications in between.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse, McpError> {
        let mut state = self.state.lock().await;

        let id = state.next_id;
        state.next_id += 1;

        let request = JsonRpcRequest::new(RpcId::Number(id), method, params);
        let json = serde_json::to_string(&request)?;

        debug!(method = %method, id = id, "sending request");
        state.transport.send(&json).await?;

        loop {
            let line = state.transport.receive().await?.ok_or_else(|| {
                McpError::ServerUnavailable("connection closed mid-request".to_string())
            })?;

            let value: Value = serde_json::from_str(&line)?;
            if value.get("id").is_none() {
                debug!("skipping server notification");
                continue;
            }
            return Ok(serde_json::from_value(value)?);
        }
    }

    /// Send a JSON-RPC notification (no response expected).
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let notification = JsonRpcNotification::new(method, params);
        let json = serde_json::to_string(&notification)?;
        let mut state = self.state.lock().await;
        state.transport.send(&json).await
    }

    /// Perform the MCP initialization handshake.
    async fn initialize(&mut self) -> Result<(), McpError> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "marshal-mcp-client",
                "version": env!("CARGO_PKG_VERSION")
            }
        });

        let resp = self.request("initialize", Some(params)).await?;
        if let Some(err) = resp.error {
            return Err(McpError::ServerUnavailable(err.message));
        }

        self.notify("notifications/initialized", None).await?;

        info!(server = %self.server_name, "MCP client initialized");
        Ok(())
    }

    /// Discover available tools from the server.
    async fn discover_tools(&mut self) -> Result<(), McpError> {
        let resp = self.request("tools/list", None).await?;
        if let Some(err) = resp.error {
            return Err(McpError::ServerUnavailable(err.message));
        }

        let result: ListToolsResult = serde_json::from_value(
            resp.result
                .ok_or_else(|| McpError::InvalidParams("missing result".to_string()))?,
        )?;

        self.tools.clear();
        for tool in result.tools {
            debug!(name = %tool.name, "discovered tool");
            self.tools.insert(tool.name.clone(), tool);
        }

        info!(server = %self.server_name, count = self.tools.len(), "tool discovery complete");
        Ok(())
    }

    /// Call a tool on the remote server.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, McpError> {
        let params = serde_json::json!({
            "name": name,
            "arguments": arguments,
        });

        let resp = self.request("tools/call", Some(params)).await?;
        if let Some(err) = resp.error {
            return Err(McpError::ToolExecution(err.message));
        }

        let result: CallToolResult = serde_json::from_value(
            resp.result
                .ok_or_else(|| McpError::InvalidParams("missing result".to_string()))?,
        )?;

        Ok(result)
    }

    /// The list of discovered tool descriptors, for the catalog.
    pub fn tool_descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools
            .values()
            .cloned()
            .map(ToolDescriptor::from)
            .collect()
    }

    /// The list of discovered tool info objects.
    pub fn tool_infos(&self) -> Vec<&ToolInfo> {
        self.tools.values().collect()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::connected_client;
    use super::*;

    #[tokio::test]
    async fn test_connect_discovers_tools() {
        let client = connected_client().await;
        assert_eq!(client.server_name(), "fake-server");

        let descriptors = client.tool_descriptors();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].name, "web_search");
    }

    #[tokio::test]
    async fn test_call_tool_returns_ordered_blocks() {
        let client = connected_client().await;
        let result = client
            .call_tool("web_search", serde_json::json!({"query": "rust"}))
            .await
            .unwrap();

        assert!(!result.is_error);
        assert_eq!(result.content.len(), 3);
        assert!(matches!(result.content[0], ToolContent::Text { .. }));
        assert!(matches!(result.content[1], ToolContent::Blob { .. }));
    }

    #[tokio::test]
    async fn test_call_tool_maps_is_error() {
        let client = connected_client().await;
        let result = client
            .call_tool("failing_tool", serde_json::json!({}))
            .await
            .unwrap();
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn test_disabled_server_never_spawned() {
        let decl = McpServerDecl {
            name: "disabled".to_string(),
            transport: TransportKind::Stdio,
            command: "does-not-exist".to_string(),
            args: vec![],
            enabled: false,
        };
        let err = match McpClient::from_decl(&decl).await {
            Ok(_) => panic!("expected disabled server to not be spawned"),
            Err(e) => e,
        };
        assert!(matches!(err, McpError::ServerUnavailable(_)));
    }
}
