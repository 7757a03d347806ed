//! `Tool` adapter for discovered remote tools.
//!
//! Each remote tool wraps the shared client for its server. Content blocks
//! are flattened into the textual outcome (binary blocks render as a
//! placeholder naming mime type and size) and the server's error flag maps
//! onto the outcome's error field. Remote tools report no local resource
//! access; the approval set still applies to them by tool name.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use marshal_runtime::tool::{
    Tool, ToolAccess, ToolContext, ToolDescriptor, ToolError, ToolOutcome,
};

use crate::client::McpClient;
use crate::types::{ToolContent, ToolInfo};

pub struct RemoteTool {
    client: Arc<McpClient>,
    info: ToolInfo,
}

impl RemoteTool {
    pub fn new(client: Arc<McpClient>, info: ToolInfo) -> Self {
        Self { client, info }
    }

    fn flatten(content: &[ToolContent]) -> String {
        content
            .iter()
            .map(|block| match block {
                ToolContent::Text { text } => text.clone(),
                ToolContent::Blob { data, mime_type } => {
                    // base64 expands 3 bytes into 4 characters
                    format!("[binary block: {mime_type}, ~{} bytes]", data.len() * 3 / 4)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl Tool for RemoteTool {
    fn descriptor(&self) -> ToolDescriptor {
        self.info.clone().into()
    }

    fn access(&self, _input: &Value, _context: &ToolContext) -> ToolAccess {
        ToolAccess::None
    }

    async fn execute(
        &self,
        input: Value,
        _context: &ToolContext,
    ) -> Result<ToolOutcome, ToolError> {
        debug!(server = %self.client.server_name(), tool = %self.info.name, "calling remote tool");

        let result = self
            .client
            .call_tool(&self.info.name, input)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        Ok(ToolOutcome {
            call_id: String::new(),
            content: Self::flatten(&result.content),
            is_error: result.is_error,
        })
    }
}

/// Wrap every tool a connected client discovered, ready for catalog
/// registration as remote tools.
pub fn remote_tools(client: &Arc<McpClient>) -> Vec<Arc<dyn Tool>> {
    client
        .tool_infos()
        .into_iter()
        .cloned()
        .map(|info| Arc::new(RemoteTool::new(client.clone(), info)) as Arc<dyn Tool>)
        .collect()
}
