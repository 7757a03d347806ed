use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;

/// Describes a tool's interface for model consumption.
///
/// The schema is a JSON-Schema-shaped object passed verbatim to the provider
/// adapters; the agent loop never interprets it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique tool name (e.g., "shell_execute", "file_read")
    pub name: String,
    /// Human-readable description for the model
    pub description: String,
    /// JSON Schema describing the expected input
    pub input_schema: Value,
}

/// The model requesting execution of a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique ID for this invocation (used to match results)
    pub id: String,
    /// Tool name to execute
    pub name: String,
    /// Decoded JSON arguments
    pub arguments: Value,
}

/// Result of one tool call, fed back to the model. Exactly one is produced
/// per [`ToolCall`] before the next provider turn is issued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    /// Must match the ToolCall id
    pub call_id: String,
    /// Result content
    pub content: String,
    /// Whether this result represents an error
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn success(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: true,
        }
    }
}

/// The kind of side-effecting action a tool call performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Read,
    Write,
    Execute,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Read => "read",
            ActionKind::Write => "write",
            ActionKind::Execute => "execute",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a tool call will touch, derived by the tool from its own arguments.
///
/// The agent loop never parses tool inputs itself; it asks the tool and hands
/// the classification to the permission engine. `None` (remote tools and pure
/// computations) skips pattern evaluation but is still subject to the
/// approval-required set by tool name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolAccess {
    Read(PathBuf),
    Write(PathBuf),
    Execute(String),
    None,
}

/// Context passed to tool execution.
pub struct ToolContext {
    /// Sandbox root for file and shell operations. Relative tool paths
    /// resolve against it; the permission engine denies anything escaping it.
    pub root: PathBuf,
}

/// The primary extension point: all tools implement this trait.
///
/// Tools are object-safe, Send + Sync, and async.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Returns the tool's descriptor (name, description, JSON Schema).
    fn descriptor(&self) -> ToolDescriptor;

    /// Classify what this call would touch, from the given input. Called
    /// before execution; must not perform I/O.
    fn access(&self, input: &Value, context: &ToolContext) -> ToolAccess;

    /// Execute the tool with the given JSON input.
    async fn execute(&self, input: Value, context: &ToolContext)
        -> Result<ToolOutcome, ToolError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("timeout after {0:?}")]
    Timeout(std::time::Duration),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl fmt::Display for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.description)
    }
}

/// Simple echo tool for testing purposes. No local resource access.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "echo".to_string(),
            description: "Echoes back the input message. For testing.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "message": {
                        "type": "string",
                        "description": "The message to echo back"
                    }
                },
                "required": ["message"]
            }),
        }
    }

    fn access(&self, _input: &Value, _context: &ToolContext) -> ToolAccess {
        ToolAccess::None
    }

    async fn execute(
        &self,
        input: Value,
        _context: &ToolContext,
    ) -> Result<ToolOutcome, ToolError> {
        let message = input
            .get("message")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidInput("missing 'message' field".to_string()))?;

        Ok(ToolOutcome::success(String::new(), message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_serialization() {
        let def = ToolDescriptor {
            name: "test_tool".to_string(),
            description: "A test tool".to_string(),
            input_schema: serde_json::json!({"type": "object"}),
        };
        let json = serde_json::to_string(&def).unwrap();
        let roundtrip: ToolDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(roundtrip.name, "test_tool");
    }

    #[test]
    fn test_tool_call_serialization() {
        let call = ToolCall {
            id: "call_001".to_string(),
            name: "echo".to_string(),
            arguments: serde_json::json!({"message": "hello"}),
        };
        let json = serde_json::to_string(&call).unwrap();
        let roundtrip: ToolCall = serde_json::from_str(&json).unwrap();
        assert_eq!(roundtrip.id, "call_001");
        assert_eq!(roundtrip.name, "echo");
    }

    #[test]
    fn test_outcome_constructors() {
        let ok = ToolOutcome::success("call_1", "fine");
        assert!(!ok.is_error);
        let err = ToolOutcome::error("call_1", "broken");
        assert!(err.is_error);
        assert_eq!(err.call_id, "call_1");
    }

    #[tokio::test]
    async fn test_echo_tool() {
        let tool = EchoTool;
        assert_eq!(tool.descriptor().name, "echo");

        let ctx = ToolContext {
            root: std::path::PathBuf::from("/tmp"),
        };
        let input = serde_json::json!({"message": "hello world"});
        assert_eq!(tool.access(&input, &ctx), ToolAccess::None);

        let result = tool.execute(input, &ctx).await.unwrap();
        assert_eq!(result.content, "hello world");
        assert!(!result.is_error);
    }
}
