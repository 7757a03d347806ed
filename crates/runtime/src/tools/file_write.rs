//! File writing tool with parent directory creation.

use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::tool::{Tool, ToolAccess, ToolContext, ToolDescriptor, ToolError, ToolOutcome};

/// Write or create files, creating parent directories as needed.
pub struct FileWriteTool;

impl FileWriteTool {
    fn resolve(root: &Path, requested: &str) -> PathBuf {
        if Path::new(requested).is_absolute() {
            PathBuf::from(requested)
        } else {
            root.join(requested)
        }
    }
}

#[async_trait]
impl Tool for FileWriteTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "file_write".to_string(),
            description: "Write content to a file, creating parent directories if needed."
                .to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "File path to write (relative to working directory or absolute)"
                    },
                    "content": {
                        "type": "string",
                        "description": "Content to write to the file"
                    }
                },
                "required": ["path", "content"]
            }),
        }
    }

    fn access(&self, input: &Value, context: &ToolContext) -> ToolAccess {
        match input.get("path").and_then(|v| v.as_str()) {
            Some(path) => ToolAccess::Write(Self::resolve(&context.root, path)),
            None => ToolAccess::Write(context.root.clone()),
        }
    }

    async fn execute(
        &self,
        input: Value,
        context: &ToolContext,
    ) -> Result<ToolOutcome, ToolError> {
        let path_str = input
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidInput("missing 'path' field".to_string()))?;

        let content = input
            .get("content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidInput("missing 'content' field".to_string()))?;

        let path = Self::resolve(&context.root, path_str);

        debug!(path = %path.display(), bytes = content.len(), "writing file");

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                ToolError::ExecutionFailed(format!(
                    "failed to create parent directories for '{}': {e}",
                    path.display()
                ))
            })?;
        }

        tokio::fs::write(&path, content).await.map_err(|e| {
            ToolError::ExecutionFailed(format!("failed to write '{}': {e}", path.display()))
        })?;

        Ok(ToolOutcome::success(
            String::new(),
            format!("Wrote {} bytes to {}", content.len(), path.display()),
        ))
    }
}
