//! `read_file`: read a UTF-8 text file from the workspace.

use async_trait::async_trait;
use clawloop_core::error::ToolError;
use clawloop_core::tool::{Tool, ToolArguments, ToolParameter, ToolResult};

use crate::required_str;
use crate::sandbox::Workspace;

/// Largest file `read_file` returns.
pub const MAX_READ_BYTES: u64 = 1024 * 1024;

pub struct FileReadTool {
    workspace: Workspace,
}

impl FileReadTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a text file in the workspace."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::string("path", "Path of the file to read")]
    }

    async fn execute(&self, arguments: ToolArguments) -> Result<ToolResult, ToolError> {
        let path = required_str(&arguments, self.name(), "path")?;
        let resolved = self.workspace.resolve(self.name(), path)?;

        let meta = tokio::fs::metadata(&resolved)
            .await
            .map_err(|e| ToolError::failed(self.name(), format!("cannot read '{path}': {e}")))?;
        if meta.is_dir() {
            return Err(ToolError::failed(
                self.name(),
                format!("'{path}' is a directory, use list_dir"),
            ));
        }
        if meta.len() > MAX_READ_BYTES {
            return Err(ToolError::failed(
                self.name(),
                format!(
                    "'{path}' is {} bytes, limit is {MAX_READ_BYTES} bytes",
                    meta.len()
                ),
            ));
        }

        let content = tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| ToolError::failed(self.name(), format!("cannot read '{path}': {e}")))?;
        Ok(ToolResult::ok(content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn args(v: serde_json::Value) -> ToolArguments {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn tool_definition() {
        let dir = TempDir::new().unwrap();
        let tool = FileReadTool::new(Workspace::new(dir.path(), true));
        let def = tool.definition();
        assert_eq!(def.name, "read_file");
        assert_eq!(def.json_schema()["required"], json!(["path"]));
    }

    #[tokio::test]
    async fn reads_existing_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "Hello, world!\n").unwrap();
        let tool = FileReadTool::new(Workspace::new(dir.path(), true));

        let result = tool.execute(args(json!({"path": "hello.txt"}))).await.unwrap();
        assert!(result.success);
        assert_eq!(result.output, "Hello, world!\n");
    }

    #[tokio::test]
    async fn missing_file_fails() {
        let dir = TempDir::new().unwrap();
        let tool = FileReadTool::new(Workspace::new(dir.path(), true));
        let err = tool.execute(args(json!({"path": "nope.txt"}))).await.unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed { .. }));
        assert!(err.to_string().contains("nope.txt"));
    }

    #[tokio::test]
    async fn oversized_file_is_refused() {
        let dir = TempDir::new().unwrap();
        let big = vec![b'a'; MAX_READ_BYTES as usize + 1];
        std::fs::write(dir.path().join("big.txt"), big).unwrap();
        let tool = FileReadTool::new(Workspace::new(dir.path(), true));
        let err = tool.execute(args(json!({"path": "big.txt"}))).await.unwrap_err();
        assert!(err.to_string().contains("limit"));
    }

    #[tokio::test]
    async fn traversal_blocked() {
        let dir = TempDir::new().unwrap();
        let tool = FileReadTool::new(Workspace::new(dir.path(), true));
        let err = tool
            .execute(args(json!({"path": "../../../etc/passwd"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::PermissionDenied { .. }));
    }
}
