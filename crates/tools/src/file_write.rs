//! `write_file`: create or overwrite a file in the workspace.

use async_trait::async_trait;
use clawloop_core::error::ToolError;
use clawloop_core::tool::{Tool, ToolArguments, ToolParameter, ToolResult};

use crate::required_str;
use crate::sandbox::Workspace;

pub struct FileWriteTool {
    workspace: Workspace,
}

impl FileWriteTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file in the workspace, creating parent directories as needed. Overwrites existing files."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::string("path", "Path of the file to write"),
            ToolParameter::string("content", "Full content of the file"),
        ]
    }

    async fn execute(&self, arguments: ToolArguments) -> Result<ToolResult, ToolError> {
        let path = required_str(&arguments, self.name(), "path")?;
        let content = required_str(&arguments, self.name(), "content")?;
        let resolved = self.workspace.resolve(self.name(), path)?;

        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                ToolError::failed(self.name(), format!("cannot create parent of '{path}': {e}"))
            })?;
        }
        tokio::fs::write(&resolved, content)
            .await
            .map_err(|e| ToolError::failed(self.name(), format!("cannot write '{path}': {e}")))?;

        Ok(ToolResult::ok(format!("Wrote {} bytes to {path}", content.len())))
    }
}
