//! `list_dir`: list a workspace directory.

use async_trait::async_trait;
use clawloop_core::error::ToolError;
use clawloop_core::tool::{Tool, ToolArguments, ToolParameter, ToolResult};
use serde_json::json;

use crate::sandbox::Workspace;

pub struct ListDirTool {
    workspace: Workspace,
}

impl ListDirTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List the entries of a directory. Directories end with '/'."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::string("path", "Directory to list").with_default(json!("."))]
    }

    async fn execute(&self, arguments: ToolArguments) -> Result<ToolResult, ToolError> {
        let path = arguments
            .get("path")
            .and_then(|v| v.as_str())
            .unwrap_or(".");
        let resolved = self.workspace.resolve(self.name(), path)?;

        let mut reader = tokio::fs::read_dir(&resolved)
            .await
            .map_err(|e| ToolError::failed(self.name(), format!("cannot list '{path}': {e}")))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| ToolError::failed(self.name(), format!("cannot list '{path}': {e}")))?
        {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                name.push('/');
            }
            entries.push(name);
        }
        entries.sort();

        let output = if entries.is_empty() {
            "(empty directory)".to_string()
        } else {
            entries.join("\n")
        };
        Ok(ToolResult::ok(output).with_data(json!(entries)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn lists_sorted_with_dir_suffix() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.txt"), "").unwrap();
        std::fs::write(dir.path().join("a.txt"), "").unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        let tool = ListDirTool::new(Workspace::new(dir.path(), true));

        let result = tool.execute(ToolArguments::new()).await.unwrap();
        assert_eq!(result.output, "a.txt\nb.txt\nsrc/");
        assert_eq!(result.data, Some(json!(["a.txt", "b.txt", "src/"])));
    }

    #[tokio::test]
    async fn empty_directory() {
        let dir = TempDir::new().unwrap();
        let tool = ListDirTool::new(Workspace::new(dir.path(), true));
        let result = tool.execute(ToolArguments::new()).await.unwrap();
        assert_eq!(result.output, "(empty directory)");
    }

    #[test]
    fn path_defaults_to_dot() {
        let dir = TempDir::new().unwrap();
        let tool = ListDirTool::new(Workspace::new(dir.path(), true));
        let validated = tool.definition().validate(&ToolArguments::new()).unwrap();
        assert_eq!(validated["path"], json!("."));
    }
}
