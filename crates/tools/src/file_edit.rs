//! `edit_file`: replace one exact occurrence of a text span.

use async_trait::async_trait;
use clawloop_core::error::ToolError;
use clawloop_core::tool::{Tool, ToolArguments, ToolParameter, ToolResult};

use crate::required_str;
use crate::sandbox::Workspace;

pub struct FileEditTool {
    workspace: Workspace,
}

impl FileEditTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for FileEditTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Replace old_text with new_text in a file. old_text must appear exactly once."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::string("path", "Path of the file to edit"),
            ToolParameter::string("old_text", "Exact text to replace"),
            ToolParameter::string("new_text", "Replacement text"),
        ]
    }

    async fn execute(&self, arguments: ToolArguments) -> Result<ToolResult, ToolError> {
        let path = required_str(&arguments, self.name(), "path")?;
        let old_text = required_str(&arguments, self.name(), "old_text")?;
        let new_text = required_str(&arguments, self.name(), "new_text")?;
        if old_text.is_empty() {
            return Err(ToolError::invalid(self.name(), "old_text must not be empty"));
        }
        let resolved = self.workspace.resolve(self.name(), path)?;

        let content = tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| ToolError::failed(self.name(), format!("cannot read '{path}': {e}")))?;

        match content.matches(old_text).count() {
            0 => Err(ToolError::failed(
                self.name(),
                format!("old_text not found in '{path}'"),
            )),
            1 => {
                let updated = content.replacen(old_text, new_text, 1);
                tokio::fs::write(&resolved, updated).await.map_err(|e| {
                    ToolError::failed(self.name(), format!("cannot write '{path}': {e}"))
                })?;
                Ok(ToolResult::ok(format!("Edited {path}")))
            }
            n => Err(ToolError::failed(
                self.name(),
                format!("old_text appears {n} times in '{path}'; include more context"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup(content: &str) -> (TempDir, FileEditTool) {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("main.rs"), content).unwrap();
        let tool = FileEditTool::new(Workspace::new(dir.path(), true));
        (dir, tool)
    }

    fn args(old: &str, new: &str) -> ToolArguments {
        json!({"path": "main.rs", "old_text": old, "new_text": new})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[tokio::test]
    async fn replaces_unique_match() {
        let (dir, tool) = setup("fn main() {\n    println!(\"hi\");\n}\n");
        let result = tool.execute(args("\"hi\"", "\"hello\"")).await.unwrap();
        assert!(result.success);
        let content = std::fs::read_to_string(dir.path().join("main.rs")).unwrap();
        assert!(content.contains("\"hello\""));
    }

    #[tokio::test]
    async fn ambiguous_match_is_refused() {
        let (dir, tool) = setup("a a");
        let err = tool.execute(args("a", "b")).await.unwrap_err();
        assert!(err.to_string().contains("2 times"));
        assert_eq!(std::fs::read_to_string(dir.path().join("main.rs")).unwrap(), "a a");
    }

    #[tokio::test]
    async fn missing_match_is_refused() {
        let (_dir, tool) = setup("abc");
        assert!(tool.execute(args("xyz", "b")).await.is_err());
    }
}
