//! Built-in tools for clawloop.
//!
//! File tools (`read_file`, `write_file`, `edit_file`, `list_dir`) are
//! scoped to the workspace. `shell` runs allowlisted programs directly,
//! `web_search` queries the Brave Search API and `fetch_url` reads a page.
//! The memory tools are registered separately, once a `MemoryManager`
//! exists.

pub mod fetch_url;
pub mod file_edit;
pub mod file_read;
pub mod file_write;
pub mod list_dir;
pub mod memory;
pub mod sandbox;
pub mod shell;
pub mod web_search;

use clawloop_config::ToolsConfig;
use clawloop_core::error::ToolError;
use clawloop_core::registry::ToolRegistry;
use clawloop_core::tool::ToolArguments;
use clawloop_memory::MemoryManager;
use std::path::PathBuf;
use std::sync::Arc;

pub use sandbox::Workspace;

/// Create the registry with every built-in tool, limits from `[tools]`.
pub fn default_registry(config: &ToolsConfig, workspace: impl Into<PathBuf>) -> ToolRegistry {
    let workspace = Workspace::new(workspace, config.restrict_to_workspace);
    let mut registry =
        ToolRegistry::with_limits(config.tool_rate_limit_per_minute, config.tool_timeout())
            .with_circuit_breaker(config.tool_failure_threshold, config.tool_circuit_cooldown());

    registry.register(Box::new(file_read::FileReadTool::new(workspace.clone())));
    registry.register(Box::new(file_write::FileWriteTool::new(workspace.clone())));
    registry.register(Box::new(file_edit::FileEditTool::new(workspace.clone())));
    registry.register(Box::new(list_dir::ListDirTool::new(workspace.clone())));
    registry.register(Box::new(
        shell::ShellTool::new(config.allowed_commands.clone(), workspace.root())
            .with_timeout(config.shell_timeout()),
    ));
    registry.register(Box::new(web_search::WebSearchTool::new(
        config.brave_api_key.clone(),
        config.web_search_max_results,
    )));
    registry.register(Box::new(fetch_url::FetchUrlTool::default()));
    registry
}

/// Add `remember`, `recall`, `forget` and `get_context` over `memory`.
pub fn register_memory_tools(registry: &mut ToolRegistry, memory: Arc<MemoryManager>) {
    for tool in memory::memory_tools(memory) {
        registry.register(tool);
    }
}

/// A string argument the registry has already checked for presence.
pub(crate) fn required_str<'a>(
    arguments: &'a ToolArguments,
    tool: &str,
    name: &str,
) -> Result<&'a str, ToolError> {
    arguments
        .get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::invalid(tool, format!("missing required parameter '{name}'")))
}
