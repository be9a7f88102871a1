//! Memory tools: `remember`, `recall`, `forget` and `get_context`.
//!
//! All four share the agent's `MemoryManager`, so what one conversation
//! remembers is visible to every other.

use async_trait::async_trait;
use clawloop_core::error::ToolError;
use clawloop_core::tool::{Tool, ToolArguments, ToolParameter, ToolResult};
use clawloop_memory::{MemoryEntry, MemoryManager};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use crate::required_str;

const DEFAULT_IMPORTANCE: u64 = 5;
const DEFAULT_CONTEXT_ENTRIES: u64 = 10;
const MAX_CONTEXT_ENTRIES: u64 = 50;

/// The four memory tools over one manager.
pub fn memory_tools(memory: Arc<MemoryManager>) -> Vec<Box<dyn Tool>> {
    vec![
        Box::new(RememberTool::new(Arc::clone(&memory))),
        Box::new(RecallTool::new(Arc::clone(&memory))),
        Box::new(ForgetTool::new(Arc::clone(&memory))),
        Box::new(GetContextTool::new(memory)),
    ]
}

pub struct RememberTool {
    memory: Arc<MemoryManager>,
}

impl RememberTool {
    pub fn new(memory: Arc<MemoryManager>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for RememberTool {
    fn name(&self) -> &str {
        "remember"
    }

    fn description(&self) -> &str {
        "Store information for later recall: user preferences, important facts, \
         or anything the user wants to be reminded of."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::string("key", "A short, descriptive key for this memory"),
            ToolParameter::string("value", "The information to remember"),
            ToolParameter::string("category", "Category, e.g. 'preferences' or 'facts'")
                .with_default(json!("general")),
            ToolParameter::integer("importance", "1-10; important memories are kept long-term")
                .with_default(json!(DEFAULT_IMPORTANCE)),
        ]
    }

    async fn execute(&self, arguments: ToolArguments) -> Result<ToolResult, ToolError> {
        let key = required_str(&arguments, self.name(), "key")?.trim();
        if key.is_empty() {
            return Err(ToolError::invalid(self.name(), "key must not be empty"));
        }
        let value = required_str(&arguments, self.name(), "value")?;
        let category = arguments
            .get("category")
            .and_then(|v| v.as_str())
            .unwrap_or("general");
        let importance = arguments
            .get("importance")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_IMPORTANCE)
            .clamp(1, 10) as u8;

        self.memory
            .remember(MemoryEntry::new(key, value, category, importance));
        Ok(ToolResult::ok(format!("Remembered: {key}")))
    }
}

pub struct RecallTool {
    memory: Arc<MemoryManager>,
}

impl RecallTool {
    pub fn new(memory: Arc<MemoryManager>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for RecallTool {
    fn name(&self) -> &str {
        "recall"
    }

    fn description(&self) -> &str {
        "Recall stored information by its key, or list a whole category."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::string("key", "The key of the memory to recall").optional(),
            ToolParameter::string("category", "List the memories in this category instead")
                .optional(),
        ]
    }

    async fn execute(&self, arguments: ToolArguments) -> Result<ToolResult, ToolError> {
        let key = arguments.get("key").and_then(|v| v.as_str());
        let category = arguments.get("category").and_then(|v| v.as_str());

        match (key, category) {
            (Some(key), _) => Ok(ToolResult::ok(match self.memory.recall(key) {
                Some(value) => format!("Found: {value}"),
                None => format!("No memory found for key: {key}"),
            })),
            (None, Some(category)) => {
                let entries = self
                    .memory
                    .recall_by_category(category, DEFAULT_CONTEXT_ENTRIES as usize);
                if entries.is_empty() {
                    return Ok(ToolResult::ok(format!("No memories in category: {category}")));
                }
                let listed = entries
                    .iter()
                    .map(|e| format!("- {}: {}", e.key, e.value))
                    .collect::<Vec<_>>()
                    .join("\n");
                Ok(ToolResult::ok(listed))
            }
            (None, None) => Err(ToolError::invalid(
                self.name(),
                "provide either 'key' or 'category'",
            )),
        }
    }
}

pub struct ForgetTool {
    memory: Arc<MemoryManager>,
}

impl ForgetTool {
    pub fn new(memory: Arc<MemoryManager>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for ForgetTool {
    fn name(&self) -> &str {
        "forget"
    }

    fn description(&self) -> &str {
        "Remove a stored memory by its key."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::string("key", "The key of the memory to remove")]
    }

    async fn execute(&self, arguments: ToolArguments) -> Result<ToolResult, ToolError> {
        let key = required_str(&arguments, self.name(), "key")?;
        if self.memory.forget(key) {
            debug!(key, "Memory removed by tool");
            Ok(ToolResult::ok(format!("Removed memory: {key}")))
        } else {
            Ok(ToolResult::ok(format!("No memory found to remove for key: {key}")))
        }
    }
}

pub struct GetContextTool {
    memory: Arc<MemoryManager>,
}

impl GetContextTool {
    pub fn new(memory: Arc<MemoryManager>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for GetContextTool {
    fn name(&self) -> &str {
        "get_context"
    }

    fn description(&self) -> &str {
        "List the most important stored memories."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::integer("max_entries", "Maximum memories to return (1-50)")
                .with_default(json!(DEFAULT_CONTEXT_ENTRIES)),
        ]
    }

    async fn execute(&self, arguments: ToolArguments) -> Result<ToolResult, ToolError> {
        let limit = arguments
            .get("max_entries")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_CONTEXT_ENTRIES)
            .clamp(1, MAX_CONTEXT_ENTRIES);
        let context = self.memory.context(limit as usize);
        if context.is_empty() {
            Ok(ToolResult::ok("No memories found."))
        } else {
            Ok(ToolResult::ok(context))
        }
    }
}
