//! Identity system: agent personality and system prompt construction.
//!
//! Identity comes from optional markdown files in the workspace:
//!
//! 1. `IDENTITY.md` (agent name and self-description)
//! 2. `SOUL.md` (personality, tone, style)
//! 3. `USER.md` (who the agent is helping)
//! 4. `RULES.md` (hard constraints)
//!
//! Missing files are skipped. The system prompt is rebuilt on every
//! iteration so it can carry the current memory context and tool list.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;
use tracing::debug;

use crate::tool::ToolDefinition;

pub const IDENTITY_FILE: &str = "IDENTITY.md";
pub const SOUL_FILE: &str = "SOUL.md";
pub const USER_FILE: &str = "USER.md";
pub const RULES_FILE: &str = "RULES.md";

const DEFAULT_NAME: &str = "Clawloop";
const DEFAULT_USER: &str = "the user";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,

    pub user_name: String,

    /// IDENTITY.md and SOUL.md content
    #[serde(default)]
    pub soul: String,

    /// USER.md content
    #[serde(default)]
    pub user: String,

    /// RULES.md content
    #[serde(default)]
    pub rules: String,

    /// Replaces the generated preamble when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt_override: Option<String>,

    /// Which context files were loaded (for diagnostics)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub loaded_files: Vec<String>,
}

impl Identity {
    /// Identity used when the workspace has no context files.
    pub fn default_identity() -> Self {
        Self {
            name: DEFAULT_NAME.into(),
            user_name: DEFAULT_USER.into(),
            soul: String::new(),
            user: String::new(),
            rules: String::new(),
            system_prompt_override: None,
            loaded_files: Vec::new(),
        }
    }

    /// Load identity files from `workspace`.
    pub fn load(workspace: &Path) -> Self {
        let mut identity = Self::default_identity();

        let identity_md = read_section(workspace, IDENTITY_FILE, &mut identity.loaded_files);
        let soul_md = read_section(workspace, SOUL_FILE, &mut identity.loaded_files);
        let user_md = read_section(workspace, USER_FILE, &mut identity.loaded_files);
        let rules_md = read_section(workspace, RULES_FILE, &mut identity.loaded_files);

        if let Some(name) = identity_md
            .as_deref()
            .or(soul_md.as_deref())
            .and_then(extract_name)
        {
            identity.name = name;
        }
        if let Some(name) = user_md.as_deref().and_then(extract_name) {
            identity.user_name = name;
        }

        identity.soul = [identity_md, soul_md]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join("\n\n");
        identity.user = user_md.unwrap_or_default();
        identity.rules = rules_md.unwrap_or_default();

        debug!(
            files_loaded = identity.loaded_files.len(),
            name = %identity.name,
            "Identity loaded"
        );
        identity
    }

    pub fn with_override(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt_override = Some(prompt.into());
        self
    }

    /// Build the full system prompt.
    ///
    /// `memories` is the rendered memory context (may be empty). Tools are
    /// documented with the JSON call format so models without native
    /// function calling can still request them.
    pub fn system_prompt(&self, tools: &[ToolDefinition], memories: &str) -> String {
        let mut prompt = String::with_capacity(4096);

        match &self.system_prompt_override {
            Some(text) => {
                prompt.push_str(text.trim());
                prompt.push('\n');
            }
            None => {
                let _ = writeln!(prompt, "# Identity\n\nYou are {}, an AI assistant.", self.name);

                let mut parts = Vec::new();
                if !self.soul.trim().is_empty() {
                    parts.push(format!("## Who You Are\n\n{}", self.soul.trim()));
                }
                if !self.user.trim().is_empty() {
                    parts.push(format!("## Who You Help\n\n{}", self.user.trim()));
                }
                if !self.rules.trim().is_empty() {
                    parts.push(format!("## Rules\n\n{}", self.rules.trim()));
                }
                if !parts.is_empty() {
                    prompt.push('\n');
                    prompt.push_str(&parts.join("\n\n---\n\n"));
                    prompt.push('\n');
                }

                let _ = write!(
                    prompt,
                    "\n# Instructions\n\n\
                     - Be helpful, honest, and concise\n\
                     - Use tools when they help accomplish the task\n\
                     - Remember what you learn about {}\n",
                    self.user_name
                );
            }
        }

        if !memories.trim().is_empty() {
            let _ = write!(prompt, "\n## Your Memories\n\n{}\n", memories.trim());
        }

        if !tools.is_empty() {
            prompt.push_str("\n# Available Tools\n\n");
            prompt.push_str(
                "Call a tool by replying with only a JSON object in this format:\n\n\
                 ```json\n{\"name\": \"tool_name\", \"arguments\": {\"arg\": \"value\"}}\n```\n\n",
            );
            for tool in tools {
                let _ = write!(prompt, "## {}\n\n{}\n\n", tool.name, tool.description);
                if !tool.parameters.is_empty() {
                    prompt.push_str("**Parameters:**\n");
                    for param in &tool.parameters {
                        let _ = write!(
                            prompt,
                            "- `{}` ({}{}): {}",
                            param.name,
                            param.param_type.as_str(),
                            if param.required { ", required" } else { "" },
                            param.description
                        );
                        if let Some(default) = &param.default {
                            let _ = write!(prompt, " Default: {default}.");
                        }
                        prompt.push('\n');
                    }
                    prompt.push('\n');
                }
            }
        }

        prompt
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self::default_identity()
    }
}

fn read_section(dir: &Path, filename: &str, loaded: &mut Vec<String>) -> Option<String> {
    let path = dir.join(filename);
    let content = std::fs::read_to_string(&path).ok()?;
    if content.trim().is_empty() {
        return None;
    }
    debug!(file = %path.display(), "Loaded context file");
    loaded.push(path.display().to_string());
    Some(content.trim().to_string())
}

/// Find a name in a `Name: X` line, or the first `# X` heading.
fn extract_name(content: &str) -> Option<String> {
    for line in content.lines() {
        let line = line.trim().trim_start_matches("- ").replace("**", "");
        if let Some(rest) = line.strip_prefix("Name:") {
            let name = rest.trim();
            if !name.is_empty() {
                return Some(name.to_string());
            }
        }
    }
    content
        .lines()
        .find_map(|l| l.trim().strip_prefix("# "))
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
}
