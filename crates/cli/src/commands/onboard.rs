//! `clawloop onboard`: first-time setup.

use clawloop_config::AppConfig;
use std::path::{Path, PathBuf};

const IDENTITY_MD: &str = concat!(
    "## Identity\n\n",
    "Name: Clawloop\n\n",
    "You are a helpful AI assistant.\n\n",
    "You can call tools (read_file, write_file, edit_file, list_dir, shell,\n",
    "web_search, fetch_url) to work with files and the web, and keep facts\n",
    "with remember, recall and forget. Use them when they would help\n",
    "accomplish the task, and answer directly when they would not.\n",
);

const SOUL_MD: &str = concat!(
    "## Personality & Tone\n\n",
    "- Be concise and direct\n",
    "- Show your reasoning when solving complex problems\n",
    "- Ask for clarification when the request is ambiguous\n",
    "- Be honest about limitations and uncertainties\n",
);

const USER_MD: &str = concat!(
    "## User Context\n\n",
    "<!-- Add information about yourself that the agent should know -->\n",
    "<!-- Examples: preferred languages, coding style, project context -->\n\n",
    "- Preferred Language: (edit this)\n",
);

const RULES_MD: &str = concat!(
    "## Rules\n\n",
    "- Never run destructive shell commands without asking first\n",
    "- Keep file changes inside the workspace\n",
);

/// What `scaffold` created, for reporting.
#[derive(Debug, Default)]
pub struct ScaffoldReport {
    pub created: Vec<PathBuf>,
    pub config_existed: bool,
}

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");
    // Respect a workspace override in an existing config file.
    let workspace_dir = AppConfig::load_from(&config_path)
        .map(|c| c.workspace_dir())
        .unwrap_or_else(|_| config_dir.join("workspace"));

    println!("clawloop: first-time setup");
    println!("==========================\n");

    let report = scaffold(&config_dir, &workspace_dir)?;
    for path in &report.created {
        println!("  Created {}", path.display());
    }

    if report.config_existed {
        println!("\n  Config already exists at: {}", config_path.display());
        println!("  Edit it manually or delete it and re-run onboard.\n");
    } else {
        println!("\n  Next steps:");
        println!("    1. Edit {} and add your API key", config_path.display());
        println!("    2. Run: clawloop agent");
        println!("    3. Start chatting!\n");
    }

    println!("Setup complete. Run `clawloop agent` to start chatting.\n");
    Ok(())
}

/// Create the config directory, the workspace with its identity files,
/// and a default `config.toml`. Existing files are left untouched.
pub fn scaffold(config_dir: &Path, workspace_dir: &Path) -> std::io::Result<ScaffoldReport> {
    let mut report = ScaffoldReport::default();

    for dir in [config_dir, workspace_dir] {
        if !dir.exists() {
            std::fs::create_dir_all(dir)?;
            report.created.push(dir.to_path_buf());
        }
    }

    for (name, body) in [
        ("IDENTITY.md", IDENTITY_MD),
        ("SOUL.md", SOUL_MD),
        ("USER.md", USER_MD),
        ("RULES.md", RULES_MD),
    ] {
        let path = workspace_dir.join(name);
        if write_if_missing(&path, body)? {
            report.created.push(path);
        }
    }

    let config_path = config_dir.join("config.toml");
    if write_if_missing(&config_path, &AppConfig::default_toml())? {
        report.created.push(config_path);
    } else {
        report.config_existed = true;
    }

    Ok(report)
}

fn write_if_missing(path: &Path, body: &str) -> std::io::Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    std::fs::write(path, body)?;
    Ok(true)
}
