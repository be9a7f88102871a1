//! `clawloop tools`: list what the agent can call.

use clawloop_config::AppConfig;
use clawloop_core::tool::ToolDefinition;
use clawloop_memory::MemoryManager;
use std::sync::Arc;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let mut registry = clawloop_tools::default_registry(&config.tools, config.workspace_dir());
    // Listing only needs the schemas, so the memory file is not read.
    let memory = MemoryManager::new(
        config.memory_file_path(),
        config.memory.max_short_term,
        config.memory.long_term_importance_threshold,
    );
    clawloop_tools::register_memory_tools(&mut registry, Arc::new(memory));

    println!("Available tools ({}):\n", registry.len());
    for definition in registry.definitions() {
        print!("{}", describe(&definition));
    }
    Ok(())
}

fn describe(definition: &ToolDefinition) -> String {
    let mut out = format!("  {}", definition.name);
    if definition.strict {
        out.push_str(" (strict)");
    }
    out.push_str(&format!("\n    {}\n", definition.description));
    for param in &definition.parameters {
        let presence = match (&param.default, param.required) {
            (Some(default), _) => format!("default {default}"),
            (None, true) => "required".to_string(),
            (None, false) => "optional".to_string(),
        };
        out.push_str(&format!(
            "      - {} ({}, {}): {}\n",
            param.name,
            param.param_type.as_str(),
            presence,
            param.description
        ));
    }
    out.push('\n');
    out
}
