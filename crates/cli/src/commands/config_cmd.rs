//! `clawloop config`: show, validate or locate the configuration.

use clawloop_config::{AppConfig, StorageBackend};

const REDACTED: &str = "***";

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    println!("{}", redacted_toml(&config)?);
    Ok(())
}

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating configuration...");

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            println!("  Config error: {e}");
            return Err(e.into());
        }
    };
    println!("  Config parsed and validated");

    let warnings = warnings(&config);
    if warnings.is_empty() {
        println!("  All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("  warning: {w}");
        }
    }

    println!();
    println!("  Provider:    {}", config.default_provider);
    println!("  Model:       {}", config.default_model);
    println!("  Iterations:  {}", config.agent.max_iterations);
    println!(
        "  Window:      {} messages / {} bytes",
        config.agent.max_history_messages, config.agent.max_total_history_bytes
    );
    println!("  Storage:     {:?}", config.storage.backend);
    println!("  Workspace:   {}", config.workspace_dir().display());
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", AppConfig::config_dir().join("config.toml").display());
    Ok(())
}

/// Things that load fine but probably won't work.
fn warnings(config: &AppConfig) -> Vec<&'static str> {
    let mut warnings = Vec::new();
    if !config.has_api_key() && config.default_provider != "ollama" {
        warnings.push("No API key set (set CLAWLOOP_API_KEY, OPENROUTER_API_KEY or OPENAI_API_KEY)");
    }
    if config.storage.backend == StorageBackend::None {
        warnings.push("Storage is disabled; conversations will not survive a restart");
    }
    if config.tools.allowed_commands.is_empty() {
        warnings.push("tools.allowed_commands is empty; the shell tool will refuse every command");
    }
    warnings
}

/// The config as TOML with every secret replaced.
fn redacted_toml(config: &AppConfig) -> Result<String, toml::ser::Error> {
    let mut config = config.clone();
    redact(&mut config.api_key);
    redact(&mut config.tools.brave_api_key);
    redact(&mut config.storage.postgres_url);
    for provider in config.providers.values_mut() {
        redact(&mut provider.api_key);
    }
    toml::to_string_pretty(&config)
}

fn redact(secret: &mut Option<String>) {
    if secret.is_some() {
        *secret = Some(REDACTED.to_string());
    }
}
