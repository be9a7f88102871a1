//! Configuration loading, validation, and management for clawloop.
//!
//! Loads configuration from `~/.clawloop/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.clawloop/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_provider")]
    pub default_provider: String,

    #[serde(default = "default_model")]
    pub default_model: String,

    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Workspace directory for tools, identity files and MEMORY.md.
    /// Defaults to `~/.clawloop/workspace`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<PathBuf>,

    #[serde(default)]
    pub agent: AgentConfig,

    /// Provider timeout, retry and circuit breaker settings
    #[serde(default)]
    pub resilience: ResilienceConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

fn default_provider() -> String {
    "openrouter".into()
}
fn default_model() -> String {
    "anthropic/claude-sonnet-4".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("workspace", &self.workspace)
            .field("agent", &self.agent)
            .field("resilience", &self.resilience)
            .field("tools", &self.tools)
            .field("memory", &self.memory)
            .field("storage", &self.storage)
            .field("providers", &self.providers)
            .finish()
    }
}

/// Agent loop bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Provider calls allowed per inbound message
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Messages kept in the conversation window
    #[serde(default = "default_max_history_messages")]
    pub max_history_messages: usize,

    /// Inbound messages larger than this are rejected
    #[serde(default = "default_max_message_size_bytes")]
    pub max_message_size_bytes: usize,

    /// Total bytes kept in the conversation window
    #[serde(default = "default_max_total_history_bytes")]
    pub max_total_history_bytes: usize,

    /// Per-message cap inside the window; longer content is truncated
    #[serde(default = "default_max_window_message_bytes")]
    pub max_window_message_bytes: usize,

    /// Flush long-term memory every N iterations
    #[serde(default = "default_memory_flush_interval")]
    pub memory_flush_interval: usize,

    /// Stored messages reloaded when a conversation is first seen
    #[serde(default = "default_session_history_limit")]
    pub session_history_limit: usize,

    /// A conversation idle this long is unloaded (0 keeps it until exit)
    #[serde(default = "default_session_idle_timeout_seconds")]
    pub session_idle_timeout_seconds: u64,
}

fn default_max_iterations() -> usize {
    10
}
fn default_max_history_messages() -> usize {
    100
}
fn default_max_message_size_bytes() -> usize {
    100 * 1024
}
fn default_max_total_history_bytes() -> usize {
    1024 * 1024
}
/// Room for some content plus the truncation marker.
pub const MIN_WINDOW_MESSAGE_BYTES: usize = 64;

fn default_max_window_message_bytes() -> usize {
    10 * 1024
}
fn default_memory_flush_interval() -> usize {
    5
}
fn default_session_history_limit() -> usize {
    20
}
fn default_session_idle_timeout_seconds() -> u64 {
    30 * 60
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_history_messages: default_max_history_messages(),
            max_message_size_bytes: default_max_message_size_bytes(),
            max_total_history_bytes: default_max_total_history_bytes(),
            max_window_message_bytes: default_max_window_message_bytes(),
            memory_flush_interval: default_memory_flush_interval(),
            session_history_limit: default_session_history_limit(),
            session_idle_timeout_seconds: default_session_idle_timeout_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Timeout for a single provider attempt
    #[serde(default = "default_provider_timeout_seconds")]
    pub provider_timeout_seconds: u64,

    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,

    /// First backoff delay; doubles on every retry
    #[serde(default = "default_retry_base_delay_seconds")]
    pub retry_base_delay_seconds: u64,

    #[serde(default = "default_retry_max_delay_seconds")]
    pub retry_max_delay_seconds: u64,

    /// Exhausted calls in a row before the breaker opens
    #[serde(default = "default_circuit_breaker_failure_threshold")]
    pub circuit_breaker_failure_threshold: u32,

    #[serde(default = "default_circuit_breaker_cooldown_seconds")]
    pub circuit_breaker_cooldown_seconds: u64,
}

fn default_provider_timeout_seconds() -> u64 {
    30
}
fn default_retry_max_attempts() -> u32 {
    3
}
fn default_retry_base_delay_seconds() -> u64 {
    2
}
fn default_retry_max_delay_seconds() -> u64 {
    8
}
fn default_circuit_breaker_failure_threshold() -> u32 {
    5
}
fn default_circuit_breaker_cooldown_seconds() -> u64 {
    30
}

impl ResilienceConfig {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_seconds)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_secs(self.retry_base_delay_seconds)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_secs(self.retry_max_delay_seconds)
    }

    pub fn circuit_breaker_cooldown(&self) -> Duration {
        Duration::from_secs(self.circuit_breaker_cooldown_seconds)
    }
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            provider_timeout_seconds: default_provider_timeout_seconds(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_base_delay_seconds: default_retry_base_delay_seconds(),
            retry_max_delay_seconds: default_retry_max_delay_seconds(),
            circuit_breaker_failure_threshold: default_circuit_breaker_failure_threshold(),
            circuit_breaker_cooldown_seconds: default_circuit_breaker_cooldown_seconds(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Calls per tool name per minute, shared by all conversations
    #[serde(default = "default_tool_rate_limit_per_minute")]
    pub tool_rate_limit_per_minute: usize,

    #[serde(default = "default_tool_timeout_seconds")]
    pub tool_timeout_seconds: u64,

    /// Programs the shell tool may run
    #[serde(default = "default_allowed_commands")]
    pub allowed_commands: Vec<String>,

    #[serde(default = "default_shell_timeout_seconds")]
    pub shell_timeout_seconds: u64,

    /// Reject file paths outside the workspace
    #[serde(default = "default_true")]
    pub restrict_to_workspace: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brave_api_key: Option<String>,

    #[serde(default = "default_web_search_max_results")]
    pub web_search_max_results: usize,

    /// Consecutive failed runs before a tool is skipped
    #[serde(default = "default_tool_failure_threshold")]
    pub tool_failure_threshold: u32,

    /// How long a failing tool is skipped
    #[serde(default = "default_tool_circuit_cooldown_seconds")]
    pub tool_circuit_cooldown_seconds: u64,
}

fn default_tool_rate_limit_per_minute() -> usize {
    10
}
fn default_tool_timeout_seconds() -> u64 {
    60
}
fn default_allowed_commands() -> Vec<String> {
    [
        "ls", "cat", "head", "tail", "wc", "grep", "find", "echo", "pwd", "date", "git", "cargo",
        "python3",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_shell_timeout_seconds() -> u64 {
    30
}
fn default_true() -> bool {
    true
}
fn default_tool_failure_threshold() -> u32 {
    3
}
fn default_tool_circuit_cooldown_seconds() -> u64 {
    60
}
fn default_web_search_max_results() -> usize {
    5
}

impl ToolsConfig {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_seconds)
    }

    pub fn shell_timeout(&self) -> Duration {
        Duration::from_secs(self.shell_timeout_seconds)
    }

    pub fn tool_circuit_cooldown(&self) -> Duration {
        Duration::from_secs(self.tool_circuit_cooldown_seconds)
    }
}

impl std::fmt::Debug for ToolsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolsConfig")
            .field("tool_rate_limit_per_minute", &self.tool_rate_limit_per_minute)
            .field("tool_timeout_seconds", &self.tool_timeout_seconds)
            .field("allowed_commands", &self.allowed_commands)
            .field("shell_timeout_seconds", &self.shell_timeout_seconds)
            .field("restrict_to_workspace", &self.restrict_to_workspace)
            .field("brave_api_key", &redact(&self.brave_api_key))
            .field("web_search_max_results", &self.web_search_max_results)
            .field("tool_failure_threshold", &self.tool_failure_threshold)
            .field("tool_circuit_cooldown_seconds", &self.tool_circuit_cooldown_seconds)
            .finish()
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            tool_rate_limit_per_minute: default_tool_rate_limit_per_minute(),
            tool_timeout_seconds: default_tool_timeout_seconds(),
            allowed_commands: default_allowed_commands(),
            shell_timeout_seconds: default_shell_timeout_seconds(),
            restrict_to_workspace: true,
            brave_api_key: None,
            web_search_max_results: default_web_search_max_results(),
            tool_failure_threshold: default_tool_failure_threshold(),
            tool_circuit_cooldown_seconds: default_tool_circuit_cooldown_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Short-term entries kept before the least important are dropped
    #[serde(default = "default_max_short_term")]
    pub max_short_term: usize,

    /// Entries at or above this importance are written to long-term memory
    #[serde(default = "default_long_term_importance_threshold")]
    pub long_term_importance_threshold: u8,

    /// Long-term entries kept; the least important are dropped on save
    #[serde(default = "default_max_long_term")]
    pub max_long_term: usize,

    /// Long-term memory file name, relative to the workspace
    #[serde(default = "default_memory_file")]
    pub memory_file: String,
}

fn default_max_short_term() -> usize {
    50
}
fn default_long_term_importance_threshold() -> u8 {
    7
}
fn default_max_long_term() -> usize {
    200
}
fn default_memory_file() -> String {
    "MEMORY.md".into()
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_short_term: default_max_short_term(),
            long_term_importance_threshold: default_long_term_importance_threshold(),
            max_long_term: default_max_long_term(),
            memory_file: default_memory_file(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Sqlite,
    Postgres,
    Memory,
    None,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_backend")]
    pub backend: StorageBackend,

    /// SQLite database path. Defaults to `~/.clawloop/clawloop.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sqlite_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postgres_url: Option<String>,
}

fn default_storage_backend() -> StorageBackend {
    StorageBackend::Sqlite
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("backend", &self.backend)
            .field("sqlite_path", &self.sqlite_path)
            .field("postgres_url", &redact(&self.postgres_url))
            .finish()
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            sqlite_path: None,
            postgres_url: None,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL for OpenAI-compatible endpoints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.clawloop/config.toml).
    ///
    /// Environment overrides:
    /// - `CLAWLOOP_API_KEY`, then `OPENROUTER_API_KEY`, then `OPENAI_API_KEY`
    /// - `CLAWLOOP_PROVIDER`, `CLAWLOOP_MODEL`
    /// - `BRAVE_API_KEY` for web search
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path. A missing file
    /// yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = var("CLAWLOOP_API_KEY")
                .or_else(|| var("OPENROUTER_API_KEY"))
                .or_else(|| var("OPENAI_API_KEY"));
        }
        if let Some(provider) = var("CLAWLOOP_PROVIDER") {
            self.default_provider = provider;
        }
        if let Some(model) = var("CLAWLOOP_MODEL") {
            self.default_model = model;
        }
        if self.tools.brave_api_key.is_none() {
            self.tools.brave_api_key = var("BRAVE_API_KEY");
        }
    }

    /// `CLAWLOOP_HOME`, or `~/.clawloop`.
    pub fn config_dir() -> PathBuf {
        match std::env::var("CLAWLOOP_HOME") {
            Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => dirs_home().join(".clawloop"),
        }
    }

    /// The configured workspace, or `<config_dir>/workspace`.
    pub fn workspace_dir(&self) -> PathBuf {
        self.workspace
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("workspace"))
    }

    pub fn memory_file_path(&self) -> PathBuf {
        self.workspace_dir().join(&self.memory.memory_file)
    }

    pub fn sqlite_path(&self) -> PathBuf {
        self.storage
            .sqlite_path
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("clawloop.db"))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        let nonzero = [
            ("agent.max_iterations", self.agent.max_iterations as u64),
            ("agent.max_history_messages", self.agent.max_history_messages as u64),
            ("agent.max_message_size_bytes", self.agent.max_message_size_bytes as u64),
            ("agent.max_total_history_bytes", self.agent.max_total_history_bytes as u64),
            ("agent.max_window_message_bytes", self.agent.max_window_message_bytes as u64),
            ("agent.memory_flush_interval", self.agent.memory_flush_interval as u64),
            ("resilience.provider_timeout_seconds", self.resilience.provider_timeout_seconds),
            ("resilience.retry_max_attempts", self.resilience.retry_max_attempts as u64),
            (
                "resilience.circuit_breaker_failure_threshold",
                self.resilience.circuit_breaker_failure_threshold as u64,
            ),
            ("tools.tool_rate_limit_per_minute", self.tools.tool_rate_limit_per_minute as u64),
            ("tools.tool_timeout_seconds", self.tools.tool_timeout_seconds),
            ("tools.tool_failure_threshold", self.tools.tool_failure_threshold as u64),
            ("memory.max_short_term", self.memory.max_short_term as u64),
            ("memory.max_long_term", self.memory.max_long_term as u64),
        ];
        if let Some((name, _)) = nonzero.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::ValidationError(format!("{name} must be greater than 0")));
        }

        if self.agent.max_window_message_bytes < MIN_WINDOW_MESSAGE_BYTES {
            return Err(ConfigError::ValidationError(format!(
                "agent.max_window_message_bytes must be at least {MIN_WINDOW_MESSAGE_BYTES}"
            )));
        }

        if self.agent.max_window_message_bytes > self.agent.max_total_history_bytes {
            return Err(ConfigError::ValidationError(
                "agent.max_window_message_bytes must not exceed agent.max_total_history_bytes".into(),
            ));
        }

        if self.memory.long_term_importance_threshold > 10 {
            return Err(ConfigError::ValidationError(
                "memory.long_term_importance_threshold must be between 0 and 10".into(),
            ));
        }

        if self.storage.backend == StorageBackend::Postgres && self.storage.postgres_url.is_none() {
            return Err(ConfigError::ValidationError(
                "storage.postgres_url is required for the postgres backend".into(),
            ));
        }

        Ok(())
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            workspace: None,
            agent: AgentConfig::default(),
            resilience: ResilienceConfig::default(),
            tools: ToolsConfig::default(),
            memory: MemoryConfig::default(),
            storage: StorageConfig::default(),
            providers: HashMap::new(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
