//! Error types for the clawloop domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; the top-level `Error`
//! wraps them for callers that do not care which layer failed.

use thiserror::Error;

/// The top-level error type for all clawloop operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Inbound input rejected before it reaches the agent loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("message is {size_bytes} bytes, limit is {max_bytes} bytes")]
    MessageTooLarge { size_bytes: usize, max_bytes: usize },

    #[error("message is empty")]
    EmptyMessage,
}

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    /// The circuit breaker for this provider is open; nothing was sent.
    #[error("Provider circuit open, retry after {retry_after_secs}s")]
    CircuitOpen { retry_after_secs: u64 },
}

impl ProviderError {
    /// Transient failures are worth retrying and count against the breaker.
    ///
    /// Network errors, timeouts, 429 and 5xx are transient. Auth, 4xx,
    /// malformed requests and an open circuit are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::RateLimited { .. } => true,
            Self::ApiError { status_code, .. } => is_retryable_status(*status_code),
            _ => false,
        }
    }

    /// True for the fast-fail signal raised while the breaker is open.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}

/// HTTP statuses that warrant a retry.
pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid arguments for {tool_name}: {reason}")]
    InvalidArguments { tool_name: String, reason: String },

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Rate limit exceeded for {tool_name}: {limit} calls per {window_secs}s")]
    RateLimited {
        tool_name: String,
        limit: usize,
        window_secs: u64,
    },

    #[error("Permission denied: {tool_name}: {reason}")]
    PermissionDenied { tool_name: String, reason: String },

    #[error("Tool {tool_name} is temporarily unavailable after repeated failures, retry in {retry_after_secs}s")]
    Unavailable { tool_name: String, retry_after_secs: u64 },
}

impl ToolError {
    pub fn invalid(tool_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            tool_name: tool_name.into(),
            reason: reason.into(),
        }
    }

    pub fn failed(tool_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            tool_name: tool_name.into(),
            reason: reason.into(),
        }
    }

    pub fn denied(tool_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PermissionDenied {
            tool_name: tool_name.into(),
            reason: reason.into(),
        }
    }
}

/// Durable message storage failures. Never surfaced to users.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("Storage connection failed: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    #[error("Message delivery failed to {channel}: {reason}")]
    DeliveryFailed { channel: String, reason: String },

    #[error("Channel closed: {0}")]
    Closed(String),
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Memory file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Memory file is malformed: {0}")]
    Parse(String),
}
