//! Domain events for observing the agent loop.
//!
//! Events are published when something interesting happens. Subscribers
//! (the CLI's verbose mode, tests) react without coupling to the loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// An inbound message entered a conversation
    MessageReceived {
        session_id: String,
        content_preview: String,
        timestamp: DateTime<Utc>,
    },

    /// The agent produced a final reply
    ResponseGenerated {
        session_id: String,
        model: String,
        iterations: usize,
        timestamp: DateTime<Utc>,
    },

    ToolExecuted {
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A provider call failed after retries, or the circuit was open
    ProviderFailed {
        provider: String,
        error_message: String,
        circuit_open: bool,
        timestamp: DateTime<Utc>,
    },

    PersistenceFailed {
        session_id: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    IterationLimitReached {
        session_id: String,
        max_iterations: usize,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Short snake_case name, for log fields.
    pub fn name(&self) -> &'static str {
        match self {
            Self::MessageReceived { .. } => "message_received",
            Self::ResponseGenerated { .. } => "response_generated",
            Self::ToolExecuted { .. } => "tool_executed",
            Self::ProviderFailed { .. } => "provider_failed",
            Self::PersistenceFailed { .. } => "persistence_failed",
            Self::IterationLimitReached { .. } => "iteration_limit_reached",
        }
    }

    /// The conversation the event belongs to, when it has one.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::MessageReceived { session_id, .. }
            | Self::ResponseGenerated { session_id, .. }
            | Self::PersistenceFailed { session_id, .. }
            | Self::IterationLimitReached { session_id, .. } => Some(session_id),
            Self::ToolExecuted { .. } | Self::ProviderFailed { .. } => None,
        }
    }
}

/// Fan-out of domain events over `tokio::sync::broadcast`. Slow
/// subscribers lag and skip; publishers never block.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(Arc::new(event));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// First `max_chars` characters of `content`, for event payloads and logs.
pub fn preview(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &content[..idx]),
        None => content.to_string(),
    }
}
