//! The agent reasoning loop implementation.

use clawloop_config::AgentConfig;
use clawloop_core::channel::ReplyKind;
use clawloop_core::error::{ProviderError, ValidationError};
use clawloop_core::event::{self, DomainEvent, EventBus};
use clawloop_core::identity::Identity;
use clawloop_core::message::{Message, Role};
use clawloop_core::provider::{Provider, ProviderRequest, ToolSchema};
use clawloop_core::registry::ToolRegistry;
use clawloop_core::storage::StoredMessage;
use clawloop_core::tool::{ToolDefinition, ToolResult};
use clawloop_memory::MemoryManager;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::conversation::{ConversationWindow, WindowLimits};
use crate::persistence::PersistenceWriter;
use crate::response::ParsedResponse;

pub const FALLBACK_REPLY: &str =
    "I couldn't finish this within the allowed number of steps. Please try again with a narrower request.";
pub const UNAVAILABLE_REPLY: &str =
    "The assistant is temporarily unavailable. Please try again in a moment.";
pub const FAILURE_REPLY: &str = "Sorry, I encountered an error while working on that. Please try again.";

/// Memory entries rendered into the system prompt.
const MEMORY_CONTEXT_LIMIT: usize = 20;

/// The outcome of one `process` call.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentReply {
    pub content: String,
    pub kind: ReplyKind,
    /// Provider calls made for this message.
    pub iterations: usize,
}

/// Drives one conversation: owns its window and processes one message at
/// a time. Shared collaborators (provider, registry, memory, persistence)
/// are injected behind `Arc`s.
pub struct AgentLoop {
    session_id: String,

    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,

    tools: Arc<ToolRegistry>,
    identity: Arc<Identity>,
    events: Arc<EventBus>,

    /// Short-term entries and the long-term markdown store
    memory: Option<Arc<MemoryManager>>,

    /// Background writer to the message store
    persistence: Option<Arc<PersistenceWriter>>,

    window: ConversationWindow,
    max_iterations: usize,
    max_message_bytes: usize,

    /// Provider iterations between long-term memory flushes
    memory_flush_interval: usize,
    iterations_since_flush: usize,
}

impl AgentLoop {
    /// Create a new agent loop with default limits.
    pub fn new(
        session_id: impl Into<String>,
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        tools: Arc<ToolRegistry>,
        identity: Arc<Identity>,
        events: Arc<EventBus>,
    ) -> Self {
        let defaults = AgentConfig::default();
        Self {
            session_id: session_id.into(),
            provider,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            tools,
            identity,
            events,
            memory: None,
            persistence: None,
            window: ConversationWindow::new(WindowLimits::from(&defaults)),
            max_iterations: defaults.max_iterations,
            max_message_bytes: defaults.max_message_size_bytes,
            memory_flush_interval: defaults.memory_flush_interval,
            iterations_since_flush: 0,
        }
    }

    /// Apply every limit from the `[agent]` config section.
    pub fn with_config(mut self, config: &AgentConfig) -> Self {
        self.window = ConversationWindow::new(WindowLimits::from(config));
        self.max_iterations = config.max_iterations;
        self.max_message_bytes = config.max_message_size_bytes;
        self.memory_flush_interval = config.memory_flush_interval;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the default max tokens per LLM response.
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    /// Set the maximum number of provider calls per message.
    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_max_message_bytes(mut self, max: usize) -> Self {
        self.max_message_bytes = max;
        self
    }

    pub fn with_window_limits(mut self, limits: WindowLimits) -> Self {
        self.window = ConversationWindow::new(limits);
        self
    }

    pub fn with_memory(mut self, memory: Arc<MemoryManager>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_memory_flush_interval(mut self, iterations: usize) -> Self {
        self.memory_flush_interval = iterations;
        self
    }

    pub fn with_persistence(mut self, writer: Arc<PersistenceWriter>) -> Self {
        self.persistence = Some(writer);
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn window(&self) -> &ConversationWindow {
        &self.window
    }

    /// Seed the window with earlier turns from the message store. Nothing
    /// is written back.
    pub fn seed_history(&mut self, history: Vec<StoredMessage>) {
        let mut seeded = 0usize;
        for stored in history {
            let message = match stored.role {
                Role::User => Message::user(stored.content),
                Role::Assistant => Message::assistant(stored.content),
                _ => continue,
            };
            self.window.push(message);
            seeded += 1;
        }
        if seeded > 0 {
            debug!(session_id = %self.session_id, seeded, "Restored conversation history");
        }
    }

    /// Process one inbound message and produce the reply.
    ///
    /// Only input validation returns `Err`. Provider failures, the open
    /// circuit and the iteration bound each produce a reply of their own
    /// kind; tool failures are fed back to the model.
    pub async fn process(&mut self, inbound: &str) -> Result<AgentReply, ValidationError> {
        let content = self.validate(inbound)?;

        info!(
            session_id = %self.session_id,
            bytes = content.len(),
            window = self.window.len(),
            "Processing message"
        );
        self.events.publish(DomainEvent::MessageReceived {
            session_id: self.session_id.clone(),
            content_preview: event::preview(&content, 80),
            timestamp: Utc::now(),
        });

        if let Some(memory) = &self.memory {
            memory.record_message(Role::User, &content);
        }
        self.append(Message::user(content));

        let definitions = self.tools.definitions();
        let schemas: Vec<ToolSchema> = definitions.iter().map(ToolDefinition::to_schema).collect();

        for iteration in 1..=self.max_iterations {
            debug!(session_id = %self.session_id, iteration, "Agent loop iteration");

            let request = self.build_request(&definitions, &schemas);
            let result = self.provider.complete(request).await;
            self.tick_memory_flush().await;

            let response = match result {
                Ok(response) => response,
                Err(e) => return Ok(self.provider_failure(e, iteration)),
            };
            if let Some(usage) = &response.usage {
                debug!(
                    prompt_tokens = usage.prompt_tokens,
                    completion_tokens = usage.completion_tokens,
                    "Token usage"
                );
            }
            let model = response.model.clone();
            let parsed = ParsedResponse::from_provider(response);

            if !parsed.has_tool_calls() {
                let text = parsed.content;
                if let Some(memory) = &self.memory {
                    memory.record_message(Role::Assistant, &text);
                }
                self.append(Message::assistant(text.clone()));
                self.events.publish(DomainEvent::ResponseGenerated {
                    session_id: self.session_id.clone(),
                    model,
                    iterations: iteration,
                    timestamp: Utc::now(),
                });
                info!(session_id = %self.session_id, iterations = iteration, "Reply ready");
                return Ok(AgentReply {
                    content: text,
                    kind: ReplyKind::Answer,
                    iterations: iteration,
                });
            }

            debug!(
                source = ?parsed.source,
                calls = parsed.calls.len(),
                rejected = parsed.rejected.len(),
                "Executing tool calls"
            );
            self.append(parsed.assistant_message());

            for call in &parsed.calls {
                let started = Instant::now();
                let result = self.tools.execute(call).await;
                self.record_tool(&call.name, &result, started);
                self.append(Message::tool_result(&call.id, result.to_message_content()));
            }
            for rejected in &parsed.rejected {
                let result = ToolResult::failure(&rejected.error);
                self.events.publish(DomainEvent::ToolExecuted {
                    tool_name: rejected.name.clone(),
                    success: false,
                    duration_ms: 0,
                    timestamp: Utc::now(),
                });
                self.append(Message::tool_result(&rejected.id, result.to_message_content()));
            }
        }

        warn!(
            session_id = %self.session_id,
            max_iterations = self.max_iterations,
            "Iteration limit reached without a final reply"
        );
        self.events.publish(DomainEvent::IterationLimitReached {
            session_id: self.session_id.clone(),
            max_iterations: self.max_iterations,
            timestamp: Utc::now(),
        });
        Ok(AgentReply {
            content: FALLBACK_REPLY.into(),
            kind: ReplyKind::Fallback,
            iterations: self.max_iterations,
        })
    }

    /// Size-check, strip control characters, reject blank input.
    fn validate(&self, inbound: &str) -> Result<String, ValidationError> {
        if inbound.len() > self.max_message_bytes {
            warn!(
                session_id = %self.session_id,
                size_bytes = inbound.len(),
                max_bytes = self.max_message_bytes,
                "Rejected oversized message"
            );
            return Err(ValidationError::MessageTooLarge {
                size_bytes: inbound.len(),
                max_bytes: self.max_message_bytes,
            });
        }
        let cleaned: String = inbound
            .chars()
            .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
            .collect();
        if cleaned.trim().is_empty() {
            return Err(ValidationError::EmptyMessage);
        }
        Ok(cleaned)
    }

    fn build_request(&self, definitions: &[ToolDefinition], schemas: &[ToolSchema]) -> ProviderRequest {
        let memories = self
            .memory
            .as_ref()
            .map(|m| m.context(MEMORY_CONTEXT_LIMIT))
            .unwrap_or_default();
        let system_prompt = self.identity.system_prompt(definitions, &memories);

        let mut request = ProviderRequest::new(&self.model, self.window.to_prompt(&system_prompt));
        request.temperature = self.temperature;
        request.max_tokens = self.max_tokens;
        request.tools = schemas.to_vec();
        request
    }

    /// Append to the window and queue the write. User and assistant text is
    /// stored whole; tool output is stored as the window kept it.
    fn append(&mut self, message: Message) {
        let role = message.role;
        let original = (role != Role::Tool).then(|| message.content.clone());
        let kept = self.window.push(message);
        if let Some(writer) = &self.persistence {
            let content = original.unwrap_or_else(|| kept.to_string());
            // Call-only assistant turns have no text worth storing.
            if !content.is_empty() {
                writer.enqueue(&self.session_id, role, content);
            }
        }
    }

    fn record_tool(&self, name: &str, result: &ToolResult, started: Instant) {
        let duration_ms = started.elapsed().as_millis() as u64;
        if result.success {
            debug!(tool = %name, duration_ms, "Tool succeeded");
        } else {
            debug!(tool = %name, duration_ms, kind = ?result.error_kind, "Tool failed");
        }
        self.events.publish(DomainEvent::ToolExecuted {
            tool_name: name.to_string(),
            success: result.success,
            duration_ms,
            timestamp: Utc::now(),
        });
    }

    fn provider_failure(&self, err: ProviderError, iteration: usize) -> AgentReply {
        let circuit_open = err.is_circuit_open();
        self.events.publish(DomainEvent::ProviderFailed {
            provider: self.provider.name().to_string(),
            error_message: err.to_string(),
            circuit_open,
            timestamp: Utc::now(),
        });

        if circuit_open {
            warn!(
                session_id = %self.session_id,
                provider = self.provider.name(),
                error = %err,
                "Provider circuit open, replying unavailable"
            );
            AgentReply {
                content: UNAVAILABLE_REPLY.into(),
                kind: ReplyKind::Unavailable,
                iterations: iteration,
            }
        } else {
            error!(
                session_id = %self.session_id,
                provider = self.provider.name(),
                iteration,
                error = ?err,
                "Provider call failed"
            );
            AgentReply {
                content: FAILURE_REPLY.into(),
                kind: ReplyKind::Failed,
                iterations: iteration,
            }
        }
    }

    async fn tick_memory_flush(&mut self) {
        if self.memory.is_none() || self.memory_flush_interval == 0 {
            return;
        }
        self.iterations_since_flush += 1;
        if self.iterations_since_flush >= self.memory_flush_interval {
            self.iterations_since_flush = 0;
            self.flush_memory().await;
        }
    }

    /// Write long-term memory now. Failures are logged.
    pub async fn flush_memory(&self) {
        let Some(memory) = &self.memory else {
            return;
        };
        match memory.save_long_term().await {
            Ok(true) => debug!(path = %memory.path().display(), "Long-term memory saved"),
            Ok(false) => debug!("Long-term memory unchanged"),
            Err(e) => warn!(path = %memory.path().display(), error = %e, "Failed to save long-term memory"),
        }
    }

    /// Shutdown sequence for a standalone loop: drain persistence, flush
    /// memory, release the provider.
    pub async fn close(&self) {
        if let Some(writer) = &self.persistence {
            writer.drain().await;
        }
        self.flush_memory().await;
        self.provider.close().await;
        info!(session_id = %self.session_id, "Agent loop closed");
    }
}
