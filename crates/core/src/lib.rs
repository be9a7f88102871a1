//! # clawloop core
//!
//! Domain types, traits, and error definitions for the clawloop agent
//! runtime. Every other crate depends inward on this one.
//!
//! The seams are traits: `Provider` for LLM backends, `Tool` for agent
//! capabilities, `MessageStore` for durable history and `Channel` for
//! reply delivery. Implementations live in their own crates, and tests
//! swap in mocks.

pub mod channel;
pub mod error;
pub mod event;
pub mod identity;
pub mod message;
pub mod provider;
pub mod rate_limit;
pub mod registry;
pub mod storage;
pub mod tool;
pub mod tool_breaker;

// Re-export key types at crate root for ergonomics
pub use channel::{Channel, ConversationKey, InboundMessage, OutboundMessage, ReplyKind};
pub use error::{Error, Result};
pub use event::{DomainEvent, EventBus};
pub use identity::Identity;
pub use message::{Message, MessageToolCall, Role};
pub use provider::{FinishReason, Provider, ProviderRequest, ProviderResponse, ToolSchema};
pub use registry::ToolRegistry;
pub use storage::{MessageStore, StoredMessage};
pub use tool::{ParamType, Tool, ToolArguments, ToolCall, ToolDefinition, ToolParameter, ToolResult};
