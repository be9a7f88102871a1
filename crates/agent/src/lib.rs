//! The agent tool-execution loop.
//!
//! One [`AgentLoop`] drives one conversation:
//!
//! 1. **Receive** a user message, validate it, append it to the window
//! 2. **Build context** (identity + memories + tool catalog + window)
//! 3. **Send to LLM** through the resilient provider
//! 4. **If tool calls** (native, or recovered from text): validate, execute,
//!    append results, loop back to step 3
//! 5. **If text**: that is the reply
//!
//! The loop is bounded by `max_iterations`. [`AgentRuntime`] multiplexes
//! many conversations, one worker per conversation key, and owns the
//! shutdown sequence.

pub mod conversation;
pub mod loop_runner;
pub mod persistence;
pub mod response;
pub mod runtime;
pub mod tool_parser;

pub use conversation::{ConversationWindow, WindowLimits};
pub use loop_runner::{AgentLoop, AgentReply};
pub use persistence::PersistenceWriter;
pub use response::{CallSource, ParsedResponse, RejectedCall};
pub use runtime::AgentRuntime;
pub use tool_parser::{ParsedToolCall, parse_tool_calls};
