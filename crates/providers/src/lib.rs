//! LLM provider implementations for clawloop.
//!
//! `OpenAiCompatProvider` talks HTTP. `ResilientProvider` wraps any
//! provider with per-attempt timeouts, retries with exponential backoff,
//! and a shared `CircuitBreaker`.

pub mod circuit_breaker;
pub mod factory;
pub mod openai_compat;
pub mod resilient;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use factory::build_from_config;
pub use openai_compat::OpenAiCompatProvider;
pub use resilient::ResilientProvider;
pub use retry::RetryPolicy;
