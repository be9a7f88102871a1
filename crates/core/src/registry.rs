//! Tool registry: validation, rate limiting and guarded dispatch.
//!
//! `execute` never returns an error. Unknown tools, bad arguments, rate
//! limit hits, open tool circuits, timeouts, tool errors and panics all
//! come back as a failed `ToolResult` so the agent loop can feed them to
//! the model.

use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::error::ToolError;
use crate::provider::ToolSchema;
use crate::rate_limit::RateLimiter;
use crate::tool::{Tool, ToolArguments, ToolCall, ToolDefinition, ToolResult};
use crate::tool_breaker::ToolBreaker;

pub const DEFAULT_RATE_LIMIT_PER_MINUTE: usize = 10;
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

struct Registered {
    tool: Arc<dyn Tool>,
    definition: ToolDefinition,
}

/// The catalog of tools available to the agent.
///
/// Shared across conversations behind an `Arc`; the rate limiter and the
/// per-tool breaker are the only mutable state and both are internally
/// synchronized.
pub struct ToolRegistry {
    tools: HashMap<String, Registered>,
    limiter: RateLimiter,
    breaker: ToolBreaker,
    timeout: Duration,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_RATE_LIMIT_PER_MINUTE, DEFAULT_TOOL_TIMEOUT)
    }

    pub fn with_limits(rate_limit_per_minute: usize, timeout: Duration) -> Self {
        Self {
            tools: HashMap::new(),
            limiter: RateLimiter::per_minute(rate_limit_per_minute),
            breaker: ToolBreaker::default(),
            timeout,
        }
    }

    /// Skip a tool for `cooldown` after `failure_threshold` consecutive
    /// failed runs.
    pub fn with_circuit_breaker(mut self, failure_threshold: u32, cooldown: Duration) -> Self {
        self.breaker = ToolBreaker::new(failure_threshold, cooldown);
        self
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let definition = tool.definition();
        let name = definition.name.clone();
        let previous = self.tools.insert(
            name.clone(),
            Registered {
                tool: Arc::from(tool),
                definition,
            },
        );
        if previous.is_some() {
            debug!(tool = %name, "Replaced registered tool");
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn definition(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name).map(|r| &r.definition)
    }

    /// All definitions, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.values().map(|r| r.definition.clone()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Provider-facing schemas, sorted by name.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.definitions().iter().map(ToolDefinition::to_schema).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Check that `name` exists and `arguments` fit its schema.
    ///
    /// Returns the sanitized arguments the tool would receive.
    pub fn validate(&self, name: &str, arguments: &ToolArguments) -> Result<ToolArguments, ToolError> {
        let registered = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        registered.definition.validate(arguments)
    }

    /// Validate, rate-limit and run a tool call.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        let arguments = match self.validate(&call.name, &call.arguments) {
            Ok(args) => args,
            Err(e) => {
                warn!(tool = %call.name, call_id = %call.id, error = %e, "Rejected tool call");
                return ToolResult::failure(&e);
            }
        };

        if let Err(remaining) = self.breaker.check(&call.name) {
            let e = ToolError::Unavailable {
                tool_name: call.name.clone(),
                retry_after_secs: remaining.as_secs().max(1),
            };
            warn!(tool = %call.name, "Tool circuit open, call skipped");
            return ToolResult::failure(&e);
        }

        if !self.limiter.try_acquire(&call.name) {
            let e = ToolError::RateLimited {
                tool_name: call.name.clone(),
                limit: self.limiter.max_calls(),
                window_secs: self.limiter.window().as_secs(),
            };
            warn!(tool = %call.name, "Tool rate limit exceeded");
            return ToolResult::failure(&e);
        }

        // Checked by validate above.
        let Some(registered) = self.tools.get(&call.name) else {
            return ToolResult::failure(&ToolError::NotFound(call.name.clone()));
        };
        let timeout = registered.tool.timeout().unwrap_or(self.timeout);
        let tool = Arc::clone(&registered.tool);

        debug!(tool = %call.name, call_id = %call.id, "Executing tool");
        let guarded = AssertUnwindSafe(tool.execute(arguments)).catch_unwind();

        let result = match tokio::time::timeout(timeout, guarded).await {
            Ok(Ok(Ok(result))) => result,
            Ok(Ok(Err(e))) => {
                warn!(tool = %call.name, error = %e, "Tool returned an error");
                ToolResult::failure(&e)
            }
            Ok(Err(panic)) => {
                error!(
                    tool = %call.name,
                    panic = %panic_message(panic.as_ref()),
                    "Tool panicked"
                );
                ToolResult::failure(&ToolError::failed(&call.name, "internal tool error"))
            }
            Err(_) => {
                warn!(tool = %call.name, timeout_secs = timeout.as_secs(), "Tool timed out");
                ToolResult::failure(&ToolError::Timeout {
                    tool_name: call.name.clone(),
                    timeout_secs: timeout.as_secs(),
                })
            }
        };

        if result.success {
            self.breaker.record_success(&call.name);
        } else {
            self.breaker.record_failure(&call.name);
        }
        result
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{ToolErrorKind, ToolParameter};
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A simple test tool that counts invocations.
    struct EchoTool {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn parameters(&self) -> Vec<ToolParameter> {
            vec![ToolParameter::string("text", "Text to echo")]
        }
        async fn execute(&self, arguments: ToolArguments) -> Result<ToolResult, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let text = arguments["text"].as_str().unwrap_or("").to_string();
            Ok(ToolResult::ok(text))
        }
    }

    struct PanicTool;

    #[async_trait]
    impl Tool for PanicTool {
        fn name(&self) -> &str {
            "explode"
        }
        fn description(&self) -> &str {
            "Always panics"
        }
        fn parameters(&self) -> Vec<ToolParameter> {
            vec![]
        }
        async fn execute(&self, _arguments: ToolArguments) -> Result<ToolResult, ToolError> {
            panic!("secret internal state at 0xdeadbeef");
        }
    }

    /// Fails every call with a tool error.
    struct FlakyTool {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for FlakyTool {
        fn name(&self) -> &str {
            "flaky"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        fn parameters(&self) -> Vec<ToolParameter> {
            vec![ToolParameter::string("target", "What to touch").optional()]
        }
        async fn execute(&self, _arguments: ToolArguments) -> Result<ToolResult, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ToolError::failed("flaky", "disk unplugged"))
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "Sleeps"
        }
        fn parameters(&self) -> Vec<ToolParameter> {
            vec![]
        }
        fn timeout(&self) -> Option<Duration> {
            Some(Duration::from_secs(5))
        }
        async fn execute(&self, _arguments: ToolArguments) -> Result<ToolResult, ToolError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(ToolResult::ok("done"))
        }
    }

    fn echo_registry(limit: usize) -> (ToolRegistry, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::with_limits(limit, DEFAULT_TOOL_TIMEOUT);
        registry.register(Box::new(EchoTool {
            calls: Arc::clone(&calls),
        }));
        (registry, calls)
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall::new("call_1", name, args.as_object().cloned().unwrap_or_default())
    }

    #[tokio::test]
    async fn executes_registered_tool() {
        let (registry, calls) = echo_registry(10);
        let result = registry.execute(&call("echo", json!({"text": "hi"}))).await;
        assert!(result.success);
        assert_eq!(result.output, "hi");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_tool_never_dispatches() {
        let (registry, calls) = echo_registry(10);
        let result = registry.execute(&call("rm_everything", json!({}))).await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ToolErrorKind::NotFound));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_required_param_rejected_before_execute() {
        let (registry, calls) = echo_registry(10);
        assert!(registry.validate("echo", &ToolArguments::new()).is_err());

        let result = registry.execute(&call("echo", json!({}))).await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ToolErrorKind::InvalidArguments));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn reregistration_replaces() {
        let (mut registry, first) = echo_registry(10);
        let second = Arc::new(AtomicUsize::new(0));
        registry.register(Box::new(EchoTool {
            calls: Arc::clone(&second),
        }));
        assert_eq!(registry.len(), 1);

        registry.execute(&call("echo", json!({"text": "x"}))).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_fails_fast() {
        let (registry, calls) = echo_registry(2);
        for _ in 0..2 {
            assert!(registry.execute(&call("echo", json!({"text": "x"}))).await.success);
        }
        let limited = registry.execute(&call("echo", json!({"text": "x"}))).await;
        assert!(!limited.success);
        assert_eq!(limited.error_kind, Some(ToolErrorKind::RateLimited));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(registry.execute(&call("echo", json!({"text": "x"}))).await.success);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_calls_do_not_consume_rate_budget() {
        let (registry, _) = echo_registry(1);
        registry.execute(&call("echo", json!({}))).await;
        assert!(registry.execute(&call("echo", json!({"text": "x"}))).await.success);
    }

    #[tokio::test]
    async fn panics_become_sanitized_failures() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(PanicTool));
        let result = registry.execute(&call("explode", json!({}))).await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ToolErrorKind::Execution));
        let text = result.error.unwrap();
        assert!(!text.contains("0xdeadbeef"));
        assert!(text.contains("internal tool error"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tool_times_out() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(SlowTool));
        let result = registry.execute(&call("slow", json!({}))).await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ToolErrorKind::Timeout));
        assert!(result.error.unwrap().contains("after 5s"));
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_failures_open_the_tool_circuit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::with_limits(100, DEFAULT_TOOL_TIMEOUT)
            .with_circuit_breaker(3, Duration::from_secs(60));
        registry.register(Box::new(FlakyTool {
            calls: Arc::clone(&calls),
        }));
        let (mut echo, echo_calls) = echo_registry(100);
        echo = echo.with_circuit_breaker(3, Duration::from_secs(60));

        for _ in 0..3 {
            let result = registry.execute(&call("flaky", json!({}))).await;
            assert_eq!(result.error_kind, Some(ToolErrorKind::Execution));
        }
        let skipped = registry.execute(&call("flaky", json!({}))).await;
        assert_eq!(skipped.error_kind, Some(ToolErrorKind::Unavailable));
        assert!(skipped.error.unwrap().contains("retry in 60s"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // Other tools are unaffected.
        assert!(echo.execute(&call("echo", json!({"text": "x"}))).await.success);
        assert_eq!(echo_calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(60)).await;
        let retried = registry.execute(&call("flaky", json!({}))).await;
        assert_eq!(retried.error_kind, Some(ToolErrorKind::Execution));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_count_and_validation_errors_do_not() {
        let mut registry = ToolRegistry::new().with_circuit_breaker(2, Duration::from_secs(60));
        registry.register(Box::new(SlowTool));
        let (mut echo, _) = echo_registry(100);
        echo = echo.with_circuit_breaker(2, Duration::from_secs(60));

        for _ in 0..5 {
            echo.execute(&call("echo", json!({}))).await;
        }
        assert!(echo.execute(&call("echo", json!({"text": "x"}))).await.success);

        for _ in 0..2 {
            let result = registry.execute(&call("slow", json!({}))).await;
            assert_eq!(result.error_kind, Some(ToolErrorKind::Timeout));
        }
        let skipped = registry.execute(&call("slow", json!({}))).await;
        assert_eq!(skipped.error_kind, Some(ToolErrorKind::Unavailable));
    }

    #[test]
    fn definitions_sorted_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(SlowTool));
        registry.register(Box::new(PanicTool));
        let names: Vec<String> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["explode", "slow"]);
        assert_eq!(registry.names(), vec!["explode", "slow"]);
    }
}
