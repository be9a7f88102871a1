//! End-to-end tests for the clawloop agent pipeline.
//!
//! Each test wires the real tool registry, memory manager, persistence
//! writer and resilient provider around a scripted model, then drives
//! messages through `AgentLoop` the way the CLI does.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clawloop_agent::{AgentLoop, PersistenceWriter};
use clawloop_config::ToolsConfig;
use clawloop_core::channel::ReplyKind;
use clawloop_core::error::{ProviderError, ValidationError};
use clawloop_core::event::{DomainEvent, EventBus};
use clawloop_core::identity::Identity;
use clawloop_core::message::{Message, Role};
use clawloop_core::provider::{FinishReason, Provider, ProviderRequest, ProviderResponse};
use clawloop_core::storage::MessageStore;
use clawloop_memory::{InMemoryStore, MemoryManager};
use clawloop_providers::{CircuitBreaker, CircuitState, ResilientProvider, RetryPolicy};
use clawloop_tools::{default_registry, register_memory_tools};

// ── Scripted model ──────────────────────────────────────────────────────

enum Step {
    Reply(Message),
    Fail(ProviderError),
    Hang,
}

/// Replays scripted steps; once exhausted, repeats the last reply.
struct ScriptedProvider {
    script: Mutex<VecDeque<Step>>,
    repeat: Mutex<Option<Message>>,
    requests: Mutex<Vec<ProviderRequest>>,
    attempts: AtomicUsize,
}

impl ScriptedProvider {
    fn new(script: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            repeat: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
        })
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn request(&self, i: usize) -> ProviderRequest {
        self.requests.lock().unwrap()[i].clone()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        let step = self.script.lock().unwrap().pop_front();
        let message = match step {
            Some(Step::Reply(message)) => {
                *self.repeat.lock().unwrap() = Some(message.clone());
                message
            }
            Some(Step::Fail(e)) => return Err(e),
            Some(Step::Hang) => std::future::pending::<Message>().await,
            None => self
                .repeat
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| Message::assistant("done")),
        };
        Ok(ProviderResponse {
            message,
            usage: None,
            model: "scripted-model".into(),
            finish_reason: FinishReason::Stop,
            metadata: serde_json::Map::new(),
        })
    }
}

// ── Harness ─────────────────────────────────────────────────────────────

struct Harness {
    _workspace: tempfile::TempDir,
    workspace_path: std::path::PathBuf,
    events: Arc<EventBus>,
    memory: Arc<MemoryManager>,
    store: Arc<InMemoryStore>,
    writer: Arc<PersistenceWriter>,
}

impl Harness {
    fn new() -> Self {
        let workspace = tempfile::tempdir().unwrap();
        let workspace_path = workspace.path().to_path_buf();
        std::fs::write(workspace_path.join("notes.txt"), "remember the milk").unwrap();

        let events = Arc::new(EventBus::default());
        let store = Arc::new(InMemoryStore::new());
        let writer = Arc::new(PersistenceWriter::spawn(
            store.clone() as Arc<dyn MessageStore>,
            Arc::clone(&events),
        ));
        let memory = Arc::new(MemoryManager::new(workspace_path.join("MEMORY.md"), 50, 5));

        Self {
            _workspace: workspace,
            workspace_path,
            events,
            memory,
            store,
            writer,
        }
    }

    fn agent(&self, provider: Arc<dyn Provider>) -> AgentLoop {
        let mut registry = default_registry(&ToolsConfig::default(), &self.workspace_path);
        register_memory_tools(&mut registry, Arc::clone(&self.memory));
        let tools = Arc::new(registry);
        AgentLoop::new(
            "cli:e2e",
            provider,
            "scripted-model",
            tools,
            Arc::new(Identity::default_identity()),
            Arc::clone(&self.events),
        )
        .with_memory(Arc::clone(&self.memory))
        .with_persistence(Arc::clone(&self.writer))
    }
}

fn resilient(
    inner: Arc<ScriptedProvider>,
    breaker: Arc<CircuitBreaker>,
    policy: RetryPolicy,
) -> Arc<ResilientProvider> {
    Arc::new(
        ResilientProvider::new(inner, breaker)
            .with_policy(policy)
            .with_timeout(Duration::from_secs(30)),
    )
}

// ── Tool calling ────────────────────────────────────────────────────────

#[tokio::test]
async fn raw_json_tool_call_runs_the_real_tool() {
    let harness = Harness::new();
    let provider = ScriptedProvider::new(vec![
        Step::Reply(Message::assistant(r#"{"name": "list_dir", "arguments": {"path": "."}}"#)),
        Step::Reply(Message::assistant("You have notes.txt in your workspace.")),
    ]);
    let mut agent = harness.agent(provider.clone());

    let reply = agent.process("What files do I have?").await.unwrap();
    assert_eq!(reply.kind, ReplyKind::Answer);
    assert_eq!(reply.content, "You have notes.txt in your workspace.");
    assert_eq!(reply.iterations, 2);

    // The second request carries the tool output right after the call.
    let second = provider.request(1);
    let call_at = second
        .messages
        .iter()
        .position(|m| m.role == Role::Assistant && !m.tool_calls.is_empty())
        .expect("assistant call message");
    let result = &second.messages[call_at + 1];
    assert_eq!(result.role, Role::Tool);
    assert_eq!(result.tool_call_id.as_deref(), Some(second.messages[call_at].tool_calls[0].id.as_str()));
    assert!(result.content.contains("notes.txt"));

    harness.writer.drain().await;
    let stored = harness.store.get_messages("cli:e2e", 50).await.unwrap();
    let roles: Vec<Role> = stored.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
    assert!(stored[2].content.contains("notes.txt"));
}

#[tokio::test]
async fn unknown_tool_reports_failure_to_the_model() {
    let harness = Harness::new();
    let provider = ScriptedProvider::new(vec![
        Step::Reply(Message::assistant(
            "<tool_call>{\"name\": \"teleport\", \"arguments\": {}}</tool_call>",
        )),
        Step::Reply(Message::assistant("I can't do that.")),
    ]);
    let mut agent = harness.agent(provider.clone());

    let reply = agent.process("Teleport me").await.unwrap();
    assert_eq!(reply.content, "I can't do that.");

    let tool_message = provider
        .request(1)
        .messages
        .into_iter()
        .find(|m| m.role == Role::Tool)
        .expect("tool result");
    assert!(tool_message.content.starts_with("Error:"));
    assert!(tool_message.content.contains("teleport"));
}

#[tokio::test]
async fn iteration_limit_returns_fallback() {
    let harness = Harness::new();
    let provider = ScriptedProvider::new(vec![Step::Reply(Message::assistant(
        r#"{"name": "list_dir", "arguments": {}}"#,
    ))]);
    let mut agent = harness.agent(provider.clone()).with_max_iterations(3);
    let mut events = harness.events.subscribe();

    let reply = agent.process("Loop forever").await.unwrap();
    assert_eq!(reply.kind, ReplyKind::Fallback);
    assert_eq!(provider.attempts(), 3);

    let mut saw_limit = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event.as_ref(), DomainEvent::IterationLimitReached { max_iterations: 3, .. }) {
            saw_limit = true;
        }
    }
    assert!(saw_limit);
}

// ── Input validation ────────────────────────────────────────────────────

#[tokio::test]
async fn oversized_message_never_reaches_the_model() {
    let harness = Harness::new();
    let provider = ScriptedProvider::new(vec![]);
    let mut agent = harness.agent(provider.clone());

    let huge = "a".repeat(150 * 1024);
    let err = agent.process(&huge).await.unwrap_err();
    assert!(matches!(err, ValidationError::MessageTooLarge { size_bytes, .. } if size_bytes == huge.len()));
    assert_eq!(provider.attempts(), 0);
    assert!(agent.window().is_empty());

    harness.writer.drain().await;
    assert!(harness.store.is_empty().await);
}

// ── Resilience ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn timeouts_are_retried_then_reported() {
    let harness = Harness::new();
    let inner = ScriptedProvider::new(vec![Step::Hang, Step::Hang, Step::Hang]);
    let breaker = Arc::new(CircuitBreaker::new(5, Duration::from_secs(60)));
    let provider = resilient(
        inner.clone(),
        Arc::clone(&breaker),
        RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(4)),
    );
    let mut agent = harness.agent(provider);

    let reply = agent.process("Hello?").await.unwrap();
    assert_eq!(reply.kind, ReplyKind::Failed);
    assert_eq!(inner.attempts(), 3);
    // One logical call, one breaker failure.
    assert_eq!(breaker.consecutive_failures(), 1);
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test]
async fn open_circuit_fails_fast_without_calling_the_model() {
    let harness = Harness::new();
    let inner = ScriptedProvider::new(vec![
        Step::Fail(ProviderError::Network("connection reset".into())),
        Step::Fail(ProviderError::Network("connection reset".into())),
    ]);
    let breaker = Arc::new(CircuitBreaker::new(2, Duration::from_secs(60)));
    let provider = resilient(inner.clone(), Arc::clone(&breaker), RetryPolicy::none());
    let mut agent = harness.agent(provider);

    for _ in 0..2 {
        let reply = agent.process("ping").await.unwrap();
        assert_eq!(reply.kind, ReplyKind::Failed);
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    let reply = agent.process("ping").await.unwrap();
    assert_eq!(reply.kind, ReplyKind::Unavailable);
    assert_eq!(inner.attempts(), 2);
}

// ── Memory ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn remember_tool_feeds_the_next_system_prompt() {
    let harness = Harness::new();
    let provider = ScriptedProvider::new(vec![
        Step::Reply(Message::assistant(
            "tool: remember arguments: {\"key\": \"editor\", \"value\": \"helix\", \"importance\": 9}",
        )),
        Step::Reply(Message::assistant("Got it.")),
        Step::Reply(Message::assistant("You use helix.")),
    ]);
    let mut agent = harness.agent(provider.clone());

    let reply = agent.process("I edit code in helix, keep that in mind").await.unwrap();
    assert_eq!(reply.content, "Got it.");
    assert_eq!(harness.memory.recall("editor").as_deref(), Some("helix"));

    agent.process("Which editor do I use?").await.unwrap();
    let system = &provider.request(2).messages[0];
    assert_eq!(system.role, Role::System);
    assert!(system.content.contains("editor: helix"));
}

#[tokio::test]
async fn failing_tool_is_skipped_after_repeated_failures() {
    let harness = Harness::new();
    let missing = r#"{"name": "read_file", "arguments": {"path": "missing.txt"}}"#;
    let provider = ScriptedProvider::new(vec![
        Step::Reply(Message::assistant(missing)),
        Step::Reply(Message::assistant(missing)),
        Step::Reply(Message::assistant(missing)),
        Step::Reply(Message::assistant(missing)),
        Step::Reply(Message::assistant("That file does not exist.")),
    ]);
    let mut agent = harness.agent(provider.clone());

    let reply = agent.process("Read missing.txt").await.unwrap();
    assert_eq!(reply.kind, ReplyKind::Answer);

    let last = provider.request(4);
    let tool_results: Vec<&Message> = last.messages.iter().filter(|m| m.role == Role::Tool).collect();
    assert_eq!(tool_results.len(), 4);
    assert!(tool_results[3].content.contains("temporarily unavailable"));
}

#[tokio::test]
async fn long_term_memory_save_is_idempotent() {
    let harness = Harness::new();
    let provider = ScriptedProvider::new(vec![Step::Reply(Message::assistant("Noted."))]);
    let mut agent = harness.agent(provider);

    agent
        .process("Remember that my name is Robin and I prefer Rust for every project.")
        .await
        .unwrap();
    assert!(harness.memory.short_term_len() > 0);

    harness.memory.save_long_term().await.unwrap();
    let first = std::fs::read_to_string(harness.memory.path()).unwrap();
    let rewritten = harness.memory.save_long_term().await.unwrap();
    let second = std::fs::read_to_string(harness.memory.path()).unwrap();

    assert!(!rewritten);
    assert_eq!(first, second);
}
