//! Wires config into the shared collaborators every agent loop needs.

use clawloop_agent::{AgentLoop, PersistenceWriter};
use clawloop_config::AppConfig;
use clawloop_core::event::EventBus;
use clawloop_core::identity::Identity;
use clawloop_core::provider::Provider;
use clawloop_core::registry::ToolRegistry;
use clawloop_core::storage::MessageStore;
use clawloop_memory::{MemoryManager, NoopStore};
use clawloop_providers::ResilientProvider;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

pub struct Stack {
    pub config: AppConfig,
    pub provider: Arc<ResilientProvider>,
    pub model: String,
    pub tools: Arc<ToolRegistry>,
    pub identity: Arc<Identity>,
    pub events: Arc<EventBus>,
    pub memory: Arc<MemoryManager>,
    pub store: Arc<dyn MessageStore>,
    pub writer: Arc<PersistenceWriter>,
}

impl Stack {
    pub async fn build(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let provider = clawloop_providers::build_from_config(&config)
            .map_err(|e| format!("Provider setup failed: {e}"))?;
        let model = clawloop_providers::factory::model_for(&config);

        let workspace = config.workspace_dir();
        std::fs::create_dir_all(&workspace)?;
        let identity = Arc::new(Identity::load(&workspace));

        let memory = Arc::new(
            clawloop_memory::open_memory(&config)
                .map_err(|e| format!("Failed to load long-term memory: {e}"))?,
        );
        let mut registry = clawloop_tools::default_registry(&config.tools, &workspace);
        clawloop_tools::register_memory_tools(&mut registry, Arc::clone(&memory));
        let tools = Arc::new(registry);

        // Storage is best-effort: a broken backend must not stop the agent.
        let store = match clawloop_memory::open_store(&config).await {
            Ok(store) => store,
            Err(e) => {
                warn!(error = %e, "Message storage unavailable, continuing without it");
                Arc::new(NoopStore) as Arc<dyn MessageStore>
            }
        };

        let events = Arc::new(EventBus::default());
        let writer = Arc::new(PersistenceWriter::spawn(Arc::clone(&store), Arc::clone(&events)));

        info!(
            provider = %config.default_provider,
            model = %model,
            tools = tools.len(),
            storage = store.name(),
            "Agent stack ready"
        );

        Ok(Self {
            config,
            provider,
            model,
            tools,
            identity,
            events,
            memory,
            store,
            writer,
        })
    }

    /// A loop for `session_id`, configured from the `[agent]` section.
    pub fn agent_loop(&self, session_id: impl Into<String>) -> AgentLoop {
        let provider: Arc<dyn Provider> = self.provider.clone();
        AgentLoop::new(
            session_id,
            provider,
            self.model.clone(),
            Arc::clone(&self.tools),
            Arc::clone(&self.identity),
            Arc::clone(&self.events),
        )
        .with_config(&self.config.agent)
        .with_temperature(self.config.default_temperature)
        .with_max_tokens(self.config.default_max_tokens)
        .with_memory(Arc::clone(&self.memory))
        .with_persistence(Arc::clone(&self.writer))
    }

    /// Log domain events at debug level, for `--verbose`.
    pub fn trace_events(&self) {
        let mut rx = self.events.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => debug!(
                        event = event.name(),
                        session_id = event.session_id().unwrap_or("-"),
                        detail = ?event,
                        "Domain event"
                    ),
                    Err(RecvError::Lagged(skipped)) => debug!(skipped, "Event trace lagging"),
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }
}
