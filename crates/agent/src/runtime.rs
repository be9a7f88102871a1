//! Multiplexes conversations onto agent loops.
//!
//! Inbound messages arrive on one mpsc channel. Each conversation key gets
//! its own worker task and queue, so messages for one conversation are
//! processed strictly in order while different conversations run
//! concurrently. A worker that sits idle past the idle timeout exits and
//! its conversation is restarted from storage on the next message; the
//! replacement waits for the old worker to finish first. A `watch` flag
//! requests shutdown: workers abandon the
//! iteration in flight at its next suspension point, then the runtime
//! drains persistence, flushes memory and closes the provider, once.

use clawloop_core::channel::{ConversationKey, InboundMessage, OutboundMessage, ReplyKind};
use clawloop_core::error::ValidationError;
use clawloop_core::provider::Provider;
use clawloop_core::storage::MessageStore;
use clawloop_memory::MemoryManager;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::loop_runner::AgentLoop;
use crate::persistence::PersistenceWriter;

type LoopFactory = Arc<dyn Fn(&ConversationKey) -> AgentLoop + Send + Sync>;

/// A live conversation worker as seen by the router.
struct Session {
    queue: mpsc::UnboundedSender<InboundMessage>,
    /// Resolves (with an error) once the worker has returned.
    finished: oneshot::Receiver<()>,
}

impl Session {
    fn is_finished(&mut self) -> bool {
        matches!(
            self.finished.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        )
    }
}

pub struct AgentRuntime {
    factory: LoopFactory,
    provider: Arc<dyn Provider>,
    store: Option<Arc<dyn MessageStore>>,
    history_limit: usize,
    idle_timeout: Option<Duration>,
    memory: Option<Arc<MemoryManager>>,
    persistence: Option<Arc<PersistenceWriter>>,
}

impl AgentRuntime {
    /// `factory` builds the loop for a conversation the first time its key
    /// is seen. `provider` is the shared instance closed at shutdown.
    pub fn new(
        provider: Arc<dyn Provider>,
        factory: impl Fn(&ConversationKey) -> AgentLoop + Send + Sync + 'static,
    ) -> Self {
        Self {
            factory: Arc::new(factory),
            provider,
            store: None,
            history_limit: 0,
            idle_timeout: None,
            memory: None,
            persistence: None,
        }
    }

    /// Reload up to `history_limit` earlier messages when a conversation
    /// starts.
    pub fn with_store(mut self, store: Arc<dyn MessageStore>, history_limit: usize) -> Self {
        self.store = Some(store);
        self.history_limit = history_limit;
        self
    }

    /// Stop a conversation's worker after `idle` without messages.
    pub fn with_idle_timeout(mut self, idle: Duration) -> Self {
        self.idle_timeout = Some(idle);
        self
    }

    pub fn with_memory(mut self, memory: Arc<MemoryManager>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_persistence(mut self, writer: Arc<PersistenceWriter>) -> Self {
        self.persistence = Some(writer);
        self
    }

    /// Route inbound messages until the inbound channel closes or shutdown
    /// is requested, then run the shutdown sequence.
    pub async fn run(
        self,
        mut inbound: mpsc::Receiver<InboundMessage>,
        outbound: mpsc::Sender<OutboundMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let worker_shutdown = shutdown.clone();
        let mut sessions: HashMap<ConversationKey, Session> = HashMap::new();
        let mut workers = JoinSet::new();
        info!(provider = self.provider.name(), "Agent runtime started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => {
                    info!(sessions = sessions.len(), "Shutdown requested");
                    break;
                }
                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    log_worker_exit(joined);
                }
                next = inbound.recv() => {
                    let Some(message) = next else {
                        debug!("Inbound channel closed");
                        break;
                    };
                    let key = message.key();
                    let mut pending = Some(message);
                    // A second pass covers a worker that went idle after
                    // the lookup.
                    for _ in 0..2 {
                        let Some(message) = pending.take() else { break };
                        if !sessions.contains_key(&key) {
                            sessions.retain(|_, session| !session.is_finished());
                        }
                        let session = match sessions.remove(&key) {
                            Some(session) if !session.queue.is_closed() => {
                                sessions.entry(key.clone()).or_insert(session)
                            }
                            previous => {
                                let session = self.start_session(
                                    &key,
                                    previous.map(|s| s.finished),
                                    &mut workers,
                                    outbound.clone(),
                                    worker_shutdown.clone(),
                                );
                                sessions.entry(key.clone()).or_insert(session)
                            }
                        };
                        if let Err(returned) = session.queue.send(message) {
                            pending = Some(returned.0);
                        }
                    }
                    if pending.is_some() {
                        warn!(session_id = %key.session_id(), "Session worker has stopped, message dropped");
                    }
                }
            }
        }

        // Closing the queues lets idle workers finish what they hold.
        drop(sessions);
        while let Some(joined) = workers.join_next().await {
            log_worker_exit(joined);
        }
        self.shutdown().await;
    }

    fn start_session(
        &self,
        key: &ConversationKey,
        predecessor: Option<oneshot::Receiver<()>>,
        workers: &mut JoinSet<()>,
        outbound: mpsc::Sender<OutboundMessage>,
        shutdown: watch::Receiver<bool>,
    ) -> Session {
        let (tx, rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();
        let agent = (self.factory)(key);
        debug!(session_id = %key.session_id(), "Starting session worker");
        let worker = session_worker(
            key.clone(),
            agent,
            rx,
            WorkerOptions {
                store: self.store.clone(),
                history_limit: self.history_limit,
                idle_timeout: self.idle_timeout,
                predecessor,
            },
            outbound,
            shutdown,
        );
        workers.spawn(async move {
            worker.await;
            drop(done_tx);
        });
        Session {
            queue: tx,
            finished: done_rx,
        }
    }

    async fn shutdown(&self) {
        if let Some(writer) = &self.persistence {
            writer.close().await;
        }
        if let Some(memory) = &self.memory {
            match memory.save_long_term().await {
                Ok(written) => debug!(written, "Long-term memory flushed"),
                Err(e) => warn!(error = %e, "Failed to flush long-term memory"),
            }
        }
        self.provider.close().await;
        info!("Agent runtime stopped");
    }
}

struct WorkerOptions {
    store: Option<Arc<dyn MessageStore>>,
    history_limit: usize,
    idle_timeout: Option<Duration>,
    predecessor: Option<oneshot::Receiver<()>>,
}

async fn session_worker(
    key: ConversationKey,
    mut agent: AgentLoop,
    mut queue: mpsc::UnboundedReceiver<InboundMessage>,
    options: WorkerOptions,
    outbound: mpsc::Sender<OutboundMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    let session_id = key.session_id();
    if let Some(previous) = options.predecessor {
        // Err once the previous worker returns; there is never a value.
        let _ = previous.await;
    }
    if let Some(store) = options.store.filter(|_| options.history_limit > 0) {
        match store.get_conversation(&session_id, options.history_limit).await {
            Ok(history) => agent.seed_history(history),
            Err(e) => warn!(session_id = %session_id, error = %e, "Could not reload history"),
        }
    }

    loop {
        let message = tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            next = next_message(&mut queue, options.idle_timeout) => match next {
                Some(message) => message,
                None => break,
            },
        };

        let result = tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => {
                info!(session_id = %session_id, "In-flight message cancelled by shutdown");
                break;
            }
            result = agent.process(&message.content) => result,
        };

        let reply = match result {
            Ok(reply) => OutboundMessage::new(&key, reply.content, reply.kind),
            Err(e) => OutboundMessage::new(&key, rejection_text(&e), ReplyKind::Rejected),
        };
        if outbound.send(reply).await.is_err() {
            warn!(session_id = %session_id, "Outbound channel closed");
            break;
        }
    }
    debug!(session_id = %session_id, "Session worker stopped");
}

fn log_worker_exit(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined
        && e.is_panic()
    {
        error!(error = %e, "Session worker panicked");
    }
}

/// The next queued message. After `idle` with nothing queued the queue is
/// closed, and only what was sent before the close is still delivered.
async fn next_message(
    queue: &mut mpsc::UnboundedReceiver<InboundMessage>,
    idle: Option<Duration>,
) -> Option<InboundMessage> {
    let Some(idle) = idle else {
        return queue.recv().await;
    };
    match tokio::time::timeout(idle, queue.recv()).await {
        Ok(next) => next,
        Err(_) => {
            debug!("Session idle, closing queue");
            queue.close();
            queue.recv().await
        }
    }
}

fn rejection_text(err: &ValidationError) -> String {
    match err {
        ValidationError::MessageTooLarge {
            size_bytes,
            max_bytes,
        } => format!(
            "Your message is too large ({size_bytes} bytes). The limit is {max_bytes} bytes."
        ),
        ValidationError::EmptyMessage => "Your message was empty.".into(),
    }
}

/// Resolves once shutdown is requested. A dropped sender never resolves.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
