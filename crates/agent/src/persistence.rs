//! Background message persistence.
//!
//! The loop never waits on storage. Writes go through an unbounded queue to
//! a single writer task, which keeps them in enqueue order. `drain` is a
//! barrier: it resolves once every write queued before it has finished.
//! Failures are logged and published as events; they never reach the user.

use clawloop_core::event::{DomainEvent, EventBus};
use clawloop_core::message::Role;
use clawloop_core::storage::MessageStore;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Consecutive failures before the log level escalates to `error`.
const FAILURE_ESCALATION: usize = 5;

enum Job {
    Write {
        session_id: String,
        role: Role,
        content: String,
    },
    Drain(oneshot::Sender<()>),
}

pub struct PersistenceWriter {
    tx: mpsc::UnboundedSender<Job>,
    pending: Arc<AtomicUsize>,
    failed: Arc<AtomicUsize>,
    handle: Mutex<Option<JoinHandle<()>>>,
    backend: String,
}

impl PersistenceWriter {
    /// Spawn the writer task. Must be called inside a tokio runtime.
    pub fn spawn(store: Arc<dyn MessageStore>, events: Arc<EventBus>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));
        let backend = store.name().to_string();
        let handle = tokio::spawn(run_writer(
            store,
            events,
            rx,
            Arc::clone(&pending),
            Arc::clone(&failed),
        ));
        Self {
            tx,
            pending,
            failed,
            handle: Mutex::new(Some(handle)),
            backend,
        }
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// Queue one message for storage. Never blocks.
    pub fn enqueue(&self, session_id: &str, role: Role, content: impl Into<String>) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        let job = Job::Write {
            session_id: session_id.to_string(),
            role,
            content: content.into(),
        };
        if self.tx.send(job).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            warn!(session_id = %session_id, "Persistence writer is closed, message not stored");
        }
    }

    /// Writes queued but not yet finished.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Total failed writes since start.
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Wait until every write queued so far has completed.
    pub async fn drain(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Job::Drain(done_tx)).is_err() {
            return;
        }
        let _ = done_rx.await;
    }

    /// Drain, then stop the writer task. Later enqueues are dropped with a
    /// warning.
    pub async fn close(&self) {
        self.drain().await;
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
            debug!(backend = %self.backend, "Persistence writer stopped");
        }
    }
}

async fn run_writer(
    store: Arc<dyn MessageStore>,
    events: Arc<EventBus>,
    mut rx: mpsc::UnboundedReceiver<Job>,
    pending: Arc<AtomicUsize>,
    failed: Arc<AtomicUsize>,
) {
    let mut consecutive = 0usize;
    while let Some(job) = rx.recv().await {
        match job {
            Job::Drain(done) => {
                let _ = done.send(());
            }
            Job::Write {
                session_id,
                role,
                content,
            } => {
                match store.store_message(&session_id, role, &content).await {
                    Ok(id) => {
                        consecutive = 0;
                        debug!(session_id = %session_id, %role, id, "Message stored");
                    }
                    Err(e) => {
                        consecutive += 1;
                        failed.fetch_add(1, Ordering::SeqCst);
                        if consecutive >= FAILURE_ESCALATION {
                            error!(
                                session_id = %session_id,
                                backend = store.name(),
                                consecutive,
                                error = %e,
                                "Message persistence keeps failing"
                            );
                        } else {
                            warn!(session_id = %session_id, error = %e, "Failed to store message");
                        }
                        events.publish(DomainEvent::PersistenceFailed {
                            session_id,
                            error_message: e.to_string(),
                            timestamp: chrono::Utc::now(),
                        });
                    }
                }
                pending.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use clawloop_core::error::StorageError;
    use clawloop_core::storage::StoredMessage;
    use clawloop_memory::InMemoryStore;

    struct FailingStore;

    #[async_trait]
    impl MessageStore for FailingStore {
        fn name(&self) -> &str {
            "failing"
        }

        async fn store_message(&self, _: &str, _: Role, _: &str) -> Result<i64, StorageError> {
            Err(StorageError::Connection("database is locked".into()))
        }

        async fn get_messages(&self, _: &str, _: usize) -> Result<Vec<StoredMessage>, StorageError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn writes_land_in_order_after_drain() {
        let store = Arc::new(InMemoryStore::new());
        let writer = PersistenceWriter::spawn(store.clone(), Arc::new(EventBus::default()));

        writer.enqueue("cli:1", Role::User, "first");
        writer.enqueue("cli:1", Role::Assistant, "second");
        writer.enqueue("cli:1", Role::Tool, "third");
        writer.drain().await;

        assert_eq!(writer.pending(), 0);
        let stored = store.get_messages("cli:1", 10).await.unwrap();
        let contents: Vec<_> = stored.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["first", "second", "third"]);
        assert_eq!(stored[2].role, Role::Tool);
    }

    #[tokio::test]
    async fn failures_are_published_not_raised() {
        let events = Arc::new(EventBus::default());
        let mut rx = events.subscribe();
        let writer = PersistenceWriter::spawn(Arc::new(FailingStore), events);

        for i in 0..6 {
            writer.enqueue("cli:1", Role::User, format!("m{i}"));
        }
        writer.drain().await;

        assert_eq!(writer.failed(), 6);
        let event = rx.recv().await.unwrap();
        assert!(matches!(
            event.as_ref(),
            DomainEvent::PersistenceFailed { error_message, .. } if error_message.contains("locked")
        ));
    }

    #[tokio::test]
    async fn close_drains_then_drops_later_writes() {
        let store = Arc::new(InMemoryStore::new());
        let writer = PersistenceWriter::spawn(store.clone(), Arc::new(EventBus::default()));
        writer.enqueue("s", Role::User, "kept");
        writer.close().await;
        writer.enqueue("s", Role::User, "dropped");
        writer.drain().await;

        assert_eq!(store.len().await, 1);
        assert_eq!(writer.pending(), 0);
    }
}
