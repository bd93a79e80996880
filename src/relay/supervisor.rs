//! Relay supervisor and registry
//!
//! Starts one relay worker per session, records the session id to worker
//! mapping, and restarts a replacement worker with empty queues and zeroed
//! stats when one panics. A crash is invisible to other sessions; callers of
//! the crashed session see at most a brief `SessionNotFound` gap while the
//! replacement spins up. Stopping a session removes the registry entry, so
//! later calls against that id terminate with `SessionNotFound`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;

use crate::error::{RelayError, Result};
use crate::events::EventSink;
use crate::session::SessionId;

use super::config::RelayConfig;
use super::engine::{Command, MediaOutcome, RelayEngine};
use super::message::{ForwardedMessage, ListenerHandle, ListenerId};
use super::stats::RelayStats;

/// Registry slot for one session's worker
///
/// The sender is behind its own lock so the crash watcher can swap in a
/// replacement worker without touching the registry map.
struct RelayCell {
    tx: RwLock<mpsc::Sender<Command>>,
}

/// Supervisor owning every live relay worker
pub struct RelaySupervisor {
    /// Map of session id to worker slot
    relays: RwLock<HashMap<SessionId, Arc<RelayCell>>>,

    /// Configuration shared by all workers
    config: RelayConfig,

    /// Observability sink handed to each worker
    sink: Arc<dyn EventSink>,

    /// Next listener id to allocate
    next_listener_id: AtomicU64,
}

impl RelaySupervisor {
    /// Create a supervisor with the given configuration and sink
    pub fn new(config: RelayConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            relays: RwLock::new(HashMap::new()),
            config,
            sink,
            next_listener_id: AtomicU64::new(1),
        }
    }

    /// Start a relay worker for a session
    ///
    /// Idempotent: a second start against a live session is a no-op.
    pub async fn start(self: &Arc<Self>, session_id: SessionId) -> Result<()> {
        let mut relays = self.relays.write().await;
        if relays.contains_key(&session_id) {
            return Ok(());
        }

        let (tx, join) = self.spawn_worker(session_id);
        let cell = Arc::new(RelayCell {
            tx: RwLock::new(tx),
        });
        relays.insert(session_id, Arc::clone(&cell));
        drop(relays);

        self.watch(session_id, cell, join);
        tracing::debug!(session_id, "Relay started");
        Ok(())
    }

    /// Stop and deregister a session's relay (idempotent)
    pub async fn stop(&self, session_id: SessionId) {
        let cell = self.relays.write().await.remove(&session_id);

        if let Some(cell) = cell {
            let tx = cell.tx.read().await.clone();
            // Worker may already be gone after a crash; either way the
            // registry entry is removed
            let _ = tx.send(Command::Stop).await;
            tracing::debug!(session_id, "Relay stopped");
        }
    }

    /// Enqueue a control event on a session's relay
    pub async fn enqueue_control_event(
        &self,
        session_id: SessionId,
        payload: Value,
    ) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(session_id, Command::EnqueueControl {
            payload,
            reply: reply_tx,
        })
        .await?;
        reply_rx.await.map_err(|_| RelayError::SessionNotFound)?
    }

    /// Enqueue a media frame on a session's relay
    pub async fn enqueue_media_frame(
        &self,
        session_id: SessionId,
        payload: Value,
    ) -> Result<MediaOutcome> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(session_id, Command::EnqueueMedia {
            payload,
            reply: reply_tx,
        })
        .await?;
        reply_rx.await.map_err(|_| RelayError::SessionNotFound)?
    }

    /// Snapshot a session's relay statistics
    pub async fn get_stats(&self, session_id: SessionId) -> Result<RelayStats> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(session_id, Command::GetStats { reply: reply_tx })
            .await?;
        reply_rx.await.map_err(|_| RelayError::SessionNotFound)
    }

    /// Register a listener (transport adapter) on a session's relay
    ///
    /// Returns the allocated listener id for later removal.
    pub async fn add_listener(
        &self,
        session_id: SessionId,
        tx: mpsc::Sender<ForwardedMessage>,
    ) -> Result<ListenerId> {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.send(session_id, Command::AddListener {
            listener: ListenerHandle::new(id, tx),
        })
        .await?;
        Ok(id)
    }

    /// Remove a previously registered listener
    pub async fn remove_listener(&self, session_id: SessionId, id: ListenerId) -> Result<()> {
        self.send(session_id, Command::RemoveListener { id }).await
    }

    /// Number of live relay workers
    pub async fn relay_count(&self) -> usize {
        self.relays.read().await.len()
    }

    #[cfg(test)]
    pub(crate) async fn inject_crash(&self, session_id: SessionId) -> Result<()> {
        self.send(session_id, Command::Crash).await
    }

    /// Send a command to a session's worker
    ///
    /// A missing registry entry, or a send racing teardown/crash, maps to
    /// `SessionNotFound`; it never panics the caller.
    async fn send(&self, session_id: SessionId, command: Command) -> Result<()> {
        let cell = self
            .relays
            .read()
            .await
            .get(&session_id)
            .cloned()
            .ok_or(RelayError::SessionNotFound)?;

        let tx = cell.tx.read().await.clone();
        tx.send(command)
            .await
            .map_err(|_| RelayError::SessionNotFound)
    }

    /// Spawn a fresh worker task for a session
    fn spawn_worker(&self, session_id: SessionId) -> (mpsc::Sender<Command>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(self.config.mailbox_capacity);
        let engine = RelayEngine::new(session_id, self.config.clone(), Arc::clone(&self.sink));
        let join = tokio::spawn(engine.run(rx));
        (tx, join)
    }

    /// Watch a worker and restart it on panic
    ///
    /// The replacement starts with empty queues and zeroed stats. If the
    /// session was deregistered (or superseded by a newer cell) in the
    /// meantime, no restart happens.
    fn watch(self: &Arc<Self>, session_id: SessionId, cell: Arc<RelayCell>, join: JoinHandle<()>) {
        let supervisor = Arc::clone(self);

        tokio::spawn(async move {
            let mut join = join;
            loop {
                match join.await {
                    // Orderly stop
                    Ok(()) => break,
                    Err(err) if err.is_panic() => {
                        let registered = supervisor
                            .relays
                            .read()
                            .await
                            .get(&session_id)
                            .map(|current| Arc::ptr_eq(current, &cell))
                            .unwrap_or(false);
                        if !registered {
                            break;
                        }

                        tracing::warn!(
                            session_id,
                            "Relay worker panicked, restarting with fresh state"
                        );
                        let (tx, next_join) = supervisor.spawn_worker(session_id);
                        *cell.tx.write().await = tx.clone();

                        // A stop may have raced the restart; if the entry is
                        // gone, shut the replacement down again
                        let deregistered = !supervisor
                            .relays
                            .read()
                            .await
                            .contains_key(&session_id);
                        if deregistered {
                            let _ = tx.send(Command::Stop).await;
                            break;
                        }
                        join = next_join;
                    }
                    // Cancelled at shutdown
                    Err(_) => break,
                }
            }
        });
    }
}
