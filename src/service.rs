//! Session control surface
//!
//! `RelayService` is the composition root external callers use: it ties the
//! session store to the relay supervisor so that a relay exists exactly
//! while its session is non-closed. Transport adapters feed validated
//! payloads in through `enqueue_*` and receive forwarded messages through
//! registered listeners; the dashboard side drives the lifecycle through
//! `create_session` / `stop_session` / the timeout sweep.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{RelayError, Result};
use crate::events::{EventSink, LogSink, RelayEvent};
use crate::relay::{
    ForwardedMessage, ListenerId, MediaOutcome, RelayConfig, RelayStats, RelaySupervisor,
};
use crate::session::{Session, SessionId, SessionOptions, SessionStore};

/// Remote-control session relay service
pub struct RelayService {
    store: SessionStore,
    supervisor: Arc<RelaySupervisor>,
    config: RelayConfig,
    sink: Arc<dyn EventSink>,
}

impl RelayService {
    /// Create a service logging events through `tracing`
    pub fn new(config: RelayConfig) -> Self {
        Self::with_sink(config, Arc::new(LogSink))
    }

    /// Create a service with a custom observability sink
    pub fn with_sink(config: RelayConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            store: SessionStore::new(config.session_timeout, Arc::clone(&sink)),
            supervisor: Arc::new(RelaySupervisor::new(config.clone(), Arc::clone(&sink))),
            config,
            sink,
        }
    }

    /// Create a session for a device and start its relay
    ///
    /// Any existing non-closed session for the device is force-closed first
    /// and its relay torn down, so a device has at most one live relay.
    pub async fn create_session(
        &self,
        device_id: &str,
        user_id: &str,
        opts: SessionOptions,
    ) -> Result<Session> {
        let (session, superseded) = self.store.create_session(device_id, user_id, opts).await;

        if let Some(old_id) = superseded {
            self.supervisor.stop(old_id).await;
        }

        if let Err(err) = self.supervisor.start(session.id).await {
            self.sink.emit(RelayEvent::RelayStartFailed {
                session_id: session.id,
                reason: err.to_string(),
            });
            let _ = self.store.transition_to_closed(session.id).await;
            return Err(RelayError::RelayStartFailed(err.to_string()));
        }

        self.emit_active_count().await;
        Ok(session)
    }

    /// Close a session and tear down its relay (idempotent)
    pub async fn stop_session(&self, id: SessionId) -> Result<Session> {
        let session = self.store.transition_to_closed(id).await?;
        self.supervisor.stop(id).await;
        self.emit_active_count().await;
        Ok(session)
    }

    /// The non-closed session for a device, if one exists
    pub async fn get_device_rc_status(&self, device_id: &str) -> Option<Session> {
        self.store.device_session(device_id).await
    }

    /// Get a session record, closed ones included
    pub async fn get_session(&self, id: SessionId) -> Option<Session> {
        self.store.get(id).await
    }

    /// Move a session to `Starting`; ensures its relay is up
    pub async fn transition_to_starting(&self, id: SessionId) -> Result<Session> {
        let session = self.store.transition_to_starting(id).await?;
        self.supervisor.start(id).await?;
        Ok(session)
    }

    /// Move a session to `Streaming`
    pub async fn transition_to_streaming(&self, id: SessionId) -> Result<Session> {
        self.store.transition_to_streaming(id).await
    }

    /// Move a session to `Stopping`
    pub async fn transition_to_stopping(&self, id: SessionId) -> Result<Session> {
        self.store.transition_to_stopping(id).await
    }

    /// Refresh a session's activity timestamp
    pub async fn update_activity(&self, id: SessionId) -> Result<()> {
        self.store.update_activity(id).await
    }

    /// Whether a session has been idle longer than `window`
    pub async fn check_session_timeout(&self, id: SessionId, window: Duration) -> Result<bool> {
        self.store.check_session_timeout(id, window).await
    }

    /// Close every session past its inactivity deadline
    ///
    /// Uses the same close path as an explicit stop; each reclaimed session
    /// additionally emits a warning-level timeout alert. Returns the ids
    /// that were closed.
    pub async fn check_and_close_timed_out_sessions(
        &self,
        window: Option<Duration>,
    ) -> Vec<SessionId> {
        let closed = self.store.check_and_close_timed_out_sessions(window).await;

        for &id in &closed {
            self.supervisor.stop(id).await;
        }
        if !closed.is_empty() {
            self.emit_active_count().await;
        }

        closed
    }

    /// Enqueue a control event for a session
    pub async fn enqueue_control_event(&self, id: SessionId, payload: Value) -> Result<()> {
        let result = self.supervisor.enqueue_control_event(id, payload).await;
        if result.is_ok() {
            let _ = self.store.update_activity(id).await;
        }
        result
    }

    /// Enqueue a media frame for a session
    ///
    /// `Ok(MediaOutcome::Dropped)` is a normal backpressure outcome and
    /// still counts as session activity.
    pub async fn enqueue_media_frame(&self, id: SessionId, payload: Value) -> Result<MediaOutcome> {
        let result = self.supervisor.enqueue_media_frame(id, payload).await;
        if result.is_ok() {
            let _ = self.store.update_activity(id).await;
        }
        result
    }

    /// Snapshot a session's relay statistics
    pub async fn get_stats(&self, id: SessionId) -> Result<RelayStats> {
        self.supervisor.get_stats(id).await
    }

    /// Register a transport adapter as listener on a session
    pub async fn add_listener(
        &self,
        id: SessionId,
        tx: mpsc::Sender<ForwardedMessage>,
    ) -> Result<ListenerId> {
        self.supervisor.add_listener(id, tx).await
    }

    /// Remove a previously registered listener
    pub async fn remove_listener(&self, id: SessionId, listener: ListenerId) -> Result<()> {
        self.supervisor.remove_listener(id, listener).await
    }

    /// Spawn the background timeout sweep
    ///
    /// Returns a handle that can be used to abort the task.
    pub fn spawn_sweep_task(self: &Arc<Self>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        let interval = service.config.sweep_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                service.check_and_close_timed_out_sessions(None).await;
            }
        })
    }

    async fn emit_active_count(&self) {
        self.sink.emit(RelayEvent::ActiveSessionsCount {
            count: self.store.active_count().await,
        });
    }
}
