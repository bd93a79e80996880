//! Cross-session table and timeout sweep
//!
//! The store is the only state shared across sessions: a `RwLock`-guarded
//! map of session records plus the id allocator. A device has at most one
//! non-closed session at any time; creating a new one force-closes the old
//! record first. Lifecycle events for every mutation are emitted through the
//! observability sink from inside the store so callers cannot forget them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::error::{RelayError, Result};
use crate::events::{EventSink, RelayEvent};

use super::state::{Session, SessionId, SessionState};

/// Default inactivity window before a session is reclaimed
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(300);

/// Per-call options for session creation
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Inactivity window override; `None` uses the store default
    pub timeout: Option<Duration>,
}

impl SessionOptions {
    /// Set a custom inactivity window
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// In-memory session table
pub struct SessionStore {
    /// Map of session id to record (closed records retained)
    sessions: RwLock<HashMap<SessionId, Session>>,

    /// Next session id to allocate
    next_id: AtomicU64,

    /// Default inactivity window
    default_timeout: Duration,

    /// Observability sink
    sink: Arc<dyn EventSink>,
}

impl SessionStore {
    /// Create a new store with the given default timeout and sink
    pub fn new(default_timeout: Duration, sink: Arc<dyn EventSink>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            default_timeout,
            sink,
        }
    }

    /// Create a session for a device
    ///
    /// Any existing non-closed session for the same device is forced to
    /// closed first, guaranteeing a single active relay per device. Returns
    /// the new record and the id of the superseded session, if one was
    /// closed, so the caller can tear down its relay.
    pub async fn create_session(
        &self,
        device_id: &str,
        user_id: &str,
        opts: SessionOptions,
    ) -> (Session, Option<SessionId>) {
        let mut sessions = self.sessions.write().await;

        let superseded = sessions
            .values()
            .find(|s| s.device_id == device_id && !s.is_closed())
            .map(|s| s.id);

        if let Some(old_id) = superseded {
            if let Some(old) = sessions.get_mut(&old_id) {
                // Close is legal from every state, this cannot fail
                let _ = self.apply(old, SessionState::Closed);
                tracing::info!(
                    session_id = old_id,
                    device_id = %device_id,
                    "Superseded by new session"
                );
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let timeout = opts.timeout.unwrap_or(self.default_timeout);
        let session = Session::new(id, device_id.to_owned(), user_id.to_owned(), timeout);

        self.sink.emit(RelayEvent::SessionCreated {
            session_id: id,
            device_id: device_id.to_owned(),
            user_id: user_id.to_owned(),
        });

        sessions.insert(id, session.clone());
        (session, superseded)
    }

    /// Attempt a state transition, returning the updated record
    pub async fn transition(&self, id: SessionId, to: SessionState) -> Result<Session> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&id).ok_or(RelayError::SessionNotFound)?;

        self.apply(session, to)?;
        Ok(session.clone())
    }

    /// Transition to `Starting`
    pub async fn transition_to_starting(&self, id: SessionId) -> Result<Session> {
        self.transition(id, SessionState::Starting).await
    }

    /// Transition to `Streaming`
    pub async fn transition_to_streaming(&self, id: SessionId) -> Result<Session> {
        self.transition(id, SessionState::Streaming).await
    }

    /// Transition to `Stopping`
    pub async fn transition_to_stopping(&self, id: SessionId) -> Result<Session> {
        self.transition(id, SessionState::Stopping).await
    }

    /// Transition to `Closed` (idempotent)
    pub async fn transition_to_closed(&self, id: SessionId) -> Result<Session> {
        self.transition(id, SessionState::Closed).await
    }

    /// Refresh a session's activity timestamp
    pub async fn update_activity(&self, id: SessionId) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&id).ok_or(RelayError::SessionNotFound)?;

        session.touch();
        self.sink.emit(RelayEvent::SessionActivity { session_id: id });
        Ok(())
    }

    /// Whether a session has been idle longer than `window`
    pub async fn check_session_timeout(&self, id: SessionId, window: Duration) -> Result<bool> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(&id).ok_or(RelayError::SessionNotFound)?;
        Ok(!session.is_closed() && session.idle_longer_than(window))
    }

    /// Force-close every session past its deadline
    ///
    /// `window` overrides the per-session deadline when given. Each reclaimed
    /// session emits one timeout alert in addition to the normal closed
    /// events and is excluded from future sweeps by virtue of being closed.
    /// Returns the ids that were closed.
    pub async fn check_and_close_timed_out_sessions(
        &self,
        window: Option<Duration>,
    ) -> Vec<SessionId> {
        let mut sessions = self.sessions.write().await;
        let now = Instant::now();
        let mut closed = Vec::new();

        for session in sessions.values_mut() {
            let timed_out = match window {
                Some(w) => !session.is_closed() && session.idle_longer_than(w),
                None => session.past_deadline(now),
            };
            if !timed_out {
                continue;
            }

            self.sink.emit(RelayEvent::SessionTimeout {
                session_id: session.id,
                device_id: session.device_id.clone(),
                idle_for: now - session.last_activity_at,
            });

            // Same close path as an explicit stop
            let _ = self.apply(session, SessionState::Closed);
            closed.push(session.id);
        }

        closed
    }

    /// Get a session record by id
    pub async fn get(&self, id: SessionId) -> Option<Session> {
        self.sessions.read().await.get(&id).cloned()
    }

    /// Get the non-closed session for a device, if any
    pub async fn device_session(&self, device_id: &str) -> Option<Session> {
        self.sessions
            .read()
            .await
            .values()
            .find(|s| s.device_id == device_id && !s.is_closed())
            .cloned()
    }

    /// Number of non-closed sessions
    pub async fn active_count(&self) -> usize {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| !s.is_closed())
            .count()
    }

    /// Apply a transition to a locked record, emitting lifecycle events
    ///
    /// Re-closing an already closed record succeeds but emits nothing; only
    /// the stop timestamp advances.
    fn apply(
        &self,
        session: &mut Session,
        to: SessionState,
    ) -> std::result::Result<(), RelayError> {
        let already_closed = session.is_closed();
        let from = session.transition(to)?;

        if already_closed {
            return Ok(());
        }

        self.sink.emit(RelayEvent::StateTransition {
            session_id: session.id,
            device_id: session.device_id.clone(),
            from,
            to,
        });

        if to == SessionState::Closed {
            self.sink.emit(RelayEvent::SessionClosed {
                session_id: session.id,
                device_id: session.device_id.clone(),
                duration: session.duration(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::testing::CollectingSink;

    fn store_with_sink() -> (SessionStore, Arc<CollectingSink>) {
        let sink = Arc::new(CollectingSink::default());
        let store = SessionStore::new(DEFAULT_SESSION_TIMEOUT, sink.clone());
        (store, sink)
    }

    #[tokio::test]
    async fn test_create_session_defaults() {
        let (store, _sink) = store_with_sink();
        let (session, superseded) = store
            .create_session("device-1", "user-1", SessionOptions::default())
            .await;

        assert_eq!(session.state, SessionState::Created);
        assert_eq!(session.timeout, DEFAULT_SESSION_TIMEOUT);
        assert!(superseded.is_none());
        assert_eq!(store.active_count().await, 1);
    }

    #[tokio::test]
    async fn test_single_active_session_per_device() {
        let (store, _sink) = store_with_sink();
        let (first, _) = store
            .create_session("device-1", "user-1", SessionOptions::default())
            .await;
        let (second, superseded) = store
            .create_session("device-1", "user-2", SessionOptions::default())
            .await;

        assert_eq!(superseded, Some(first.id));
        assert_eq!(
            store.get(first.id).await.unwrap().state,
            SessionState::Closed
        );
        assert_eq!(store.active_count().await, 1);
        assert_eq!(store.device_session("device-1").await.unwrap().id, second.id);
    }

    #[tokio::test]
    async fn test_sessions_on_different_devices_coexist() {
        let (store, _sink) = store_with_sink();
        store
            .create_session("device-1", "user-1", SessionOptions::default())
            .await;
        let (_, superseded) = store
            .create_session("device-2", "user-1", SessionOptions::default())
            .await;

        assert!(superseded.is_none());
        assert_eq!(store.active_count().await, 2);
    }

    #[tokio::test]
    async fn test_transition_emits_events() {
        let (store, sink) = store_with_sink();
        let (session, _) = store
            .create_session("device-1", "user-1", SessionOptions::default())
            .await;
        sink.take();

        store.transition_to_starting(session.id).await.unwrap();

        let events = sink.take();
        assert!(matches!(
            events.as_slice(),
            [RelayEvent::StateTransition {
                from: SessionState::Created,
                to: SessionState::Starting,
                ..
            }]
        ));
    }

    #[tokio::test]
    async fn test_illegal_transition_via_store() {
        let (store, _sink) = store_with_sink();
        let (session, _) = store
            .create_session("device-1", "user-1", SessionOptions::default())
            .await;

        let err = store.transition_to_streaming(session.id).await.unwrap_err();
        assert!(matches!(err, RelayError::IllegalTransition { .. }));
        assert_eq!(
            store.get(session.id).await.unwrap().state,
            SessionState::Created
        );
    }

    #[tokio::test]
    async fn test_transition_unknown_session() {
        let (store, _sink) = store_with_sink();
        let err = store.transition_to_closed(999).await.unwrap_err();
        assert_eq!(err, RelayError::SessionNotFound);
    }

    #[tokio::test]
    async fn test_idempotent_close() {
        let (store, sink) = store_with_sink();
        let (session, _) = store
            .create_session("device-1", "user-1", SessionOptions::default())
            .await;

        let first = store.transition_to_closed(session.id).await.unwrap();
        let second = store.transition_to_closed(session.id).await.unwrap();

        assert_eq!(first.state, SessionState::Closed);
        assert_eq!(second.state, SessionState::Closed);
        assert!(second.stopped_at.unwrap() >= first.stopped_at.unwrap());

        // Only one closed event for the pair of calls
        let closed_events = sink
            .take()
            .into_iter()
            .filter(|e| matches!(e, RelayEvent::SessionClosed { .. }))
            .count();
        assert_eq!(closed_events, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_sweep() {
        let (store, sink) = store_with_sink();
        let (session, _) = store
            .create_session(
                "device-1",
                "user-1",
                SessionOptions::default().timeout(Duration::from_secs(1)),
            )
            .await;
        sink.take();

        // Not yet past deadline
        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(store
            .check_and_close_timed_out_sessions(None)
            .await
            .is_empty());

        tokio::time::advance(Duration::from_millis(600)).await;
        let closed = store.check_and_close_timed_out_sessions(None).await;
        assert_eq!(closed, vec![session.id]);
        assert_eq!(
            store.get(session.id).await.unwrap().state,
            SessionState::Closed
        );

        // Exactly one timeout alert and one closed event
        let events = sink.take();
        let timeouts = events
            .iter()
            .filter(|e| matches!(e, RelayEvent::SessionTimeout { .. }))
            .count();
        let closes = events
            .iter()
            .filter(|e| matches!(e, RelayEvent::SessionClosed { .. }))
            .count();
        assert_eq!(timeouts, 1);
        assert_eq!(closes, 1);

        // Closed sessions are excluded from future sweeps
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(store
            .check_and_close_timed_out_sessions(None)
            .await
            .is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_defers_timeout() {
        let (store, _sink) = store_with_sink();
        let (session, _) = store
            .create_session(
                "device-1",
                "user-1",
                SessionOptions::default().timeout(Duration::from_secs(1)),
            )
            .await;

        tokio::time::advance(Duration::from_millis(800)).await;
        store.update_activity(session.id).await.unwrap();

        tokio::time::advance(Duration::from_millis(800)).await;
        assert!(store
            .check_and_close_timed_out_sessions(None)
            .await
            .is_empty());

        tokio::time::advance(Duration::from_millis(300)).await;
        assert_eq!(
            store.check_and_close_timed_out_sessions(None).await,
            vec![session.id]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_session_timeout_window() {
        let (store, _sink) = store_with_sink();
        let (session, _) = store
            .create_session("device-1", "user-1", SessionOptions::default())
            .await;

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store
            .check_session_timeout(session.id, Duration::from_secs(1))
            .await
            .unwrap());
        assert!(!store
            .check_session_timeout(session.id, Duration::from_secs(10))
            .await
            .unwrap());
    }
}
