//! Session record and state machine
//!
//! Tracks one remote-control session from creation to its terminal closed
//! state. Transitions outside the allowed graph are rejected without
//! mutating the record.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::error::RelayError;

/// Unique session identifier
pub type SessionId = u64;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Record inserted, relay not yet negotiated
    Created,
    /// Peers are connecting
    Starting,
    /// Frames and control events are flowing
    Streaming,
    /// Orderly shutdown in progress
    Stopping,
    /// Terminal state; the record is retained but the relay is gone
    Closed,
}

impl SessionState {
    /// Whether a transition to `to` is legal from this state
    ///
    /// The graph is linear (created -> starting -> streaming -> stopping ->
    /// closed) and closed is additionally reachable from any state. Repeated
    /// closes are legal so that forced termination stays idempotent.
    pub fn can_transition(self, to: SessionState) -> bool {
        use SessionState::*;

        if to == Closed {
            return true;
        }

        matches!(
            (self, to),
            (Created, Starting) | (Starting, Streaming) | (Streaming, Stopping)
        )
    }
}

/// Complete session record
#[derive(Debug, Clone)]
pub struct Session {
    /// Unique session ID
    pub id: SessionId,

    /// Device this session controls
    pub device_id: String,

    /// User driving the session
    pub user_id: String,

    /// Current lifecycle state
    pub state: SessionState,

    /// When the record was created
    pub created_at: Instant,

    /// When streaming began
    pub started_at: Option<Instant>,

    /// Last observed activity on either peer
    pub last_activity_at: Instant,

    /// Inactivity window before the sweep reclaims the session
    pub timeout: Duration,

    /// Deadline derived from `last_activity_at + timeout`
    pub timeout_at: Instant,

    /// When the session reached closed
    pub stopped_at: Option<Instant>,
}

impl Session {
    /// Create a new session record in the `Created` state
    pub fn new(id: SessionId, device_id: String, user_id: String, timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            id,
            device_id,
            user_id,
            state: SessionState::Created,
            created_at: now,
            started_at: None,
            last_activity_at: now,
            timeout,
            timeout_at: now + timeout,
            stopped_at: None,
        }
    }

    /// Attempt a state transition
    ///
    /// On success refreshes the activity deadline and stamps `started_at` /
    /// `stopped_at` where applicable, returning the previous state. Illegal
    /// moves leave the record untouched.
    pub fn transition(&mut self, to: SessionState) -> Result<SessionState, RelayError> {
        if !self.state.can_transition(to) {
            return Err(RelayError::IllegalTransition {
                from: self.state,
                to,
            });
        }

        let from = self.state;
        let now = Instant::now();

        self.state = to;
        self.last_activity_at = now;
        self.timeout_at = now + self.timeout;

        match to {
            SessionState::Streaming if self.started_at.is_none() => {
                self.started_at = Some(now);
            }
            // Repeated closes only advance the timestamp
            SessionState::Closed => {
                self.stopped_at = Some(now);
            }
            _ => {}
        }

        Ok(from)
    }

    /// Refresh the activity timestamp and push the timeout deadline forward
    pub fn touch(&mut self) {
        let now = Instant::now();
        self.last_activity_at = now;
        self.timeout_at = now + self.timeout;
    }

    /// Whether the session is in its terminal state
    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Whether the given inactivity window has elapsed
    pub fn idle_longer_than(&self, window: Duration) -> bool {
        Instant::now() >= self.last_activity_at + window
    }

    /// Whether the stored deadline has passed
    pub fn past_deadline(&self, now: Instant) -> bool {
        !self.is_closed() && now >= self.timeout_at
    }

    /// Time since creation, capped at close
    pub fn duration(&self) -> Duration {
        match self.stopped_at {
            Some(stopped) => stopped - self.created_at,
            None => self.created_at.elapsed(),
        }
    }
}
