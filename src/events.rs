//! Observability events
//!
//! The relay core emits correlated lifecycle/activity/drop/timeout events to
//! an external sink. The sink owns storage and alerting; this crate's only
//! obligation is to emit consistently. Every event carries the session id
//! (and device id where one exists) so the sink can correlate.

use std::time::Duration;

use crate::session::{SessionId, SessionState};

/// Which queue a dropped frame belonged to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropKind {
    /// Control event rejected because the control queue was full
    Control,
    /// Predictive media frame shed under backpressure
    PFrame,
}

/// Events emitted to the observability sink
#[derive(Debug, Clone)]
pub enum RelayEvent {
    /// A new session record was inserted
    SessionCreated {
        session_id: SessionId,
        device_id: String,
        user_id: String,
    },
    /// A successful state machine transition
    StateTransition {
        session_id: SessionId,
        device_id: String,
        from: SessionState,
        to: SessionState,
    },
    /// Session reached the closed state
    SessionClosed {
        session_id: SessionId,
        device_id: String,
        duration: Duration,
    },
    /// Session was reclaimed by the timeout sweep (warning severity)
    SessionTimeout {
        session_id: SessionId,
        device_id: String,
        idle_for: Duration,
    },
    /// A control event was accepted and forwarded
    ControlEventSent {
        session_id: SessionId,
        latency: Duration,
    },
    /// A media frame was accepted
    MediaFrameReceived {
        session_id: SessionId,
        bytes: usize,
        keyframe: bool,
    },
    /// Frames were dropped under backpressure
    FramesDropped {
        session_id: SessionId,
        kind: DropKind,
        count: u64,
    },
    /// Session activity timestamp was refreshed
    SessionActivity { session_id: SessionId },
    /// Gauge of currently active (non-closed) sessions
    ActiveSessionsCount { count: usize },
    /// Supervisor failed to start a relay worker
    RelayStartFailed {
        session_id: SessionId,
        reason: String,
    },
    /// Control queue hit capacity
    ControlQueueFull { session_id: SessionId },
}

/// Sink for relay observability events
///
/// Implementations must be cheap and non-blocking; the relay emits from its
/// processing loop and never waits on the sink.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: RelayEvent);
}

/// Default sink that writes structured `tracing` records
///
/// Timeout and start-failure events log at warn level, high-rate media and
/// activity events at debug, everything else at info.
#[derive(Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: RelayEvent) {
        match event {
            RelayEvent::SessionCreated {
                session_id,
                ref device_id,
                ref user_id,
            } => {
                tracing::info!(
                    session_id,
                    device_id = %device_id,
                    user_id = %user_id,
                    "Session created"
                );
            }
            RelayEvent::StateTransition {
                session_id,
                ref device_id,
                from,
                to,
            } => {
                tracing::info!(
                    session_id,
                    device_id = %device_id,
                    from = ?from,
                    to = ?to,
                    "Session state transition"
                );
            }
            RelayEvent::SessionClosed {
                session_id,
                ref device_id,
                duration,
            } => {
                tracing::info!(
                    session_id,
                    device_id = %device_id,
                    duration_ms = duration.as_millis() as u64,
                    "Session closed"
                );
            }
            RelayEvent::SessionTimeout {
                session_id,
                ref device_id,
                idle_for,
            } => {
                tracing::warn!(
                    session_id,
                    device_id = %device_id,
                    idle_ms = idle_for.as_millis() as u64,
                    "Session timed out"
                );
            }
            RelayEvent::ControlEventSent {
                session_id,
                latency,
            } => {
                tracing::debug!(
                    session_id,
                    latency_us = latency.as_micros() as u64,
                    "Control event forwarded"
                );
            }
            RelayEvent::MediaFrameReceived {
                session_id,
                bytes,
                keyframe,
            } => {
                tracing::debug!(session_id, bytes, keyframe, "Media frame received");
            }
            RelayEvent::FramesDropped {
                session_id,
                kind,
                count,
            } => {
                tracing::debug!(session_id, kind = ?kind, count, "Frames dropped");
            }
            RelayEvent::SessionActivity { session_id } => {
                tracing::debug!(session_id, "Session activity");
            }
            RelayEvent::ActiveSessionsCount { count } => {
                tracing::debug!(count, "Active sessions");
            }
            RelayEvent::RelayStartFailed {
                session_id,
                ref reason,
            } => {
                tracing::warn!(session_id, reason = %reason, "Relay start failed");
            }
            RelayEvent::ControlQueueFull { session_id } => {
                tracing::debug!(session_id, "Control queue full");
            }
        }
    }
}
