//! Relay error types
//!
//! Error types shared across the session state machine, relay engine and
//! supervisor. Validation and capacity failures return synchronously to the
//! caller; nothing in this crate retries automatically.

use crate::session::SessionState;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, RelayError>;

/// Error type for relay and session operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// Payload failed validation; the message names the offending field
    InvalidMessage(String),
    /// Control queue is at capacity; the caller decides retry/drop
    ControlQueueFull,
    /// No live relay for this session id (closed, never created, or raced
    /// with teardown)
    SessionNotFound,
    /// Device has no session
    DeviceNotFound,
    /// State machine move outside the allowed graph
    IllegalTransition {
        from: SessionState,
        to: SessionState,
    },
    /// Supervisor could not start a relay worker
    RelayStartFailed(String),
}

impl std::fmt::Display for RelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayError::InvalidMessage(reason) => write!(f, "Invalid message: {}", reason),
            RelayError::ControlQueueFull => write!(f, "Control queue full"),
            RelayError::SessionNotFound => write!(f, "Session not found"),
            RelayError::DeviceNotFound => write!(f, "Device not found"),
            RelayError::IllegalTransition { from, to } => {
                write!(f, "Illegal transition: {:?} -> {:?}", from, to)
            }
            RelayError::RelayStartFailed(reason) => {
                write!(f, "Relay start failed: {}", reason)
            }
        }
    }
}

impl std::error::Error for RelayError {}
