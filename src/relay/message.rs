//! Forwarded messages and listener handles
//!
//! A relay pushes accepted messages to the listener handles registered for
//! its session (the device-side and viewer-side transport adapters). The
//! payload rides behind an `Arc` so fan-out to both listeners shares one
//! allocation.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Which channel a message travels on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    ControlEvent,
    MediaFrame,
}

impl MessageKind {
    /// Wire-level event name
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::ControlEvent => "control_event",
            MessageKind::MediaFrame => "media_frame",
        }
    }
}

/// A message pushed to a session's listeners
#[derive(Debug, Clone)]
pub struct ForwardedMessage {
    /// Wire event tag (`control_event` or `media_frame`)
    pub event: MessageKind,
    /// The validated payload, unmodified
    pub payload: Arc<Value>,
    /// Origin marker for the receiving adapter
    pub source: &'static str,
}

impl ForwardedMessage {
    pub fn new(event: MessageKind, payload: Arc<Value>) -> Self {
        Self {
            event,
            payload,
            source: "relay",
        }
    }
}

/// A message held in a relay queue until it can be forwarded
#[derive(Debug, Clone)]
pub(crate) struct QueuedMessage {
    pub kind: MessageKind,
    pub payload: Arc<Value>,
    pub enqueued_at: Instant,
}

impl QueuedMessage {
    pub fn new(kind: MessageKind, payload: Value) -> Self {
        Self {
            kind,
            payload: Arc::new(payload),
            enqueued_at: Instant::now(),
        }
    }

    pub fn to_forwarded(&self) -> ForwardedMessage {
        ForwardedMessage::new(self.kind, Arc::clone(&self.payload))
    }
}

/// Identifier of a registered listener
pub type ListenerId = u64;

/// Outcome of a fire-and-forget delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeliveryOutcome {
    /// Listener accepted the message
    Delivered,
    /// Listener mailbox is full; the message stays queued
    Lagging,
    /// Listener went away and should be pruned
    Gone,
}

/// Handle to one registered listener (a transport adapter)
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    /// Listener id, allocated at registration
    pub id: ListenerId,
    /// Bounded channel into the adapter
    tx: mpsc::Sender<ForwardedMessage>,
}

impl ListenerHandle {
    pub fn new(id: ListenerId, tx: mpsc::Sender<ForwardedMessage>) -> Self {
        Self { id, tx }
    }

    /// Push a message without waiting
    pub(crate) fn try_forward(&self, message: ForwardedMessage) -> DeliveryOutcome {
        match self.tx.try_send(message) {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => DeliveryOutcome::Lagging,
            Err(mpsc::error::TrySendError::Closed(_)) => DeliveryOutcome::Gone,
        }
    }
}
