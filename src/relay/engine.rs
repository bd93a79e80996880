//! Per-session relay engine
//!
//! One engine runs per active session as a tokio task owning two bounded
//! FIFO queues (control, media), the session's stats and its listener set.
//! All mutations happen inside the task's sequential command loop, so no
//! locking exists within a session's boundary.
//!
//! Backpressure policy: a full control queue rejects the enqueue (the caller
//! decides retry/drop). A full media queue sheds the incoming P-frame as a
//! success-shaped outcome, keeping memory bounded and latency low. IDR
//! frames bypass the capacity check entirely because dropping one stalls the
//! viewer until the next keyframe; the bypass never changes queue position,
//! so forwarded messages stay FIFO by enqueue time.
//!
//! Forwarding is fire-and-forget: each accepted message is pushed to every
//! registered listener via `try_send`. A message is popped (and counted as
//! forwarded) once at least one listener accepted it; with no listener
//! attached, or all listener mailboxes full, it is retained up to capacity
//! and flushed in order when a listener attaches or the backlog clears. A
//! listener whose channel closed is pruned; a lagging listener misses
//! messages that other listeners consumed.

use std::collections::VecDeque;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::error::{RelayError, Result};
use crate::events::{DropKind, EventSink, RelayEvent};
use crate::session::SessionId;
use crate::validate::{self, MediaFrame};

use super::config::RelayConfig;
use super::message::{
    DeliveryOutcome, ListenerHandle, ListenerId, MessageKind, QueuedMessage,
};
use super::stats::RelayStats;

/// Outcome of a media enqueue
///
/// `Dropped` is a normal outcome under backpressure, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaOutcome {
    /// Frame accepted into the queue (and forwarded as listeners allow)
    Accepted,
    /// P-frame shed because the media queue was at capacity
    Dropped,
}

/// Commands processed by a relay worker
pub(crate) enum Command {
    EnqueueControl {
        payload: Value,
        reply: oneshot::Sender<Result<()>>,
    },
    EnqueueMedia {
        payload: Value,
        reply: oneshot::Sender<Result<MediaOutcome>>,
    },
    GetStats {
        reply: oneshot::Sender<RelayStats>,
    },
    AddListener {
        listener: ListenerHandle,
    },
    RemoveListener {
        id: ListenerId,
    },
    Stop,
    #[cfg(test)]
    Crash,
}

/// Relay engine state, owned by one worker task
pub(crate) struct RelayEngine {
    session_id: SessionId,
    config: RelayConfig,
    control_queue: VecDeque<QueuedMessage>,
    media_queue: VecDeque<QueuedMessage>,
    listeners: Vec<ListenerHandle>,
    stats: RelayStats,
    sink: Arc<dyn EventSink>,
}

impl RelayEngine {
    pub fn new(session_id: SessionId, config: RelayConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            session_id,
            config,
            control_queue: VecDeque::new(),
            media_queue: VecDeque::new(),
            listeners: Vec::new(),
            stats: RelayStats::new(),
            sink,
        }
    }

    /// Drive the command loop until `Stop` or mailbox closure
    pub async fn run(mut self, mut mailbox: mpsc::Receiver<Command>) {
        tracing::debug!(session_id = self.session_id, "Relay worker started");

        while let Some(command) = mailbox.recv().await {
            match command {
                Command::EnqueueControl { payload, reply } => {
                    let _ = reply.send(self.enqueue_control(payload));
                }
                Command::EnqueueMedia { payload, reply } => {
                    let _ = reply.send(self.enqueue_media(payload));
                }
                Command::GetStats { reply } => {
                    let _ = reply.send(self.stats_snapshot());
                }
                Command::AddListener { listener } => {
                    self.add_listener(listener);
                }
                Command::RemoveListener { id } => {
                    self.remove_listener(id);
                }
                Command::Stop => break,
                #[cfg(test)]
                Command::Crash => panic!("injected worker crash"),
            }
        }

        tracing::debug!(
            session_id = self.session_id,
            stats = ?self.stats,
            "Relay worker stopped"
        );
    }

    /// Validate and enqueue a control event
    pub fn enqueue_control(&mut self, payload: Value) -> Result<()> {
        if let Err(err) = validate::validate_control_event(&payload) {
            // Rejected before any queue mutation, counters untouched
            return Err(err.into());
        }

        if self.control_queue.len() >= self.config.control_queue_max {
            self.stats.control_dropped += 1;
            self.sink.emit(RelayEvent::ControlQueueFull {
                session_id: self.session_id,
            });
            return Err(RelayError::ControlQueueFull);
        }

        self.control_queue
            .push_back(QueuedMessage::new(MessageKind::ControlEvent, payload));
        self.stats.control_enqueued += 1;
        self.flush_control();
        self.sync_queue_sizes();
        Ok(())
    }

    /// Validate and enqueue a media frame
    pub fn enqueue_media(&mut self, payload: Value) -> Result<MediaOutcome> {
        let frame = MediaFrame::from_value(&payload)?;
        let keyframe = frame.frame_type.is_keyframe();

        if !keyframe && self.media_queue.len() >= self.config.media_queue_max {
            self.stats.media_dropped += 1;
            self.stats.p_frames_dropped += 1;
            self.sink.emit(RelayEvent::FramesDropped {
                session_id: self.session_id,
                kind: DropKind::PFrame,
                count: 1,
            });
            return Ok(MediaOutcome::Dropped);
        }

        self.media_queue
            .push_back(QueuedMessage::new(MessageKind::MediaFrame, payload));
        self.stats.media_enqueued += 1;
        if keyframe {
            self.stats.idr_frames += 1;
        }
        self.sink.emit(RelayEvent::MediaFrameReceived {
            session_id: self.session_id,
            bytes: frame.size(),
            keyframe,
        });

        self.flush_media();
        self.sync_queue_sizes();
        Ok(MediaOutcome::Accepted)
    }

    /// Register a listener and flush any retained backlog to it
    pub fn add_listener(&mut self, listener: ListenerHandle) {
        tracing::debug!(
            session_id = self.session_id,
            listener_id = listener.id,
            "Listener registered"
        );
        self.listeners.push(listener);
        self.flush_control();
        self.flush_media();
        self.sync_queue_sizes();
    }

    /// Remove a listener by id
    pub fn remove_listener(&mut self, id: ListenerId) {
        self.listeners.retain(|l| l.id != id);
    }

    /// Snapshot of the session's counters with current queue depths
    pub fn stats_snapshot(&mut self) -> RelayStats {
        self.sync_queue_sizes();
        self.stats.clone()
    }

    /// Forward queued control events in FIFO order while listeners accept
    fn flush_control(&mut self) {
        loop {
            let (message, latency) = match self.control_queue.front() {
                Some(front) => (front.to_forwarded(), front.enqueued_at.elapsed()),
                None => break,
            };
            if self.deliver(&message) == 0 {
                break;
            }
            self.control_queue.pop_front();
            self.stats.control_forwarded += 1;
            self.sink.emit(RelayEvent::ControlEventSent {
                session_id: self.session_id,
                latency,
            });
        }
    }

    /// Forward queued media frames in FIFO order while listeners accept
    fn flush_media(&mut self) {
        loop {
            let message = match self.media_queue.front() {
                Some(front) => front.to_forwarded(),
                None => break,
            };
            if self.deliver(&message) == 0 {
                break;
            }
            self.media_queue.pop_front();
            self.stats.media_forwarded += 1;
        }
    }

    /// Push one message to every live listener, pruning dead ones
    ///
    /// Returns the number of listeners that accepted the message.
    fn deliver(&mut self, message: &super::message::ForwardedMessage) -> usize {
        let mut delivered = 0;

        self.listeners.retain(|listener| {
            match listener.try_forward(message.clone()) {
                DeliveryOutcome::Delivered => {
                    delivered += 1;
                    true
                }
                DeliveryOutcome::Lagging => true,
                DeliveryOutcome::Gone => {
                    tracing::debug!(
                        listener_id = listener.id,
                        "Listener channel closed, pruning"
                    );
                    false
                }
            }
        });

        delivered
    }

    fn sync_queue_sizes(&mut self) {
        self.stats.control_queue_size = self.control_queue.len();
        self.stats.media_queue_size = self.media_queue.len();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::sync::mpsc;

    use crate::events::testing::CollectingSink;
    use crate::relay::message::ForwardedMessage;

    use super::*;

    fn engine() -> RelayEngine {
        engine_with_config(RelayConfig::default())
    }

    fn engine_with_config(config: RelayConfig) -> RelayEngine {
        RelayEngine::new(1, config, Arc::new(CollectingSink::default()))
    }

    fn keydown() -> Value {
        json!({"type": "keydown", "key": "a"})
    }

    fn p_frame() -> Value {
        json!({"data": "Y", "frame_type": "p"})
    }

    fn idr_frame() -> Value {
        json!({"data": "X", "frame_type": "idr"})
    }

    #[tokio::test]
    async fn test_control_event_forwarded_to_listener() {
        let mut engine = engine();
        let (tx, mut rx) = mpsc::channel::<ForwardedMessage>(8);
        engine.add_listener(ListenerHandle::new(1, tx));

        engine.enqueue_control(keydown()).unwrap();

        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.event, MessageKind::ControlEvent);
        assert_eq!(msg.payload["key"], "a");
        assert_eq!(msg.source, "relay");

        let stats = engine.stats_snapshot();
        assert_eq!(stats.control_enqueued, 1);
        assert_eq!(stats.control_forwarded, 1);
        assert_eq!(stats.control_queue_size, 0);
    }

    #[tokio::test]
    async fn test_invalid_control_touches_no_counters() {
        let mut engine = engine();

        let err = engine.enqueue_control(json!({"type": "keydown"})).unwrap_err();
        assert!(matches!(err, RelayError::InvalidMessage(_)));

        assert_eq!(engine.stats_snapshot(), RelayStats::default());
    }

    #[tokio::test]
    async fn test_control_queue_full() {
        let mut engine = engine();

        // No listener attached, so the queue retains every accepted event
        for _ in 0..100 {
            engine.enqueue_control(keydown()).unwrap();
        }

        let err = engine.enqueue_control(keydown()).unwrap_err();
        assert_eq!(err, RelayError::ControlQueueFull);

        let stats = engine.stats_snapshot();
        assert_eq!(stats.control_enqueued, 100);
        assert_eq!(stats.control_dropped, 1);
        assert_eq!(stats.control_queue_size, 100);
    }

    #[tokio::test]
    async fn test_p_frame_dropped_when_queue_full() {
        let mut engine = engine();

        for _ in 0..30 {
            assert_eq!(
                engine.enqueue_media(p_frame()).unwrap(),
                MediaOutcome::Accepted
            );
        }

        // The 31st P-frame is shed as a success-shaped outcome
        assert_eq!(
            engine.enqueue_media(p_frame()).unwrap(),
            MediaOutcome::Dropped
        );

        let stats = engine.stats_snapshot();
        assert_eq!(stats.media_enqueued, 30);
        assert_eq!(stats.media_dropped, 1);
        assert_eq!(stats.p_frames_dropped, 1);
        assert_eq!(stats.media_queue_size, 30);
    }

    #[tokio::test]
    async fn test_idr_bypasses_capacity_check() {
        let mut engine = engine();

        for _ in 0..30 {
            engine.enqueue_media(p_frame()).unwrap();
        }

        assert_eq!(
            engine.enqueue_media(idr_frame()).unwrap(),
            MediaOutcome::Accepted
        );

        let stats = engine.stats_snapshot();
        assert_eq!(stats.idr_frames, 1);
        assert_eq!(stats.media_enqueued, 31);
        assert_eq!(stats.media_queue_size, 31);
        assert_eq!(stats.media_dropped, 0);
    }

    #[tokio::test]
    async fn test_missing_frame_type_behaves_like_p() {
        let mut engine = engine();

        for _ in 0..30 {
            engine.enqueue_media(json!({"data": "Y"})).unwrap();
        }

        assert_eq!(
            engine.enqueue_media(json!({"data": "Y"})).unwrap(),
            MediaOutcome::Dropped
        );
        assert_eq!(engine.stats_snapshot().p_frames_dropped, 1);
    }

    #[tokio::test]
    async fn test_invalid_media_frame() {
        let mut engine = engine();

        let err = engine
            .enqueue_media(json!({"data": "x", "frame_type": "b"}))
            .unwrap_err();
        assert!(matches!(err, RelayError::InvalidMessage(_)));
        assert_eq!(engine.stats_snapshot(), RelayStats::default());
    }

    #[tokio::test]
    async fn test_fifo_order_preserved_across_idr_bypass() {
        let mut engine = engine_with_config(RelayConfig::default().media_queue_max(2));

        engine.enqueue_media(json!({"data": "p1"})).unwrap();
        engine.enqueue_media(json!({"data": "p2"})).unwrap();
        // Queue full: keyframe bypasses the check but keeps its enqueue slot
        engine.enqueue_media(json!({"data": "k", "frame_type": "idr"})).unwrap();

        let (tx, mut rx) = mpsc::channel::<ForwardedMessage>(8);
        engine.add_listener(ListenerHandle::new(1, tx));

        let order: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|m| m.payload["data"].as_str().unwrap().to_owned())
            .collect();
        assert_eq!(order, ["p1", "p2", "k"]);
    }

    #[tokio::test]
    async fn test_backlog_flushed_on_listener_attach() {
        let mut engine = engine();

        engine.enqueue_control(keydown()).unwrap();
        engine.enqueue_media(idr_frame()).unwrap();
        assert_eq!(engine.stats_snapshot().control_forwarded, 0);

        let (tx, mut rx) = mpsc::channel::<ForwardedMessage>(8);
        engine.add_listener(ListenerHandle::new(1, tx));

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());

        let stats = engine.stats_snapshot();
        assert_eq!(stats.control_forwarded, 1);
        assert_eq!(stats.media_forwarded, 1);
        assert_eq!(stats.control_queue_size, 0);
        assert_eq!(stats.media_queue_size, 0);
    }

    #[tokio::test]
    async fn test_fan_out_to_both_listeners() {
        let mut engine = engine();
        let (device_tx, mut device_rx) = mpsc::channel::<ForwardedMessage>(8);
        let (viewer_tx, mut viewer_rx) = mpsc::channel::<ForwardedMessage>(8);
        engine.add_listener(ListenerHandle::new(1, device_tx));
        engine.add_listener(ListenerHandle::new(2, viewer_tx));

        engine.enqueue_control(keydown()).unwrap();

        assert!(device_rx.try_recv().is_ok());
        assert!(viewer_rx.try_recv().is_ok());
        assert_eq!(engine.stats_snapshot().control_forwarded, 1);
    }

    #[tokio::test]
    async fn test_dead_listener_pruned() {
        let mut engine = engine();
        let (tx, rx) = mpsc::channel::<ForwardedMessage>(8);
        engine.add_listener(ListenerHandle::new(1, tx));
        drop(rx);

        engine.enqueue_control(keydown()).unwrap();

        // Channel closed: message retained, listener gone
        let stats = engine.stats_snapshot();
        assert_eq!(stats.control_forwarded, 0);
        assert_eq!(stats.control_queue_size, 1);
        assert!(engine.listeners.is_empty());
    }

    #[tokio::test]
    async fn test_lagging_listener_applies_backpressure() {
        let mut engine = engine_with_config(RelayConfig::default().control_queue_max(2));
        let (tx, _rx) = mpsc::channel::<ForwardedMessage>(1);
        engine.add_listener(ListenerHandle::new(1, tx));

        // First fills the listener mailbox, the rest back up in the queue
        engine.enqueue_control(keydown()).unwrap();
        engine.enqueue_control(keydown()).unwrap();
        engine.enqueue_control(keydown()).unwrap();
        assert_eq!(
            engine.enqueue_control(keydown()).unwrap_err(),
            RelayError::ControlQueueFull
        );
    }

    #[tokio::test]
    async fn test_remove_listener() {
        let mut engine = engine();
        let (tx, mut rx) = mpsc::channel::<ForwardedMessage>(8);
        engine.add_listener(ListenerHandle::new(7, tx));
        engine.remove_listener(7);

        engine.enqueue_control(keydown()).unwrap();
        assert!(rx.try_recv().is_err());
    }
}
