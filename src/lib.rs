//! # rc-relay
//!
//! Remote-control session relay for signage devices: ferries interactive
//! control events and live video frames between a device and a remote
//! viewer during an active remote-control session.
//!
//! Each session owns one relay worker with two bounded FIFO queues. The
//! control queue (100 entries) rejects enqueues when full; the media queue
//! (30 entries) sheds P-frames under load while IDR keyframes always pass,
//! so the viewer never stalls waiting for decodability. Session lifecycle
//! runs through an explicit state machine (created -> starting -> streaming
//! -> stopping -> closed) with a timeout sweep reclaiming idle sessions.
//!
//! Everything outside this core is an external collaborator: transport
//! adapters push validated payloads in and receive forwarded messages
//! through registered listener channels, and an [`events::EventSink`]
//! consumes the correlated lifecycle/activity/drop events.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use rc_relay::{RelayConfig, RelayService, SessionOptions};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = Arc::new(RelayService::new(RelayConfig::default()));
//!     let _sweep = service.spawn_sweep_task();
//!
//!     let session = service
//!         .create_session("device-1", "user-1", SessionOptions::default())
//!         .await?;
//!
//!     // Viewer-side adapter registers for forwarded traffic
//!     let (tx, mut rx) = tokio::sync::mpsc::channel(64);
//!     service.add_listener(session.id, tx).await?;
//!
//!     service
//!         .enqueue_control_event(session.id, json!({"type": "keydown", "key": "a"}))
//!         .await?;
//!     service
//!         .enqueue_media_frame(session.id, json!({"data": "AAAA", "frame_type": "idr"}))
//!         .await?;
//!
//!     if let Some(message) = rx.recv().await {
//!         println!("{} -> {}", message.event.as_str(), message.payload);
//!     }
//!
//!     service.stop_session(session.id).await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod events;
pub mod relay;
pub mod service;
pub mod session;
pub mod validate;

pub use error::{RelayError, Result};
pub use events::{EventSink, LogSink, RelayEvent};
pub use relay::{
    ForwardedMessage, ListenerHandle, ListenerId, MediaOutcome, MessageKind, RelayConfig,
    RelayStats, RelaySupervisor,
};
pub use service::RelayService;
pub use session::{Session, SessionId, SessionOptions, SessionState, SessionStore};
pub use validate::{
    validate_control_event, validate_device_event, validate_media_frame,
    validate_media_metadata, ControlKind, FrameKind, MediaFrame, ValidationError,
};
