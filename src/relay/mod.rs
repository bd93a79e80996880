//! Per-session relay engine, supervisor and registry
//!
//! Every active session owns one relay worker that ferries control events
//! and media frames between the device-side and viewer-side transport
//! adapters. The supervisor keys workers by session id and restarts them on
//! crash.
//!
//! # Architecture
//!
//! ```text
//!                        Arc<RelaySupervisor>
//!                   ┌──────────────────────────┐
//!                   │ relays: HashMap<          │
//!                   │   SessionId,              │
//!                   │   RelayCell { tx } >      │
//!                   └────────────┬─────────────┘
//!                                │ mpsc commands
//!                                ▼
//!                     [relay worker task]
//!                 control queue  │  media queue
//!                 (cap 100)      │  (cap 30, IDR bypass)
//!                                │ try_send fan-out
//!                   ┌────────────┴────────────┐
//!                   ▼                         ▼
//!           [device adapter]          [viewer adapter]
//! ```
//!
//! # Zero-Copy Design
//!
//! Payloads ride behind `Arc`, so the queued copy and every fan-out copy
//! share one allocation; the listener channels clone the message envelope
//! only.

pub mod config;
pub mod engine;
pub mod message;
pub mod stats;
pub mod supervisor;

pub use config::RelayConfig;
pub use engine::MediaOutcome;
pub use message::{ForwardedMessage, ListenerHandle, ListenerId, MessageKind};
pub use stats::RelayStats;
pub use supervisor::RelaySupervisor;
