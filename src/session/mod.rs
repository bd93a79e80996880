//! Remote-control session lifecycle
//!
//! A session is the lifecycle-tracked unit of one remote-control connection,
//! scoped to one device at a time. The record moves through an explicit state
//! machine (created -> starting -> streaming -> stopping -> closed, with
//! closed reachable from any state) and is reclaimed by a timeout sweep when
//! the peers go quiet. Closed records are retained as terminal history, never
//! deleted.

pub mod state;
pub mod store;

pub use state::{Session, SessionId, SessionState};
pub use store::{SessionOptions, SessionStore};
