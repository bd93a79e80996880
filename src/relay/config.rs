//! Relay configuration

use std::time::Duration;

/// Default control queue capacity
pub const DEFAULT_CONTROL_QUEUE_MAX: usize = 100;

/// Default media queue capacity
pub const DEFAULT_MEDIA_QUEUE_MAX: usize = 30;

/// Relay configuration options
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Control queue capacity; enqueues beyond this are rejected
    pub control_queue_max: usize,

    /// Media queue capacity; P-frames beyond this are shed (IDR frames
    /// bypass the check)
    pub media_queue_max: usize,

    /// Listener channel depth for fire-and-forget forwarding
    pub listener_buffer: usize,

    /// Depth of each relay worker's command mailbox
    pub mailbox_capacity: usize,

    /// Default session inactivity window
    pub session_timeout: Duration,

    /// Interval between background timeout sweeps
    pub sweep_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            control_queue_max: DEFAULT_CONTROL_QUEUE_MAX,
            media_queue_max: DEFAULT_MEDIA_QUEUE_MAX,
            listener_buffer: 64,
            mailbox_capacity: 128,
            session_timeout: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

impl RelayConfig {
    /// Set the control queue capacity
    pub fn control_queue_max(mut self, max: usize) -> Self {
        self.control_queue_max = max;
        self
    }

    /// Set the media queue capacity
    pub fn media_queue_max(mut self, max: usize) -> Self {
        self.media_queue_max = max;
        self
    }

    /// Set the listener channel depth
    pub fn listener_buffer(mut self, depth: usize) -> Self {
        self.listener_buffer = depth;
        self
    }

    /// Set the default session inactivity window
    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Set the background sweep interval
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}
