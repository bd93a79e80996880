//! Per-session relay statistics

use serde::Serialize;

/// Counters owned by one relay engine
///
/// Created with the relay, mutated only inside its processing loop,
/// destroyed with it. `Serialize` so adapters can report the snapshot over
/// the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    /// Control events accepted into the queue
    pub control_enqueued: u64,
    /// Control events delivered to at least one listener
    pub control_forwarded: u64,
    /// Control events rejected because the queue was full
    pub control_dropped: u64,
    /// Media frames accepted into the queue
    pub media_enqueued: u64,
    /// Media frames delivered to at least one listener
    pub media_forwarded: u64,
    /// Media frames shed under backpressure
    pub media_dropped: u64,
    /// Keyframes accepted (never dropped)
    pub idr_frames: u64,
    /// Predictive frames shed under backpressure
    pub p_frames_dropped: u64,
    /// Current control queue depth
    pub control_queue_size: usize,
    /// Current media queue depth
    pub media_queue_size: usize,
}

impl RelayStats {
    /// Create a zeroed stats snapshot
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_start_zeroed() {
        let stats = RelayStats::new();
        assert_eq!(stats, RelayStats::default());
        assert_eq!(stats.control_enqueued, 0);
        assert_eq!(stats.idr_frames, 0);
        assert_eq!(stats.media_queue_size, 0);
    }

    #[test]
    fn test_stats_serialize() {
        let stats = RelayStats {
            control_enqueued: 3,
            idr_frames: 1,
            ..Default::default()
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["control_enqueued"], 3);
        assert_eq!(json["idr_frames"], 1);
    }
}
