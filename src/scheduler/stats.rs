use chrono::{DateTime, Utc};
use serde::Serialize;

/// Point-in-time view of the scheduler. Derived on demand, never a source of
/// truth.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStatistics {
    /// Requests waiting in the priority queue.
    pub queued: usize,
    /// Requests sitting in batch buffers.
    pub batched: usize,
    /// Requests sitting in merge buffers.
    pub merged: usize,
    /// Dispatches on the wire or backing off.
    pub active: usize,
    pub rate_limited: bool,
    pub online: bool,
    /// Last known offline store size.
    pub offline_count: usize,
    pub timestamp: DateTime<Utc>,
}

impl QueueStatistics {
    /// Everything the scheduler still owes an outcome for, excluding the
    /// offline mirror.
    pub fn pending(&self) -> usize {
        self.queued + self.batched + self.merged + self.active
    }
}

impl Default for QueueStatistics {
    fn default() -> Self {
        Self {
            queued: 0,
            batched: 0,
            merged: 0,
            active: 0,
            rate_limited: false,
            online: true,
            offline_count: 0,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_timestamp() {
        let stats = QueueStatistics { queued: 3, batched: 2, active: 1, ..Default::default() };
        assert_eq!(stats.pending(), 6);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["queued"], 3);
        assert_eq!(json["online"], true);
        assert!(json["timestamp"].is_string());
    }
}
