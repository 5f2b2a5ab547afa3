use std::time::Duration;

use tokio::time::Instant;

use super::BatchingStrategy;
use crate::scheduler::request::QueuedRequest;

/// Throughput-first batching: a buffer is never flushed before
/// `min_batch_delay`, even when full.
#[derive(Debug, Clone)]
pub struct TimeBasedBatchingStrategy {
    max_batch_size: usize,
    max_batch_delay: Duration,
    min_batch_delay: Duration,
}

impl TimeBasedBatchingStrategy {
    pub const DEFAULT_MIN_DELAY: Duration = Duration::from_secs(1);

    pub fn new(max_batch_size: usize, max_batch_delay: Duration) -> Self {
        Self::with_min_delay(max_batch_size, max_batch_delay, Self::DEFAULT_MIN_DELAY)
    }

    pub fn with_min_delay(
        max_batch_size: usize,
        max_batch_delay: Duration,
        min_batch_delay: Duration,
    ) -> Self {
        Self { max_batch_size: max_batch_size.max(1), max_batch_delay, min_batch_delay }
    }

    pub fn min_batch_delay(&self) -> Duration {
        self.min_batch_delay
    }
}

#[async_trait::async_trait]
impl BatchingStrategy for TimeBasedBatchingStrategy {
    fn name(&self) -> &'static str {
        "time_based"
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    fn max_batch_delay(&self) -> Duration {
        self.max_batch_delay
    }

    fn should_send_batch(&self, batch: &[QueuedRequest], first_batch_time: Instant) -> bool {
        if batch.is_empty() {
            return false;
        }
        let elapsed = first_batch_time.elapsed();
        if elapsed < self.min_batch_delay {
            return false;
        }
        batch.len() >= self.max_batch_size || elapsed >= self.max_batch_delay
    }
}
