use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use super::BatchingStrategy;
use crate::scheduler::request::QueuedRequest;

const GROW_STEP: usize = 2;
const SHRINK_STEP: usize = 5;
const DELAY_DECAY: f64 = 0.95;
const DELAY_BACKOFF: f64 = 1.2;

/// Current controller state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveSnapshot {
    pub target_size: usize,
    pub batch_delay: Duration,
    pub successful_batches: u64,
    pub failed_batches: u64,
}

/// Batching that tunes its target size and delay from batch outcomes.
///
/// Additive increase of the target size and multiplicative decrease of the
/// delay on success; the reverse on failure.
#[derive(Debug)]
pub struct AdaptiveBatchingStrategy {
    max_batch_size: usize,
    max_delay: Duration,
    min_delay: Duration,
    min_batch_size: usize,
    state: Mutex<AdaptiveSnapshot>,
}

impl AdaptiveBatchingStrategy {
    pub const DEFAULT_MIN_DELAY: Duration = Duration::from_millis(500);
    pub const DEFAULT_MIN_BATCH_SIZE: usize = 5;

    pub fn new(max_batch_size: usize, max_batch_delay: Duration) -> Self {
        Self::with_bounds(
            max_batch_size,
            max_batch_delay,
            Self::DEFAULT_MIN_DELAY,
            Self::DEFAULT_MIN_BATCH_SIZE,
        )
    }

    pub fn with_bounds(
        max_batch_size: usize,
        max_batch_delay: Duration,
        min_delay: Duration,
        min_batch_size: usize,
    ) -> Self {
        let max_batch_size = max_batch_size.max(1);
        let min_delay = min_delay.min(max_batch_delay);
        let strategy = Self {
            max_batch_size,
            max_delay: max_batch_delay,
            min_delay,
            min_batch_size: min_batch_size.min(max_batch_size),
            state: Mutex::new(AdaptiveSnapshot {
                target_size: 0,
                batch_delay: Duration::ZERO,
                successful_batches: 0,
                failed_batches: 0,
            }),
        };
        strategy.reset();
        strategy
    }

    /// Back to the initial target (half the max size) and delay (midpoint).
    pub fn reset(&self) {
        *self.state.lock() = AdaptiveSnapshot {
            target_size: (self.max_batch_size / 2).max(1),
            batch_delay: (self.min_delay + self.max_delay) / 2,
            successful_batches: 0,
            failed_batches: 0,
        };
    }

    pub fn snapshot(&self) -> AdaptiveSnapshot {
        *self.state.lock()
    }
}

#[async_trait::async_trait]
impl BatchingStrategy for AdaptiveBatchingStrategy {
    fn name(&self) -> &'static str {
        "adaptive"
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    fn max_batch_delay(&self) -> Duration {
        self.max_delay
    }

    fn should_send_batch(&self, batch: &[QueuedRequest], first_batch_time: Instant) -> bool {
        if batch.is_empty() {
            return false;
        }
        if batch.len() >= self.max_batch_size {
            return true;
        }
        let state = self.snapshot();
        let elapsed = first_batch_time.elapsed();
        if batch.len() >= state.target_size {
            return elapsed >= state.batch_delay;
        }
        elapsed >= self.max_delay
    }

    fn record_batch_result(&self, success: bool, batch_size: usize) {
        let mut state = self.state.lock();
        if success {
            state.successful_batches += 1;
            if batch_size >= state.target_size {
                state.target_size = (state.target_size + GROW_STEP).min(self.max_batch_size);
            }
            state.batch_delay = state.batch_delay.mul_f64(DELAY_DECAY).max(self.min_delay);
        } else {
            state.failed_batches += 1;
            state.target_size = state.target_size.saturating_sub(SHRINK_STEP).max(self.min_batch_size);
            state.batch_delay = state.batch_delay.mul_f64(DELAY_BACKOFF).min(self.max_delay);
        }
        tracing::debug!(
            success,
            batch_size,
            target_size = state.target_size,
            delay_ms = state.batch_delay.as_millis() as u64,
            "Adaptive batching adjusted"
        );
    }
}
