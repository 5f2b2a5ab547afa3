use std::time::Duration;

use tokio::time::Instant;

use super::BatchingStrategy;
use crate::scheduler::request::QueuedRequest;

/// Flushes at half the max delay once an optimal fill level is reached,
/// at the full delay otherwise.
#[derive(Debug, Clone)]
pub struct SizeBasedBatchingStrategy {
    max_batch_size: usize,
    max_batch_delay: Duration,
    optimal_batch_size: usize,
}

impl SizeBasedBatchingStrategy {
    /// Optimal size defaults to half the max size.
    pub fn new(max_batch_size: usize, max_batch_delay: Duration) -> Self {
        Self::with_optimal_size(max_batch_size, max_batch_delay, 0)
    }

    /// An `optimal_batch_size` of 0 selects the default.
    pub fn with_optimal_size(
        max_batch_size: usize,
        max_batch_delay: Duration,
        optimal_batch_size: usize,
    ) -> Self {
        let max_batch_size = max_batch_size.max(1);
        let optimal_batch_size = if optimal_batch_size > 0 {
            optimal_batch_size
        } else {
            (max_batch_size / 2).max(1)
        };
        Self { max_batch_size, max_batch_delay, optimal_batch_size }
    }

    pub fn optimal_batch_size(&self) -> usize {
        self.optimal_batch_size
    }
}

#[async_trait::async_trait]
impl BatchingStrategy for SizeBasedBatchingStrategy {
    fn name(&self) -> &'static str {
        "size_based"
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
        if batch.len() >= self.max_batch_size {
            return true;
        }
        let elapsed = first_batch_time.elapsed();
        if batch.len() >= self.optimal_batch_size {
            return elapsed >= self.max_batch_delay / 2;
        }
        elapsed >= self.max_batch_delay
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::scheduler::policy::RequestConfig;
    use crate::scheduler::request::HttpMethod;

    fn batch(n: usize) -> Vec<QueuedRequest> {
        let config = Arc::new(RequestConfig::default());
        (0..n)
            .map(|_| QueuedRequest::new("/events", "{}", HttpMethod::Post, config.clone()))
            .collect()
    }

    #[test]
    fn optimal_defaults_to_half_max() {
        assert_eq!(SizeBasedBatchingStrategy::new(100, Duration::from_secs(10)).optimal_batch_size(), 50);
        assert_eq!(SizeBasedBatchingStrategy::new(1, Duration::from_secs(10)).optimal_batch_size(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn optimal_fill_flushes_at_half_delay() {
        let s = SizeBasedBatchingStrategy::with_optimal_size(100, Duration::from_secs(10), 8);
        let opened = Instant::now();

        tokio::time::advance(Duration::from_millis(4_999)).await;
        assert!(!s.should_send_batch(&batch(8), opened));
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(s.should_send_batch(&batch(8), opened));
        assert!(!s.should_send_batch(&batch(7), opened));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(s.should_send_batch(&batch(1), opened));
    }

    #[tokio::test(start_paused = true)]
    async fn full_batch_flushes_immediately() {
        let s = SizeBasedBatchingStrategy::new(4, Duration::from_secs(10));
        assert!(s.should_send_batch(&batch(4), Instant::now()));
    }
}
