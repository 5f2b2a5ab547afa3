use std::time::Duration;

use tokio::time::Instant;

use super::response::batch_outcomes;
use super::BatchingStrategy;
use crate::scheduler::priority::Priority;
use crate::scheduler::request::{QueuedRequest, RequestOutcome};

/// Batching with a flush delay per priority level. Only same-priority
/// requests share a buffer.
#[derive(Debug, Clone)]
pub struct PriorityAwareBatchingStrategy {
    max_batch_size: usize,
    max_batch_delay: Duration,
    delays: [Duration; 5],
}

impl PriorityAwareBatchingStrategy {
    pub fn new(max_batch_size: usize, max_batch_delay: Duration) -> Self {
        Self {
            max_batch_size: max_batch_size.max(1),
            max_batch_delay,
            delays: [
                Duration::from_millis(100),
                Duration::from_millis(500),
                Duration::from_secs(2),
                Duration::from_secs(5),
                max_batch_delay,
            ],
        }
    }

    pub fn delay_for(&self, priority: Priority) -> Duration {
        self.delays[priority.ordinal()]
    }
}

#[async_trait::async_trait]
impl BatchingStrategy for PriorityAwareBatchingStrategy {
    fn name(&self) -> &'static str {
        "priority_aware"
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    fn max_batch_delay(&self) -> Duration {
        self.max_batch_delay
    }

    fn should_send_batch(&self, batch: &[QueuedRequest], first_batch_time: Instant) -> bool {
        let Some(first) = batch.first() else {
            return false;
        };
        batch.len() >= self.max_batch_size
            || first_batch_time.elapsed() >= self.delay_for(first.priority())
    }

    /// Same routing as the default, but members are completed in priority
    /// order, most urgent first.
    async fn process_batch_response(&self, batch: &[QueuedRequest], outcome: &RequestOutcome) {
        let mut routed: Vec<_> = batch.iter().zip(batch_outcomes(batch, outcome)).collect();
        routed.sort_by_key(|(req, _)| req.priority());
        for (req, member) in routed {
            req.complete(member);
        }
    }
}
