//! Merging engine.
//!
//! Merging collapses several requests into one wire call whose single outcome
//! is shared by every original caller.

mod last_wins;

pub use last_wins::{deep_merge, LastWinsMergingStrategy};

use std::time::Duration;

use super::request::{QueuedRequest, RequestOutcome};

/// Pluggable merge policy.
#[async_trait::async_trait]
pub trait MergingStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// How long a merge buffer stays open before it is flushed.
    fn max_merge_delay(&self) -> Duration;

    /// Requests with equal keys collapse into one call.
    fn merge_key(&self, req: &QueuedRequest) -> String;

    fn can_merge(&self, req: &QueuedRequest, existing: &[QueuedRequest]) -> bool {
        existing.first().map_or(true, |first| self.merge_key(req) == self.merge_key(first))
    }

    /// Build the single outbound request. Callers guarantee a non-empty list.
    async fn merge_requests(
        &self,
        requests: &[QueuedRequest],
    ) -> Result<QueuedRequest, crate::error::SchedulerError>;

    /// Every original caller receives the identical outcome.
    async fn process_merged_response(&self, originals: &[QueuedRequest], outcome: &RequestOutcome) {
        for req in originals {
            req.complete(outcome.clone());
        }
    }
}
