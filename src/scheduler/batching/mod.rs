//! Batching engine.
//!
//! A strategy decides which requests may share a batch buffer, when the buffer
//! is flushed, how the batch goes on the wire and how the single wire result
//! is routed back to each member.

mod adaptive;
mod priority_aware;
pub mod response;
mod size_based;
mod time_based;

pub use adaptive::{AdaptiveBatchingStrategy, AdaptiveSnapshot};
pub use priority_aware::PriorityAwareBatchingStrategy;
pub use response::{batch_outcomes, parse_batch_response, BatchParseResult, MemberResult};
pub use size_based::SizeBasedBatchingStrategy;
pub use time_based::TimeBasedBatchingStrategy;

use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::Instant;

use super::request::{QueuedRequest, RequestOutcome, ResponseSink};
use crate::error::SchedulerError;

/// Suffix appended to a member endpoint to form the batch endpoint.
pub const BATCH_ENDPOINT_SUFFIX: &str = "/batch";

/// How batch buffers are keyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchKeyMode {
    Endpoint,
    #[default]
    EndpointAndPriority,
}

/// Pluggable batching policy.
#[async_trait::async_trait]
pub trait BatchingStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn max_batch_size(&self) -> usize;

    fn max_batch_delay(&self) -> Duration;

    /// Whether two requests may share a batch. Same endpoint, priority and
    /// method by default.
    fn are_compatible(&self, a: &QueuedRequest, b: &QueuedRequest) -> bool {
        a.endpoint() == b.endpoint() && a.priority() == b.priority() && a.method() == b.method()
    }

    fn can_add_to_batch(&self, req: &QueuedRequest, batch: &[QueuedRequest]) -> bool {
        if batch.len() >= self.max_batch_size() {
            return false;
        }
        batch.first().map_or(true, |first| self.are_compatible(req, first))
    }

    /// Flush when full or when the buffer has been open for the max delay.
    fn should_send_batch(&self, batch: &[QueuedRequest], first_batch_time: Instant) -> bool {
        if batch.is_empty() {
            return false;
        }
        batch.len() >= self.max_batch_size() || first_batch_time.elapsed() >= self.max_batch_delay()
    }

    /// Build the single wire request carrying every member.
    async fn create_batch_request(
        &self,
        batch: &[QueuedRequest],
    ) -> Result<QueuedRequest, SchedulerError> {
        build_batch_request(batch)
    }

    /// Route the wire outcome back to each member.
    async fn process_batch_response(&self, batch: &[QueuedRequest], outcome: &RequestOutcome) {
        response::route_batch_response(batch, outcome);
    }

    /// Feedback hook invoked after every batch wire call.
    fn record_batch_result(&self, _success: bool, _batch_size: usize) {}
}

/// `{"requests": [...]}` envelope. Bodies that are not JSON are wrapped as
/// `{"data": "<raw>"}`.
pub fn serialize_batch_body(batch: &[QueuedRequest]) -> Result<String, SchedulerError> {
    let bodies: Vec<Value> = batch
        .iter()
        .map(|req| {
            serde_json::from_str::<Value>(req.body()).unwrap_or_else(|_| json!({ "data": req.body() }))
        })
        .collect();
    Ok(serde_json::to_string(&json!({ "requests": bodies }))?)
}

/// Batch request posted to `<endpoint>/batch`, inheriting method, priority
/// and policy from the first member. Nobody awaits it directly.
pub fn build_batch_request(batch: &[QueuedRequest]) -> Result<QueuedRequest, SchedulerError> {
    let first = batch.first().ok_or(SchedulerError::EmptyBatch)?;
    let body = serialize_batch_body(batch)?;
    let endpoint = format!("{}{}", first.endpoint(), BATCH_ENDPOINT_SUFFIX);
    Ok(
        QueuedRequest::new(endpoint, body, first.method(), first.config().clone())
            .with_priority(first.priority())
            .with_sink(ResponseSink::detached()),
    )
}

/// Plain size-or-delay batching with the default compatibility rule.
#[derive(Debug, Clone)]
pub struct BasicBatchingStrategy {
    max_batch_size: usize,
    max_batch_delay: Duration,
}

impl BasicBatchingStrategy {
    pub fn new(max_batch_size: usize, max_batch_delay: Duration) -> Self {
        Self { max_batch_size: max_batch_size.max(1), max_batch_delay }
    }
}

#[async_trait::async_trait]
impl BatchingStrategy for BasicBatchingStrategy {
    fn name(&self) -> &'static str {
        "basic"
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    fn max_batch_delay(&self) -> Duration {
        self.max_batch_delay
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::scheduler::policy::RequestConfig;
    use crate::scheduler::priority::Priority;
    use crate::scheduler::request::HttpMethod;

    fn req(endpoint: &str, body: &str, method: HttpMethod, priority: Priority) -> QueuedRequest {
        QueuedRequest::new(endpoint, body, method, Arc::new(RequestConfig::for_priority(priority)))
    }

    #[test]
    fn compatibility_needs_endpoint_priority_and_method() {
        let s = BasicBatchingStrategy::new(10, Duration::from_secs(1));
        let batch = vec![req("/e", "{}", HttpMethod::Post, Priority::Low)];

        assert!(s.can_add_to_batch(&req("/e", "{}", HttpMethod::Post, Priority::Low), &batch));
        assert!(!s.can_add_to_batch(&req("/e", "{}", HttpMethod::Put, Priority::Low), &batch));
        assert!(!s.can_add_to_batch(&req("/e", "{}", HttpMethod::Post, Priority::Batch), &batch));
        assert!(!s.can_add_to_batch(&req("/x", "{}", HttpMethod::Post, Priority::Low), &batch));
        assert!(s.can_add_to_batch(&req("/x", "{}", HttpMethod::Post, Priority::Low), &[]));
    }

    #[test]
    fn full_batch_rejects_more() {
        let s = BasicBatchingStrategy::new(2, Duration::from_secs(1));
        let batch: Vec<_> = (0..2).map(|_| req("/e", "{}", HttpMethod::Post, Priority::Low)).collect();
        assert!(!s.can_add_to_batch(&req("/e", "{}", HttpMethod::Post, Priority::Low), &batch));
    }

    #[tokio::test(start_paused = true)]
    async fn flushes_on_size_or_delay() {
        let s = BasicBatchingStrategy::new(3, Duration::from_secs(2));
        let opened = Instant::now();
        let mut batch = vec![req("/e", "{}", HttpMethod::Post, Priority::Low)];

        assert!(!s.should_send_batch(&[], opened));
        assert!(!s.should_send_batch(&batch, opened));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(s.should_send_batch(&batch, opened));

        batch.push(batch[0].clone());
        batch.push(batch[0].clone());
        assert!(s.should_send_batch(&batch, Instant::now()));
    }

    #[tokio::test]
    async fn batch_request_uses_envelope_and_first_member() {
        let s = BasicBatchingStrategy::new(10, Duration::from_secs(1));
        let batch = vec![
            req("/events", r#"{"a":1}"#, HttpMethod::Put, Priority::Low),
            req("/events", "not json", HttpMethod::Put, Priority::Low),
        ];
        let wire = s.create_batch_request(&batch).await.unwrap();

        assert_eq!(wire.endpoint(), "/events/batch");
        assert_eq!(wire.method(), HttpMethod::Put);
        assert_eq!(wire.priority(), Priority::Low);
        let body: Value = serde_json::from_str(wire.body()).unwrap();
        assert_eq!(body, json!({"requests": [{"a": 1}, {"data": "not json"}]}));
    }

    #[tokio::test]
    async fn empty_batch_is_an_error() {
        let s = BasicBatchingStrategy::new(10, Duration::from_secs(1));
        assert!(matches!(s.create_batch_request(&[]).await, Err(SchedulerError::EmptyBatch)));
    }
}
