use std::time::Duration;

use serde_json::Value;

use super::MergingStrategy;
use crate::error::SchedulerError;
use crate::scheduler::request::QueuedRequest;

/// Last-wins merging keyed by `endpoint:<field value>`.
///
/// Payloads are deep-merged in queue order so later fields override earlier
/// ones. Arrays are replaced wholesale and `null` never erases a value. The
/// merged request carries the last member's method, priority and policy.
#[derive(Debug, Clone)]
pub struct LastWinsMergingStrategy {
    key_field: String,
    max_merge_delay: Duration,
}

impl Default for LastWinsMergingStrategy {
    fn default() -> Self {
        Self::new("id", Self::DEFAULT_MAX_MERGE_DELAY)
    }
}

impl LastWinsMergingStrategy {
    pub const DEFAULT_MAX_MERGE_DELAY: Duration = Duration::from_secs(2);

    pub fn new(key_field: impl Into<String>, max_merge_delay: Duration) -> Self {
        Self { key_field: key_field.into(), max_merge_delay }
    }

    pub fn key_field(&self) -> &str {
        &self.key_field
    }

    fn merge_bodies(requests: &[QueuedRequest]) -> Option<String> {
        let mut iter = requests.iter();
        let mut merged: Value = serde_json::from_str(iter.next()?.body()).ok()?;
        if !merged.is_object() {
            return None;
        }
        for req in iter {
            let next: Value = serde_json::from_str(req.body()).ok()?;
            if !next.is_object() {
                return None;
            }
            deep_merge(&mut merged, next);
        }
        serde_json::to_string(&merged).ok()
    }
}

/// Merge `overlay` into `base`. Objects merge recursively, `null` in the
/// overlay is ignored, and anything else (arrays included) replaces.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (_, Value::Null) => {}
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        if !value.is_null() {
                            base.insert(key, value);
                        }
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[async_trait::async_trait]
impl MergingStrategy for LastWinsMergingStrategy {
    fn name(&self) -> &'static str {
        "last_wins"
    }

    fn max_merge_delay(&self) -> Duration {
        self.max_merge_delay
    }

    fn merge_key(&self, req: &QueuedRequest) -> String {
        let field = serde_json::from_str::<Value>(req.body())
            .ok()
            .and_then(|v| v.get(&self.key_field).cloned());
        match field {
            Some(Value::String(s)) => format!("{}:{}", req.endpoint(), s),
            Some(other) => format!("{}:{}", req.endpoint(), other),
            None => req.endpoint().to_string(),
        }
    }

    async fn merge_requests(&self, requests: &[QueuedRequest]) -> Result<QueuedRequest, SchedulerError> {
        let last = requests.last().ok_or(SchedulerError::EmptyMerge)?;
        if requests.len() == 1 {
            return Ok(last.clone());
        }
        let body = Self::merge_bodies(requests).unwrap_or_else(|| {
            tracing::warn!(
                endpoint = last.endpoint(),
                merged = requests.len(),
                "Payload merge failed, sending last payload"
            );
            last.body().to_string()
        });
        Ok(QueuedRequest::new(last.endpoint(), body, last.method(), last.config().clone())
            .with_priority(last.priority()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::scheduler::policy::RequestConfig;
    use crate::scheduler::priority::Priority;
    use crate::scheduler::request::{HttpMethod, Response, ResponseSink};

    fn req(body: &str) -> QueuedRequest {
        QueuedRequest::new("/profile", body, HttpMethod::Put, Arc::new(RequestConfig::default()))
    }

    #[test]
    fn merge_key_uses_field_then_endpoint() {
        let s = LastWinsMergingStrategy::default();
        assert_eq!(s.merge_key(&req(r#"{"id":"p1","x":1}"#)), "/profile:p1");
        assert_eq!(s.merge_key(&req(r#"{"id":7}"#)), "/profile:7");
        assert_eq!(s.merge_key(&req(r#"{"x":1}"#)), "/profile");
        assert_eq!(s.merge_key(&req("not json")), "/profile");
    }

    #[test]
    fn can_merge_requires_equal_keys() {
        let s = LastWinsMergingStrategy::default();
        let existing = vec![req(r#"{"id":1}"#)];
        assert!(s.can_merge(&req(r#"{"id":1,"y":2}"#), &existing));
        assert!(!s.can_merge(&req(r#"{"id":2}"#), &existing));
        assert!(s.can_merge(&req(r#"{"id":2}"#), &[]));
    }

    #[tokio::test]
    async fn later_fields_win() {
        let s = LastWinsMergingStrategy::default();
        let merged = s
            .merge_requests(&[req(r#"{"x":1}"#), req(r#"{"x":2,"y":5}"#), req(r#"{"x":3}"#)])
            .await
            .unwrap();
        let body: Value = serde_json::from_str(merged.body()).unwrap();
        assert_eq!(body, json!({"x": 3, "y": 5}));
    }

    #[test]
    fn nested_objects_merge_and_arrays_replace() {
        let mut base = json!({"a": {"b": 1, "c": [1, 2]}, "keep": true});
        deep_merge(&mut base, json!({"a": {"c": [9], "d": 4}, "keep": null, "gone": null}));
        assert_eq!(base, json!({"a": {"b": 1, "c": [9], "d": 4}, "keep": true}));
    }

    #[tokio::test]
    async fn merged_request_takes_last_member_settings() {
        let s = LastWinsMergingStrategy::default();
        let first = req(r#"{"x":1}"#);
        let last = QueuedRequest::new(
            "/profile",
            r#"{"x":2}"#,
            HttpMethod::Post,
            Arc::new(RequestConfig::for_priority(Priority::High)),
        );
        let merged = s.merge_requests(&[first, last]).await.unwrap();
        assert_eq!(merged.method(), HttpMethod::Post);
        assert_eq!(merged.priority(), Priority::High);
    }

    #[tokio::test]
    async fn unparseable_payload_falls_back_to_last_body() {
        let s = LastWinsMergingStrategy::default();
        let merged = s.merge_requests(&[req("garbage"), req(r#"{"x":2}"#)]).await.unwrap();
        assert_eq!(merged.body(), r#"{"x":2}"#);
    }

    #[tokio::test]
    async fn single_request_is_returned_unchanged() {
        let s = LastWinsMergingStrategy::default();
        let only = req(r#"{"x":1}"#);
        let merged = s.merge_requests(std::slice::from_ref(&only)).await.unwrap();
        assert_eq!(merged.id(), only.id());
        assert!(matches!(s.merge_requests(&[]).await, Err(SchedulerError::EmptyMerge)));
    }

    #[tokio::test]
    async fn every_original_gets_the_shared_outcome() {
        let s = LastWinsMergingStrategy::default();
        let (sink_a, ticket_a) = ResponseSink::channel(Default::default());
        let (sink_b, ticket_b) = ResponseSink::channel(Default::default());
        let originals = vec![req("{}").with_sink(sink_a), req("{}").with_sink(sink_b)];

        s.process_merged_response(&originals, &Ok(Response::new("done", 200))).await;
        assert_eq!(ticket_a.await.unwrap().body, "done");
        assert_eq!(ticket_b.await.unwrap().body, "done");
    }
}
