//! Span helpers for dispatch tracing.

use tracing::{info_span, Span};

use crate::scheduler::QueuedRequest;

/// Extension trait for recording an outcome into a span.
pub trait SpanExt {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }
}

/// Factory for the span wrapping one wire dispatch.
///
/// `status`, `error.message`, `attempts` and `latency_ms` are filled in after
/// the dispatch completes.
pub struct DispatchSpan;

impl DispatchSpan {
    pub fn new(req: &QueuedRequest) -> Span {
        info_span!(
            "dispatch",
            request_id = %req.id(),
            endpoint = %req.endpoint(),
            method = %req.method(),
            priority = %req.priority(),
            retry_count = req.retry_count(),
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
            attempts = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        )
    }
}
