//! Bounded-concurrency dispatch with exponential-backoff retry.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::Instrument;

use super::request::{QueuedRequest, RequestOutcome, Response};
use crate::error::{FailureKind, RequestFailure};
use crate::telemetry::{DispatchSpan, SchedulerMetrics, SpanExt};
use crate::transport::{ErrorClass, Transport, TransportRequest, TransportResponse};

/// Classified result of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendResult {
    Success { body: String, status: u16 },
    RateLimited { status: u16, message: String },
    NetworkError { message: String },
    Timeout { message: String },
    ServerError { status: u16, message: String },
    ClientError { status: u16, message: String },
    Unknown { status: u16, message: String },
}

impl SendResult {
    pub fn from_response(resp: TransportResponse) -> Self {
        let message = || resp.error.clone().unwrap_or_else(|| resp.body.clone());
        if resp.success {
            return Self::Success { body: resp.body, status: resp.status };
        }
        match resp.error_class {
            ErrorClass::RateLimited => Self::RateLimited { status: resp.status, message: message() },
            ErrorClass::Network => Self::NetworkError { message: message() },
            ErrorClass::Timeout => Self::Timeout { message: message() },
            ErrorClass::Server => Self::ServerError { status: resp.status, message: message() },
            ErrorClass::Client => Self::ClientError { status: resp.status, message: message() },
            ErrorClass::None | ErrorClass::Unknown => {
                Self::Unknown { status: resp.status, message: message() }
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        Some(match self {
            Self::Success { .. } => return None,
            Self::RateLimited { .. } => FailureKind::RateLimited,
            Self::NetworkError { .. } => FailureKind::Network,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::ServerError { .. } => FailureKind::Server,
            Self::ClientError { .. } => FailureKind::Client,
            Self::Unknown { .. } => FailureKind::Unknown,
        })
    }

    pub fn into_outcome(self) -> RequestOutcome {
        match self {
            Self::Success { body, status } => Ok(Response::new(body, status)),
            Self::RateLimited { status, message } => {
                Err(RequestFailure::new(FailureKind::RateLimited, status, message))
            }
            Self::NetworkError { message } => Err(RequestFailure::new(FailureKind::Network, 0, message)),
            Self::Timeout { message } => Err(RequestFailure::new(FailureKind::Timeout, 0, message)),
            Self::ServerError { status, message } => {
                Err(RequestFailure::new(FailureKind::Server, status, message))
            }
            Self::ClientError { status, message } => {
                Err(RequestFailure::new(FailureKind::Client, status, message))
            }
            Self::Unknown { status, message } => {
                Err(RequestFailure::new(FailureKind::Unknown, status, message))
            }
        }
    }
}

/// Final result of `send` plus how many wire attempts it took.
#[derive(Debug, Clone)]
pub struct SendReport {
    pub result: SendResult,
    pub attempts: u32,
}

#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub max_concurrent: usize,
    /// Prepended to endpoints that are not absolute URLs.
    pub base_url: String,
    pub request_timeout: Duration,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            base_url: String::new(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Decrements the active count when dropped.
struct ActiveGuard<'a> {
    active: &'a AtomicUsize,
    metrics: &'a SchedulerMetrics,
}

impl<'a> ActiveGuard<'a> {
    fn new(active: &'a AtomicUsize, metrics: &'a SchedulerMetrics) -> Self {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        metrics.set_in_flight(now);
        Self { active, metrics }
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        let now = self.active.fetch_sub(1, Ordering::SeqCst) - 1;
        self.metrics.set_in_flight(now);
    }
}

pub struct RequestSender {
    transport: Arc<dyn Transport>,
    semaphore: Semaphore,
    active: AtomicUsize,
    config: SenderConfig,
    metrics: Arc<SchedulerMetrics>,
}

impl RequestSender {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: SenderConfig,
        metrics: Arc<SchedulerMetrics>,
    ) -> Self {
        Self {
            transport,
            semaphore: Semaphore::new(config.max_concurrent.max(1)),
            active: AtomicUsize::new(0),
            config,
            metrics,
        }
    }

    /// Dispatches currently on the wire or waiting out a backoff.
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Send under the concurrency bound, retrying in place.
    ///
    /// Attempts continue from `req.retry_count()` while it is below the
    /// policy's `max_retries`, sleeping `retry_delay * 2^retry` in between.
    /// A rate-limited result is returned at once so the caller can back off
    /// globally.
    pub async fn send(&self, req: &QueuedRequest) -> SendReport {
        let span = DispatchSpan::new(req);
        let report = self.send_with_retry(req).instrument(span.clone()).await;
        span.record("attempts", report.attempts);
        span.record_result(&report.result.clone().into_outcome());
        report
    }

    async fn send_with_retry(&self, req: &QueuedRequest) -> SendReport {
        let _permit = match self.semaphore.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                return SendReport {
                    result: SendResult::Unknown { status: 0, message: "sender closed".into() },
                    attempts: 0,
                }
            }
        };
        let _active = ActiveGuard::new(&self.active, &self.metrics);

        let max_retries = req.config().max_retries;
        let mut retry = req.retry_count();
        let mut attempts = 0;
        loop {
            attempts += 1;
            let result = self.attempt(req).await;
            if result.is_success() || result.is_rate_limited() || retry >= max_retries {
                return SendReport { result, attempts };
            }

            let delay = backoff_delay(req.config().retry_delay, retry);
            tracing::warn!(
                request_id = %req.id(),
                endpoint = req.endpoint(),
                attempt = attempts,
                retry = retry + 1,
                max_retries,
                delay_ms = delay.as_millis() as u64,
                kind = ?result.failure_kind(),
                "Dispatch failed, retrying"
            );
            self.metrics.record_retry(req.endpoint(), retry + 1);
            tokio::time::sleep(delay).await;
            retry += 1;
        }
    }

    /// One attempt, no semaphore, no retry.
    pub async fn send_immediate(&self, req: &QueuedRequest) -> SendResult {
        let span = DispatchSpan::new(req);
        let _active = ActiveGuard::new(&self.active, &self.metrics);
        let result = self.attempt(req).instrument(span.clone()).await;
        span.record("attempts", 1u32);
        span.record_result(&result.clone().into_outcome());
        result
    }

    async fn attempt(&self, req: &QueuedRequest) -> SendResult {
        let timeout = req.config().timeout.unwrap_or(self.config.request_timeout);
        let request = TransportRequest::new(req.method(), self.url_for(req.endpoint()), req.body())
            .with_timeout(timeout)
            .header("X-Request-Id", req.id().as_str());

        let started = Instant::now();
        let response = match tokio::time::timeout(timeout, self.transport.send(request)).await {
            Ok(resp) => resp,
            Err(_) => TransportResponse::timeout(format!("no response within {timeout:?}")),
        };
        let result = SendResult::from_response(response);

        match result.failure_kind() {
            None => self.metrics.record_dispatch_success(req.endpoint(), started.elapsed()),
            Some(kind) => {
                tracing::debug!(request_id = %req.id(), kind = %kind, "Dispatch attempt failed");
                self.metrics.record_dispatch_failure(req.endpoint(), kind);
            }
        }
        result
    }

    fn url_for(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return endpoint.to_string();
        }
        format!("{}{}", self.config.base_url.trim_end_matches('/'), endpoint)
    }
}

/// `base * 2^retry`, saturating.
pub fn backoff_delay(base: Duration, retry: u32) -> Duration {
    let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
    base.saturating_mul(factor)
}

#[cfg(test)]
#[path = "sender_tests.rs"]
mod tests;
