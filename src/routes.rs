//! Typed routes: a compile-time pairing of request payload, response type
//! and the policy used to send it.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::error::RequestFailure;
use crate::scheduler::{HttpMethod, Priority, RequestConfig, Scheduler};

/// Where and how a route is sent. `None` overrides keep the priority's
/// policy value.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteDescriptor {
    pub path: &'static str,
    pub method: HttpMethod,
    pub priority: Priority,
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    pub retry_delay: Option<Duration>,
}

impl RouteDescriptor {
    pub const fn new(path: &'static str, method: HttpMethod, priority: Priority) -> Self {
        Self { path, method, priority, timeout: None, max_retries: None, retry_delay: None }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = Some(max_retries);
        self.retry_delay = Some(retry_delay);
        self
    }

    /// Apply the overrides on top of `base`.
    pub fn policy(&self, base: &RequestConfig) -> RequestConfig {
        let mut config = RequestConfig { priority: self.priority, ..base.clone() };
        if let Some(timeout) = self.timeout {
            config.timeout = Some(timeout);
        }
        if let Some(max_retries) = self.max_retries {
            config.max_retries = max_retries;
        }
        if let Some(retry_delay) = self.retry_delay {
            config.retry_delay = retry_delay;
        }
        config
    }
}

/// A typed endpoint.
///
/// ```ignore
/// struct SubmitScore;
///
/// impl Route for SubmitScore {
///     type Request = ScoreEntry;
///     type Response = Leaderboard;
///
///     fn descriptor() -> RouteDescriptor {
///         RouteDescriptor::new("/scores", HttpMethod::Post, Priority::High)
///     }
/// }
///
/// let board = scheduler.call::<SubmitScore>(&entry).await?;
/// ```
pub trait Route {
    type Request: Serialize + ?Sized;
    type Response: DeserializeOwned;

    fn descriptor() -> RouteDescriptor;
}

#[derive(Debug, Error)]
pub enum CallError {
    #[error("failed to encode request: {0}")]
    Encode(#[source] serde_json::Error),

    #[error(transparent)]
    Request(#[from] RequestFailure),

    #[error("failed to decode response: {0}")]
    Decode(#[source] serde_json::Error),
}

impl Scheduler {
    /// Serialize `payload`, enqueue it on `R`'s route, wait for the outcome
    /// and decode the response body.
    pub async fn call<R: Route>(&self, payload: &R::Request) -> Result<R::Response, CallError> {
        let descriptor = R::descriptor();
        let body = serde_json::to_string(payload).map_err(CallError::Encode)?;
        let base = self
            .policies()
            .get(descriptor.priority)
            .unwrap_or_else(|| Arc::new(RequestConfig::for_priority(descriptor.priority)));
        let config = Arc::new(descriptor.policy(&base));

        let response = self.enqueue(descriptor.path, body, descriptor.method, config).await?;
        serde_json::from_str(&response.body).map_err(CallError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_apply_on_top_of_policy() {
        let descriptor = RouteDescriptor::new("/profile", HttpMethod::Put, Priority::High)
            .timeout(Duration::from_secs(3))
            .retries(7, Duration::from_millis(50));
        let base = RequestConfig::for_priority(Priority::Normal);
        let config = descriptor.policy(&base);

        assert_eq!(config.priority, Priority::High);
        assert_eq!(config.timeout, Some(Duration::from_secs(3)));
        assert_eq!(config.max_retries, 7);
        assert_eq!(config.retry_delay, Duration::from_millis(50));
        assert_eq!(config.can_batch, base.can_batch);
    }

    #[test]
    fn unset_overrides_keep_policy() {
        let descriptor = RouteDescriptor::new("/ping", HttpMethod::Get, Priority::Low);
        let base = RequestConfig::for_priority(Priority::Low);
        assert_eq!(descriptor.policy(&base), base);
    }
}
