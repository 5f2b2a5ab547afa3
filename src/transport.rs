//! HTTP transport seam.
//!
//! The scheduler never speaks HTTP itself. An embedding application supplies a
//! `Transport` that puts bytes on the wire and reports status, body and an
//! error class.

use std::time::Duration;

use crate::error::FailureKind;
use crate::scheduler::HttpMethod;

/// Transport-level classification of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    None,
    Network,
    Timeout,
    /// HTTP 429.
    RateLimited,
    /// HTTP 5xx.
    Server,
    /// HTTP 4xx other than 429.
    Client,
    Unknown,
}

impl ErrorClass {
    pub fn from_status(status: u16) -> Self {
        match status {
            200..=299 => Self::None,
            429 => Self::RateLimited,
            400..=499 => Self::Client,
            500..=599 => Self::Server,
            _ => Self::Unknown,
        }
    }

    pub fn failure_kind(self) -> FailureKind {
        match self {
            Self::None | Self::Unknown => FailureKind::Unknown,
            Self::Network => FailureKind::Network,
            Self::Timeout => FailureKind::Timeout,
            Self::RateLimited => FailureKind::RateLimited,
            Self::Server => FailureKind::Server,
            Self::Client => FailureKind::Client,
        }
    }
}

/// One outbound wire call.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: HttpMethod,
    pub url: String,
    pub body: String,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

impl TransportRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            body: body.into(),
            headers: vec![("Content-Type".into(), "application/json".into())],
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// What the transport observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub success: bool,
    /// 0 when no HTTP response was received.
    pub status: u16,
    pub body: String,
    pub error_class: ErrorClass,
    pub error: Option<String>,
}

impl TransportResponse {
    /// Classify a received HTTP response by its status code.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let error_class = ErrorClass::from_status(status);
        let success = error_class == ErrorClass::None;
        Self {
            success,
            status,
            body: body.into(),
            error_class,
            error: (!success).then(|| format!("HTTP {status}")),
        }
    }

    pub fn ok(body: impl Into<String>) -> Self {
        Self::from_status(200, body)
    }

    pub fn network_error(message: impl Into<String>) -> Self {
        Self::failed(ErrorClass::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::failed(ErrorClass::Timeout, message)
    }

    fn failed(error_class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            success: false,
            status: 0,
            body: String::new(),
            error_class,
            error: Some(message.into()),
        }
    }
}

/// Puts a request on the wire.
///
/// Implementations report failures through `TransportResponse`, never by
/// panicking. A 429 must surface as `ErrorClass::RateLimited`.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> TransportResponse;
}
