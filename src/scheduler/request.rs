//! Queued request type and its exactly-once outcome channel.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::policy::RequestConfig;
use super::priority::Priority;
use crate::error::RequestFailure;

/// Successful response delivered to a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub body: String,
    pub status: u16,
}

impl Response {
    pub fn new(body: impl Into<String>, status: u16) -> Self {
        Self { body: body.into(), status }
    }
}

/// What a caller eventually receives, exactly once.
pub type RequestOutcome = Result<Response, RequestFailure>;

type Callback = Box<dyn FnOnce(RequestOutcome) + Send + 'static>;

/// HTTP method of an outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

impl Default for HttpMethod {
    fn default() -> Self {
        Self::Post
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque request identifier, stable across retries and restarts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

enum SinkTarget {
    Channel(oneshot::Sender<RequestOutcome>),
    Callback(Callback),
}

enum SinkState {
    Pending {
        target: Option<SinkTarget>,
        followers: Vec<ResponseSink>,
    },
    Done(RequestOutcome),
}

/// Exactly-once delivery point for a request's outcome.
///
/// Clones share state: the first `complete` wins and later calls are no-ops.
/// Dropping every clone without completing closes the channel, which the
/// awaiting `Ticket` observes as a cancelled request.
#[derive(Clone)]
pub struct ResponseSink {
    state: Arc<Mutex<SinkState>>,
}

impl std::fmt::Debug for ResponseSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseSink")
            .field("completed", &self.is_completed())
            .finish()
    }
}

impl ResponseSink {
    fn with_target(target: Option<SinkTarget>) -> Self {
        Self {
            state: Arc::new(Mutex::new(SinkState::Pending { target, followers: Vec::new() })),
        }
    }

    /// A sink nobody listens to. Used for synthesized batch/merge requests
    /// and for requests replayed from the offline store.
    pub fn detached() -> Self {
        Self::with_target(None)
    }

    /// A sink paired with an awaitable ticket.
    pub fn channel(request_id: RequestId) -> (Self, Ticket) {
        let (tx, rx) = oneshot::channel();
        (Self::with_target(Some(SinkTarget::Channel(tx))), Ticket { request_id, rx })
    }

    pub fn callback<F>(f: F) -> Self
    where
        F: FnOnce(RequestOutcome) + Send + 'static,
    {
        Self::with_target(Some(SinkTarget::Callback(Box::new(f))))
    }

    /// Deliver the outcome. Returns false if this sink was already completed.
    pub fn complete(&self, outcome: RequestOutcome) -> bool {
        let previous = {
            let mut state = self.state.lock();
            if matches!(*state, SinkState::Done(_)) {
                return false;
            }
            std::mem::replace(&mut *state, SinkState::Done(outcome.clone()))
        };
        let SinkState::Pending { target, followers } = previous else {
            return false;
        };
        for follower in followers {
            follower.complete(outcome.clone());
        }
        match target {
            Some(SinkTarget::Channel(tx)) => {
                let _ = tx.send(outcome);
            }
            Some(SinkTarget::Callback(cb)) => cb(outcome),
            None => {}
        }
        true
    }

    /// Make `follower` receive whatever this sink receives. If this sink has
    /// already completed, the follower is completed immediately.
    pub fn attach(&self, follower: ResponseSink) {
        let done = {
            let mut state = self.state.lock();
            match &mut *state {
                SinkState::Pending { followers, .. } => {
                    followers.push(follower);
                    return;
                }
                SinkState::Done(outcome) => outcome.clone(),
            }
        };
        follower.complete(done);
    }

    pub fn is_completed(&self) -> bool {
        matches!(*self.state.lock(), SinkState::Done(_))
    }
}

/// Awaitable handle for an enqueued request.
#[derive(Debug)]
pub struct Ticket {
    request_id: RequestId,
    rx: oneshot::Receiver<RequestOutcome>,
}

impl Ticket {
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }
}

impl Future for Ticket {
    type Output = RequestOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(RequestFailure::cancelled("request dropped before completion"))
            })
        })
    }
}

/// One logical API call awaiting dispatch.
///
/// Immutable apart from the retry count, and even that only changes by
/// deriving a new value (`with_incremented_retry`). Clones share the sink.
#[derive(Clone)]
pub struct QueuedRequest {
    id: RequestId,
    endpoint: String,
    body: String,
    method: HttpMethod,
    priority: Priority,
    config: Arc<RequestConfig>,
    enqueued_at: Instant,
    created_at: DateTime<Utc>,
    retry_count: u32,
    sink: ResponseSink,
}

impl std::fmt::Debug for QueuedRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedRequest")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("method", &self.method)
            .field("priority", &self.priority)
            .field("retry_count", &self.retry_count)
            .finish()
    }
}

impl QueuedRequest {
    /// Create a request with a fresh id and a detached sink. Priority comes
    /// from the policy.
    pub fn new(
        endpoint: impl Into<String>,
        body: impl Into<String>,
        method: HttpMethod,
        config: Arc<RequestConfig>,
    ) -> Self {
        Self {
            id: RequestId::new(),
            endpoint: endpoint.into(),
            body: body.into(),
            method,
            priority: config.priority,
            config,
            enqueued_at: Instant::now(),
            created_at: Utc::now(),
            retry_count: 0,
            sink: ResponseSink::detached(),
        }
    }

    /// Rebuild a request from its persisted fields.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: RequestId,
        endpoint: String,
        body: String,
        method: HttpMethod,
        priority: Priority,
        config: Arc<RequestConfig>,
        created_at: DateTime<Utc>,
        retry_count: u32,
    ) -> Self {
        let age = (Utc::now() - created_at).to_std().unwrap_or_default();
        let now = Instant::now();
        Self {
            id,
            endpoint,
            body,
            method,
            priority,
            config,
            enqueued_at: now.checked_sub(age).unwrap_or(now),
            created_at,
            retry_count,
            sink: ResponseSink::detached(),
        }
    }

    pub fn with_sink(mut self, sink: ResponseSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// A copy for the next attempt: same id, same sink, retry count + 1.
    pub fn with_incremented_retry(&self) -> Self {
        self.with_retry_count(self.retry_count + 1)
    }

    pub(crate) fn with_retry_count(&self, retry_count: u32) -> Self {
        Self { retry_count, ..self.clone() }
    }

    pub fn id(&self) -> &RequestId {
        &self.id
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn config(&self) -> &Arc<RequestConfig> {
        &self.config
    }

    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn sink(&self) -> &ResponseSink {
        &self.sink
    }

    /// Deliver the terminal outcome to the caller. No-op after the first call.
    pub fn complete(&self, outcome: RequestOutcome) -> bool {
        self.sink.complete(outcome)
    }
}
