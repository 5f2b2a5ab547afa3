//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use reqflow::{Transport, TransportRequest, TransportResponse};

/// A recorded wire call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub at: Instant,
    pub request: TransportRequest,
}

/// Answers from a script, then repeats the fallback. Optional per-call delay.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<TransportResponse>>,
    fallback: TransportResponse,
    delay: Duration,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<TransportResponse>, fallback: TransportResponse) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn always(response: TransportResponse) -> Arc<Self> {
        Self::new(Vec::new(), response)
    }

    pub fn slow(response: TransportResponse, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: response,
            delay,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.request.url.clone()).collect()
    }
}

#[async_trait::async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: TransportRequest) -> TransportResponse {
        self.calls.lock().push(RecordedCall { at: Instant::now(), request });
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}
