//! Connectivity signal consumed by the scheduler.
//!
//! A monitor exposes the current state and a `watch` channel carrying every
//! transition. The scheduler replays the offline store when it sees `true`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::scheduler::HttpMethod;
use crate::transport::{Transport, TransportRequest};

/// Default probe period.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(5);

#[async_trait::async_trait]
pub trait NetworkMonitor: Send + Sync {
    fn is_online(&self) -> bool;

    /// Receiver observing online/offline transitions.
    fn subscribe(&self) -> watch::Receiver<bool>;

    /// Run until `cancel` fires. Monitors without background work return
    /// once cancelled.
    async fn start_monitoring(&self, cancel: CancellationToken);

    /// Re-evaluate connectivity now and return the result.
    async fn check_now(&self) -> bool;
}

/// Shared state publisher used by both monitors.
#[derive(Debug)]
struct OnlineState {
    tx: watch::Sender<bool>,
}

impl OnlineState {
    fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx }
    }

    fn get(&self) -> bool {
        *self.tx.borrow()
    }

    /// Publish `online`; receivers are only woken on an actual change.
    fn set(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        });
        if changed {
            tracing::info!(online, "Network status changed");
        }
        changed
    }
}

/// Connectivity driven explicitly by the embedding application.
#[derive(Debug)]
pub struct ManualNetworkMonitor {
    state: OnlineState,
}

impl ManualNetworkMonitor {
    pub fn new(online: bool) -> Self {
        Self { state: OnlineState::new(online) }
    }

    /// Returns true if the state changed.
    pub fn set_online(&self, online: bool) -> bool {
        self.state.set(online)
    }
}

impl Default for ManualNetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait::async_trait]
impl NetworkMonitor for ManualNetworkMonitor {
    fn is_online(&self) -> bool {
        self.state.get()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.tx.subscribe()
    }

    async fn start_monitoring(&self, cancel: CancellationToken) {
        cancel.cancelled().await;
    }

    async fn check_now(&self) -> bool {
        self.state.get()
    }
}

/// Periodically GETs a health URL through the transport. Any 2xx answer
/// counts as online.
pub struct ProbeNetworkMonitor {
    transport: Arc<dyn Transport>,
    health_url: String,
    interval: Duration,
    timeout: Duration,
    state: OnlineState,
}

impl ProbeNetworkMonitor {
    pub fn new(transport: Arc<dyn Transport>, health_url: impl Into<String>, interval: Duration) -> Self {
        Self {
            transport,
            health_url: health_url.into(),
            interval: interval.max(Duration::from_millis(100)),
            timeout: Duration::from_secs(5),
            state: OnlineState::new(true),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn probe(&self) -> bool {
        let request = TransportRequest::new(HttpMethod::Get, self.health_url.clone(), "")
            .with_timeout(self.timeout);
        match tokio::time::timeout(self.timeout, self.transport.send(request)).await {
            Ok(resp) => (200..300).contains(&resp.status),
            Err(_) => false,
        }
    }
}

#[async_trait::async_trait]
impl NetworkMonitor for ProbeNetworkMonitor {
    fn is_online(&self) -> bool {
        self.state.get()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.tx.subscribe()
    }

    async fn start_monitoring(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::debug!(url = %self.health_url, "network probe stopped");
                    break;
                }
                _ = ticker.tick() => {
                    self.check_now().await;
                }
            }
        }
    }

    async fn check_now(&self) -> bool {
        let online = self.probe().await;
        self.state.set(online);
        online
    }
}
