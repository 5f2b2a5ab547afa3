//! The scheduler: owns every queue, buffer and limiter, routes admissions and
//! runs the processing loops.
//!
//! All mutable scheduling state sits behind one mutex (`SchedulerState`).
//! Loop ticks and dispatch continuations take it briefly and never hold it
//! across an await or while completing a caller's sink.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::batching::{BatchKeyMode, BatchingStrategy};
use super::dedup::{Deduplicator, ProcessedIds, DEFAULT_DEDUP_CACHE_SIZE, DEFAULT_PROCESSED_HISTORY};
use super::loops;
use super::merging::MergingStrategy;
use super::offline::{OfflineQueueStore, DEFAULT_OFFLINE_KEY};
use super::policy::{PolicyTable, RequestConfig};
use super::priority::{Priority, PriorityQueue};
use super::rate_limiter::{RateLimiter, RateLimits, MAX_COOLDOWN};
use super::request::{HttpMethod, QueuedRequest, RequestId, RequestOutcome, ResponseSink, Ticket};
use super::sender::{RequestSender, SenderConfig};
use super::stats::QueueStatistics;
use crate::error::{RequestFailure, SchedulerError};
use crate::network::{ManualNetworkMonitor, NetworkMonitor, ProbeNetworkMonitor, DEFAULT_CHECK_INTERVAL};
use crate::shutdown::{ShutdownCoordinator, ShutdownResult};
use crate::storage::{MemoryPersistence, Persistence};
use crate::telemetry::{MetricsSnapshot, SchedulerMetrics};
use crate::transport::Transport;

/// Offline mirroring and replay.
#[derive(Debug, Clone)]
pub struct OfflineConfig {
    pub enabled: bool,
    pub max_size: usize,
    pub key: String,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self { enabled: true, max_size: 500, key: DEFAULT_OFFLINE_KEY.to_string() }
    }
}

#[derive(Debug, Clone)]
pub struct DedupConfig {
    pub enabled: bool,
    pub cache_size: usize,
    /// Completed request ids remembered to reject resubmissions.
    pub processed_history: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_size: DEFAULT_DEDUP_CACHE_SIZE,
            processed_history: DEFAULT_PROCESSED_HISTORY,
        }
    }
}

/// Connectivity probing. Without a health URL the scheduler uses a
/// `ManualNetworkMonitor` that starts online.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub health_url: Option<String>,
    pub check_interval: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self { health_url: None, check_interval: DEFAULT_CHECK_INTERVAL }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub rate_limits: RateLimits,
    /// How long sends are suppressed after a rate-limit response, capped at
    /// `MAX_COOLDOWN`.
    pub rate_limit_cooldown: Duration,
    pub max_queue_size: usize,
    /// Queue-drain tick. One request is admitted per tick.
    pub process_interval: Duration,
    /// Batch and merge flush tick.
    pub batch_interval: Duration,
    /// Rate-limiter update and statistics tick.
    pub stats_interval: Duration,
    pub sender: SenderConfig,
    pub offline: OfflineConfig,
    pub dedup: DedupConfig,
    pub batch_key_mode: BatchKeyMode,
    pub network: NetworkConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            rate_limits: RateLimits::default(),
            rate_limit_cooldown: Duration::from_secs(60),
            max_queue_size: 1000,
            process_interval: Duration::from_millis(100),
            batch_interval: Duration::from_millis(500),
            stats_interval: Duration::from_millis(100),
            sender: SenderConfig::default(),
            offline: OfflineConfig::default(),
            dedup: DedupConfig::default(),
            batch_key_mode: BatchKeyMode::default(),
            network: NetworkConfig::default(),
        }
    }
}

pub(super) struct BatchBuffer {
    pub(super) strategy: Arc<dyn BatchingStrategy>,
    pub(super) requests: Vec<QueuedRequest>,
    pub(super) opened_at: Instant,
}

impl BatchBuffer {
    fn open(strategy: Arc<dyn BatchingStrategy>, first: QueuedRequest) -> Self {
        Self { strategy, requests: vec![first], opened_at: Instant::now() }
    }

    /// Members beyond the strategy's batch size, newest last. The buffer
    /// keeps the oldest `max_batch_size`.
    pub(super) fn split_overflow(&mut self) -> Vec<QueuedRequest> {
        let max = self.strategy.max_batch_size().max(1);
        if self.requests.len() > max {
            self.requests.split_off(max)
        } else {
            Vec::new()
        }
    }
}

pub(super) struct MergeBuffer {
    pub(super) strategy: Arc<dyn MergingStrategy>,
    pub(super) requests: Vec<QueuedRequest>,
    pub(super) opened_at: Instant,
}

impl MergeBuffer {
    fn open(strategy: Arc<dyn MergingStrategy>, first: QueuedRequest) -> Self {
        Self { strategy, requests: vec![first], opened_at: Instant::now() }
    }
}

pub(super) struct SchedulerState {
    pub(super) queue: PriorityQueue<QueuedRequest>,
    pub(super) batches: HashMap<String, BatchBuffer>,
    pub(super) merges: HashMap<String, MergeBuffer>,
    pub(super) processed: ProcessedIds,
    pub(super) dedup: Deduplicator,
    pub(super) rate_limiter: RateLimiter,
}

impl SchedulerState {
    fn pending_ids(&self) -> HashSet<RequestId> {
        let queued = self.queue.iter();
        let batched = self.batches.values().flat_map(|b| b.requests.iter());
        let merged = self.merges.values().flat_map(|m| m.requests.iter());
        queued.chain(batched).chain(merged).map(|r| r.id().clone()).collect()
    }
}

#[derive(Default)]
struct StrategyRegistry {
    batching_by_endpoint: HashMap<String, Arc<dyn BatchingStrategy>>,
    batching_by_priority: HashMap<Priority, Arc<dyn BatchingStrategy>>,
    merging_by_endpoint: HashMap<String, Arc<dyn MergingStrategy>>,
}

/// Where an admitted request goes.
enum Admission {
    Dropped,
    Attached { leader: ResponseSink, follower: ResponseSink },
    Immediate(QueuedRequest),
    Buffered { flush: Option<Flush> },
    Queued,
}

pub(super) enum Flush {
    Batch(String, BatchBuffer),
    Merge(String, MergeBuffer),
}

/// State shared between the public handle, the loops and dispatch tasks.
pub(super) struct Shared {
    pub(super) config: SchedulerConfig,
    pub(super) state: Mutex<SchedulerState>,
    strategies: RwLock<StrategyRegistry>,
    pub(super) sender: RequestSender,
    pub(super) network: Arc<dyn NetworkMonitor>,
    pub(super) offline: OfflineQueueStore,
    pub(super) policies: Arc<PolicyTable>,
    pub(super) metrics: Arc<SchedulerMetrics>,
    pub(super) shutdown: ShutdownCoordinator,
    pub(super) stats_tx: watch::Sender<QueueStatistics>,
    offline_count: AtomicUsize,
    /// Serializes mirroring into the offline store with replay and clear.
    offline_gate: tokio::sync::Mutex<()>,
}

impl Shared {
    /// Loops only hand out work while online and not cooling down.
    pub(super) fn can_process(&self) -> bool {
        self.shutdown.is_accepting()
            && self.network.is_online()
            && !self.state.lock().rate_limiter.is_cooling_down()
    }

    /// Spawn a dispatch counted by the shutdown coordinator. Once draining
    /// has begun the dispatch still runs, uncounted, so its requests get an
    /// outcome.
    pub(super) fn spawn_tracked<F>(&self, fut: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let guard = self.shutdown.track();
        if guard.is_none() {
            tracing::debug!("Dispatch spawned while draining, not counted by shutdown");
        }
        tokio::spawn(async move {
            let _guard = guard;
            fut.await;
        });
    }

    fn batching_strategy_for(&self, req: &QueuedRequest) -> Option<Arc<dyn BatchingStrategy>> {
        let registry = self.strategies.read();
        registry
            .batching_by_endpoint
            .get(req.endpoint())
            .or_else(|| registry.batching_by_priority.get(&req.priority()))
            .cloned()
    }

    fn merging_strategy_for(&self, req: &QueuedRequest) -> Option<Arc<dyn MergingStrategy>> {
        self.strategies.read().merging_by_endpoint.get(req.endpoint()).cloned()
    }

    fn batch_key(&self, req: &QueuedRequest) -> String {
        match self.config.batch_key_mode {
            BatchKeyMode::Endpoint => req.endpoint().to_string(),
            BatchKeyMode::EndpointAndPriority => format!("{}#{}", req.endpoint(), req.priority()),
        }
    }

    /// Route a new request: processed check, dedup, critical bypass, merge
    /// buffer, batch buffer, priority queue.
    pub(super) fn admit(self: &Arc<Self>, req: QueuedRequest) {
        if !self.shutdown.is_accepting() {
            req.complete(Err(RequestFailure::cancelled("scheduler is shutting down")));
            return;
        }

        let immediate = req.priority() == Priority::Critical && req.config().bypass_rate_limit;
        let merging = if immediate { None } else { self.merging_strategy_for(&req) };
        let batching = if immediate || merging.is_some() || !req.config().can_batch {
            None
        } else {
            self.batching_strategy_for(&req)
        };
        let mirror = (!immediate && self.config.offline.enabled && !self.network.is_online())
            .then(|| req.clone());

        let admission = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            self.route(state, req, immediate, merging, batching)
        };

        match admission {
            Admission::Dropped => return,
            Admission::Attached { leader, follower } => {
                self.metrics.record_dedup_hit();
                leader.attach(follower);
                return;
            }
            Admission::Immediate(req) => {
                let shared = self.clone();
                self.spawn_tracked(loops::dispatch_immediate(shared, req));
                return;
            }
            Admission::Buffered { flush: Some(flush) } => {
                let shared = self.clone();
                self.spawn_tracked(loops::dispatch_flush(shared, flush));
            }
            Admission::Buffered { flush: None } | Admission::Queued => {}
        }

        if let Some(copy) = mirror {
            let shared = self.clone();
            self.spawn_tracked(async move { shared.mirror_offline(copy).await });
        }
    }

    fn route(
        &self,
        state: &mut SchedulerState,
        req: QueuedRequest,
        immediate: bool,
        merging: Option<Arc<dyn MergingStrategy>>,
        batching: Option<Arc<dyn BatchingStrategy>>,
    ) -> Admission {
        if state.processed.contains(req.id()) {
            tracing::debug!(request_id = %req.id(), "Request already processed, skipping");
            return Admission::Dropped;
        }

        if self.config.dedup.enabled {
            if let Some(existing) = state.dedup.is_duplicate(&req) {
                tracing::debug!(
                    request_id = %req.id(),
                    leader = %existing.id(),
                    endpoint = req.endpoint(),
                    "Duplicate request attached to pending one"
                );
                return Admission::Attached {
                    leader: existing.sink().clone(),
                    follower: req.sink().clone(),
                };
            }
            state.dedup.track(&req);
        }

        if immediate {
            return Admission::Immediate(req);
        }

        if let Some(strategy) = merging {
            let key = strategy.merge_key(&req);
            let flush = match state.merges.get_mut(&key) {
                Some(buffer) if !strategy.can_merge(&req, &buffer.requests) => {
                    let full = std::mem::replace(buffer, MergeBuffer::open(strategy, req));
                    state.rate_limiter.record_send();
                    Some(Flush::Merge(key, full))
                }
                Some(buffer) => {
                    buffer.requests.push(req);
                    None
                }
                None => {
                    tracing::debug!(merge_key = %key, strategy = strategy.name(), "Merge buffer opened");
                    state.merges.insert(key, MergeBuffer::open(strategy, req));
                    None
                }
            };
            return Admission::Buffered { flush };
        }

        if let Some(strategy) = batching {
            let key = self.batch_key(&req);
            let flush = match state.batches.get_mut(&key) {
                Some(buffer) if !buffer.strategy.can_add_to_batch(&req, &buffer.requests) => {
                    let mut full = std::mem::replace(buffer, BatchBuffer::open(strategy, req));
                    let overflow = full.split_overflow();
                    if !overflow.is_empty() {
                        let newer = std::mem::replace(&mut buffer.requests, overflow);
                        buffer.requests.extend(newer);
                        buffer.opened_at = full.opened_at;
                    }
                    state.rate_limiter.record_send();
                    Some(Flush::Batch(key, full))
                }
                Some(buffer) => {
                    buffer.requests.push(req);
                    tracing::debug!(batch_key = %key, batch_size = buffer.requests.len(), "Added to batch");
                    None
                }
                None => {
                    state.batches.insert(key, BatchBuffer::open(strategy, req));
                    None
                }
            };
            return Admission::Buffered { flush };
        }

        let priority = req.priority();
        tracing::debug!(request_id = %req.id(), endpoint = req.endpoint(), %priority, "Request queued");
        let evicted = state.queue.push(req, priority);
        self.drop_evicted(state, evicted);
        Admission::Queued
    }

    /// Evicted requests are dropped; their tickets resolve as cancelled.
    pub(super) fn drop_evicted(&self, state: &mut SchedulerState, evicted: Vec<QueuedRequest>) {
        if evicted.is_empty() {
            return;
        }
        for req in &evicted {
            state.dedup.untrack(req);
        }
        tracing::warn!(
            evicted = evicted.len(),
            queue_size = state.queue.len(),
            "Priority queue full, evicted least urgent requests"
        );
        self.metrics.record_evictions(evicted.len());
    }

    /// Put a request back at the tail of its priority lane. Once shutdown
    /// has begun nothing drains the queue, so the request is cancelled.
    pub(super) fn requeue(&self, req: QueuedRequest) {
        let rejected = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if self.shutdown.is_accepting() {
                let priority = req.priority();
                let evicted = state.queue.push(req, priority);
                self.drop_evicted(state, evicted);
                self.metrics.record_requeue(priority);
                None
            } else {
                state.dedup.untrack(&req);
                Some(req)
            }
        };
        if let Some(req) = rejected {
            cancel_returned(std::slice::from_ref(&req));
        }
    }

    /// Return flushed batch members to their buffer, ahead of newer arrivals.
    /// The buffer may exceed the batch size; flushes split the overflow off.
    pub(super) fn rebuffer_batch(&self, key: String, strategy: Arc<dyn BatchingStrategy>, members: Vec<QueuedRequest>) {
        let rejected = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if !self.shutdown.is_accepting() {
                untrack_all(state, &members);
                Some(members)
            } else {
                match state.batches.get_mut(&key) {
                    Some(buffer) => {
                        let newer = std::mem::replace(&mut buffer.requests, members);
                        buffer.requests.extend(newer);
                    }
                    None => {
                        state.batches.insert(key, BatchBuffer { strategy, requests: members, opened_at: Instant::now() });
                    }
                }
                None
            }
        };
        if let Some(members) = rejected {
            cancel_returned(&members);
        }
    }

    pub(super) fn rebuffer_merge(&self, key: String, strategy: Arc<dyn MergingStrategy>, members: Vec<QueuedRequest>) {
        let rejected = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if !self.shutdown.is_accepting() {
                untrack_all(state, &members);
                Some(members)
            } else {
                match state.merges.get_mut(&key) {
                    Some(buffer) => {
                        let newer = std::mem::replace(&mut buffer.requests, members);
                        buffer.requests.extend(newer);
                    }
                    None => {
                        state.merges.insert(key, MergeBuffer { strategy, requests: members, opened_at: Instant::now() });
                    }
                }
                None
            }
        };
        if let Some(members) = rejected {
            cancel_returned(&members);
        }
    }

    pub(super) fn activate_cooldown(&self, endpoint: &str) {
        let duration = self.config.rate_limit_cooldown.min(MAX_COOLDOWN);
        self.state.lock().rate_limiter.activate_cooldown(duration);
        tracing::warn!(endpoint, cooldown_secs = duration.as_secs_f64(), "Rate limited, entering cooldown");
        self.metrics.record_cooldown(duration);
    }

    /// Bookkeeping once requests reached a terminal outcome. Successful ones
    /// are remembered as processed.
    pub(super) fn settle(&self, requests: &[QueuedRequest], success: bool) {
        let mut state = self.state.lock();
        for req in requests {
            if success {
                state.processed.insert(req.id().clone());
            }
            state.dedup.untrack(req);
        }
    }

    /// Settle and deliver a single request's outcome.
    pub(super) fn finish(&self, req: &QueuedRequest, outcome: RequestOutcome) {
        self.settle(std::slice::from_ref(req), outcome.is_ok());
        match &outcome {
            Ok(resp) => tracing::debug!(request_id = %req.id(), status = resp.status, "Request completed"),
            Err(failure) => tracing::warn!(
                request_id = %req.id(),
                endpoint = req.endpoint(),
                kind = %failure.kind,
                status = failure.status,
                "Request failed"
            ),
        }
        req.complete(outcome);
    }

    /// Persist a request admitted while offline. Skipped once connectivity
    /// is back, since replay has run or will find it pending, and once the
    /// request has an outcome.
    async fn mirror_offline(&self, req: QueuedRequest) {
        let _gate = self.offline_gate.lock().await;
        if self.network.is_online() || req.sink().is_completed() {
            tracing::debug!(request_id = %req.id(), "Offline mirror skipped");
            return;
        }
        match self.offline.save(&req).await {
            Ok(()) => {
                self.metrics.record_offline_saved();
                if let Ok(count) = self.offline.count().await {
                    self.offline_count.store(count, Ordering::Relaxed);
                }
                tracing::debug!(request_id = %req.id(), "Request mirrored to offline store");
            }
            Err(e) => tracing::warn!(request_id = %req.id(), error = %e, "Failed to save offline request"),
        }
    }

    /// Move persisted requests into the priority queue. Requests already
    /// processed or still pending are skipped. The store is cleared unless
    /// `keep_store` is set.
    pub(super) async fn replay_offline(&self, keep_store: bool) -> Result<usize, SchedulerError> {
        if !self.config.offline.enabled {
            return Ok(0);
        }
        let _gate = self.offline_gate.lock().await;
        let requests = self.offline.load_all().await?;
        let total = requests.len();
        let admitted = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let pending = state.pending_ids();
            let mut admitted = 0;
            for req in requests {
                if state.processed.contains(req.id()) || pending.contains(req.id()) {
                    continue;
                }
                let priority = req.priority();
                let evicted = state.queue.push(req, priority);
                self.drop_evicted(state, evicted);
                admitted += 1;
            }
            admitted
        };

        if keep_store {
            self.offline_count.store(total, Ordering::Relaxed);
        } else {
            self.offline.clear().await?;
            self.offline_count.store(0, Ordering::Relaxed);
        }
        if total > 0 {
            tracing::info!(loaded = total, admitted, "Replayed offline requests");
        }
        self.metrics.record_offline_replayed(admitted);
        Ok(admitted)
    }

    /// Take everything queued or buffered out of the state and resolve it as
    /// cancelled, outside the lock.
    fn cancel_pending(&self, reason: &str) -> usize {
        let dropped = {
            let mut state = self.state.lock();
            let mut dropped = state.queue.clear();
            dropped.extend(state.batches.drain().flat_map(|(_, b)| b.requests));
            dropped.extend(state.merges.drain().flat_map(|(_, m)| m.requests));
            untrack_all(&mut state, &dropped);
            dropped
        };
        for req in &dropped {
            req.complete(Err(RequestFailure::cancelled(reason)));
        }
        dropped.len()
    }

    pub(super) fn statistics(&self) -> QueueStatistics {
        let state = self.state.lock();
        QueueStatistics {
            queued: state.queue.len(),
            batched: state.batches.values().map(|b| b.requests.len()).sum(),
            merged: state.merges.values().map(|m| m.requests.len()).sum(),
            active: self.sender.active_count(),
            rate_limited: state.rate_limiter.is_cooling_down(),
            online: self.network.is_online(),
            offline_count: self.offline_count.load(Ordering::Relaxed),
            timestamp: chrono::Utc::now(),
        }
    }
}

fn untrack_all(state: &mut SchedulerState, requests: &[QueuedRequest]) {
    for req in requests {
        state.dedup.untrack(req);
    }
}

/// Resolve requests a dispatch handed back after shutdown began.
fn cancel_returned(requests: &[QueuedRequest]) {
    for req in requests {
        tracing::debug!(request_id = %req.id(), "Scheduler stopped, returned request cancelled");
        req.complete(Err(RequestFailure::cancelled("scheduler shut down")));
    }
}

/// Assembles a `Scheduler` from its collaborators.
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    transport: Arc<dyn Transport>,
    network: Option<Arc<dyn NetworkMonitor>>,
    persistence: Option<Arc<dyn Persistence>>,
    policies: PolicyTable,
    metrics: Option<Arc<SchedulerMetrics>>,
}

impl SchedulerBuilder {
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn network(mut self, network: Arc<dyn NetworkMonitor>) -> Self {
        self.network = Some(network);
        self
    }

    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn policies(mut self, policies: PolicyTable) -> Self {
        self.policies = policies;
        self
    }

    pub fn metrics(mut self, metrics: Arc<SchedulerMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Scheduler {
        let config = self.config;
        let metrics = self.metrics.unwrap_or_else(|| Arc::new(SchedulerMetrics::new()));
        let policies = Arc::new(self.policies);
        let network: Arc<dyn NetworkMonitor> = match (self.network, &config.network.health_url) {
            (Some(network), _) => network,
            (None, Some(url)) => Arc::new(ProbeNetworkMonitor::new(
                self.transport.clone(),
                url.clone(),
                config.network.check_interval,
            )),
            (None, None) => Arc::new(ManualNetworkMonitor::new(true)),
        };
        let persistence = self.persistence.unwrap_or_else(|| Arc::new(MemoryPersistence::new()));
        let offline = OfflineQueueStore::new(
            persistence,
            config.offline.key.clone(),
            config.offline.max_size,
            policies.clone(),
        );
        let sender = RequestSender::new(self.transport, config.sender.clone(), metrics.clone());
        let state = SchedulerState {
            queue: PriorityQueue::new(config.max_queue_size),
            batches: HashMap::new(),
            merges: HashMap::new(),
            processed: ProcessedIds::new(config.dedup.processed_history),
            dedup: Deduplicator::new(config.dedup.cache_size),
            rate_limiter: RateLimiter::new(config.rate_limits),
        };
        let (stats_tx, _) = watch::channel(QueueStatistics::default());

        Scheduler {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(state),
                strategies: RwLock::new(StrategyRegistry::default()),
                sender,
                network,
                offline,
                policies,
                metrics,
                shutdown: ShutdownCoordinator::new(),
                stats_tx,
                offline_count: AtomicUsize::new(0),
                offline_gate: tokio::sync::Mutex::new(()),
            }),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }
}

/// Outbound request scheduler.
///
/// Construct with [`Scheduler::builder`], register strategies, then
/// [`start`](Scheduler::start) it. Every enqueue yields exactly one outcome,
/// delivered to the returned [`Ticket`] or to the supplied callback.
/// Enqueue methods must be called from within a Tokio runtime.
pub struct Scheduler {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl Scheduler {
    pub fn builder(transport: Arc<dyn Transport>) -> SchedulerBuilder {
        SchedulerBuilder {
            config: SchedulerConfig::default(),
            transport,
            network: None,
            persistence: None,
            policies: PolicyTable::default(),
            metrics: None,
        }
    }

    /// Replay the offline store and spawn the processing loops.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        if !self.shared.shutdown.is_accepting() {
            return Err(SchedulerError::ShuttingDown);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyStarted);
        }

        // While offline the store keeps its copy until connectivity returns.
        let keep_store = !self.shared.network.is_online();
        if let Err(e) = self.shared.replay_offline(keep_store).await {
            tracing::error!(error = %e, "Failed to load offline queue");
        }

        let handles = loops::spawn_loops(self.shared.clone(), self.cancel.clone());
        self.tasks.lock().extend(handles);
        tracing::info!(
            max_queue_size = self.shared.config.max_queue_size,
            max_concurrent = self.shared.config.sender.max_concurrent,
            per_second = self.shared.config.rate_limits.per_second,
            per_minute = self.shared.config.rate_limits.per_minute,
            "Scheduler started"
        );
        Ok(())
    }

    /// Stop the loops, then wait up to `timeout` for in-flight dispatches.
    /// Requests still queued or buffered resolve as cancelled.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownResult {
        tracing::info!("Scheduler shutting down");
        self.cancel.cancel();
        let result = self.shared.shutdown.initiate(timeout).await;
        let handles = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Scheduler loop ended abnormally");
            }
        }
        let cancelled = self.shared.cancel_pending("scheduler shut down");
        tracing::info!(?result, cancelled, "Scheduler stopped");
        result
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.cancel.is_cancelled()
    }

    /// Enqueue a request and get an awaitable ticket for its outcome.
    pub fn enqueue(
        &self,
        endpoint: impl Into<String>,
        body: impl Into<String>,
        method: HttpMethod,
        config: Arc<RequestConfig>,
    ) -> Ticket {
        let req = QueuedRequest::new(endpoint, body, method, config);
        let (sink, ticket) = ResponseSink::channel(req.id().clone());
        self.submit(req.with_sink(sink));
        ticket
    }

    /// Enqueue with the policy registered for `priority`.
    pub fn enqueue_with_priority(
        &self,
        endpoint: impl Into<String>,
        body: impl Into<String>,
        method: HttpMethod,
        priority: Priority,
    ) -> Ticket {
        let config = self
            .shared
            .policies
            .get(priority)
            .unwrap_or_else(|| Arc::new(RequestConfig::for_priority(priority)));
        self.enqueue(endpoint, body, method, config)
    }

    /// Serialize `payload` as JSON and enqueue it.
    pub fn enqueue_json<T: Serialize + ?Sized>(
        &self,
        endpoint: impl Into<String>,
        payload: &T,
        method: HttpMethod,
        config: Arc<RequestConfig>,
    ) -> Result<Ticket, SchedulerError> {
        let body = serde_json::to_string(payload)?;
        Ok(self.enqueue(endpoint, body, method, config))
    }

    /// Enqueue and deliver the outcome to `callback` instead of a ticket.
    pub fn enqueue_with_callback<F>(
        &self,
        endpoint: impl Into<String>,
        body: impl Into<String>,
        method: HttpMethod,
        config: Arc<RequestConfig>,
        callback: F,
    ) -> RequestId
    where
        F: FnOnce(RequestOutcome) + Send + 'static,
    {
        let req = QueuedRequest::new(endpoint, body, method, config)
            .with_sink(ResponseSink::callback(callback));
        let id = req.id().clone();
        self.submit(req);
        id
    }

    /// Send right away: Critical priority, rate limiter bypassed, no
    /// batching and no retry.
    pub fn enqueue_critical(
        &self,
        endpoint: impl Into<String>,
        body: impl Into<String>,
        method: HttpMethod,
    ) -> Ticket {
        let base = self
            .shared
            .policies
            .get(Priority::Critical)
            .unwrap_or_else(|| Arc::new(RequestConfig::for_priority(Priority::Critical)));
        self.enqueue(endpoint, body, method, Arc::new(base.as_critical()))
    }

    /// Admit a prebuilt request, keeping its id and sink.
    pub fn submit(&self, req: QueuedRequest) {
        self.shared.admit(req);
    }

    /// Batching strategy for one endpoint. Takes precedence over
    /// per-priority registrations.
    pub fn register_batching_strategy(&self, endpoint: impl Into<String>, strategy: Arc<dyn BatchingStrategy>) {
        let endpoint = endpoint.into();
        tracing::debug!(%endpoint, strategy = strategy.name(), "Batching strategy registered");
        self.shared.strategies.write().batching_by_endpoint.insert(endpoint, strategy);
    }

    /// Batching strategy for every batchable request of `priority` without an
    /// endpoint-specific strategy.
    pub fn register_priority_batching_strategy(&self, priority: Priority, strategy: Arc<dyn BatchingStrategy>) {
        tracing::debug!(%priority, strategy = strategy.name(), "Batching strategy registered");
        self.shared.strategies.write().batching_by_priority.insert(priority, strategy);
    }

    pub fn register_merging_strategy(&self, endpoint: impl Into<String>, strategy: Arc<dyn MergingStrategy>) {
        let endpoint = endpoint.into();
        tracing::debug!(%endpoint, strategy = strategy.name(), "Merging strategy registered");
        self.shared.strategies.write().merging_by_endpoint.insert(endpoint, strategy);
    }

    pub fn statistics(&self) -> QueueStatistics {
        self.shared.statistics()
    }

    /// Snapshots published on every rate-limiter tick.
    pub fn subscribe_statistics(&self) -> watch::Receiver<QueueStatistics> {
        self.shared.stats_tx.subscribe()
    }

    /// Cancel everything queued or buffered, forget processed ids and clear
    /// the offline store.
    pub async fn clear_all(&self) -> Result<(), SchedulerError> {
        let dropped = self.shared.cancel_pending("queue cleared");
        {
            let mut state = self.shared.state.lock();
            state.processed.clear();
            state.dedup.clear();
        }
        tracing::info!(dropped, "Cleared all queues");
        let _gate = self.shared.offline_gate.lock().await;
        self.shared.offline.clear().await?;
        self.shared.offline_count.store(0, Ordering::Relaxed);
        Ok(())
    }

    /// Re-admit persisted requests now and clear the store.
    pub async fn replay_offline(&self) -> Result<usize, SchedulerError> {
        self.shared.replay_offline(false).await
    }

    pub fn is_online(&self) -> bool {
        self.shared.network.is_online()
    }

    pub fn network(&self) -> &Arc<dyn NetworkMonitor> {
        &self.shared.network
    }

    pub fn offline_store(&self) -> &OfflineQueueStore {
        &self.shared.offline
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.shared.policies
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
