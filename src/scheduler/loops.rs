//! Processing loops and dispatch continuations.
//!
//! Four loops share one cancellation token: queue drain, batch/merge flush,
//! rate-limiter tick and network watch. A panicking tick is logged and the
//! loop carries on with the next one. Dispatches run as their own tasks so a
//! slow wire call never delays admission.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::batching::BatchingStrategy;
use super::manager::{BatchBuffer, Flush, MergeBuffer, Shared};
use super::merging::MergingStrategy;
use super::request::QueuedRequest;
use crate::error::{FailureKind, RequestFailure};

pub(super) fn spawn_loops(shared: Arc<Shared>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
    let monitor = shared.network.clone();
    let monitor_cancel = cancel.clone();
    vec![
        tokio::spawn(queue_loop(shared.clone(), cancel.clone())),
        tokio::spawn(batch_loop(shared.clone(), cancel.clone())),
        tokio::spawn(rate_loop(shared.clone(), cancel.clone())),
        tokio::spawn(network_loop(shared, cancel)),
        tokio::spawn(async move { monitor.start_monitoring(monitor_cancel).await }),
    ]
}

/// Run `tick` every `period` until cancelled.
async fn run_periodic<F>(name: &'static str, period: Duration, cancel: CancellationToken, mut tick: F)
where
    F: FnMut(),
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!(loop_name = name, "loop stopped");
                break;
            }
            _ = ticker.tick() => {
                if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(&mut tick)) {
                    tracing::error!(loop_name = name, panic = panic_message(&*panic), "Loop tick panicked");
                }
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

async fn queue_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    let period = shared.config.process_interval;
    run_periodic("queue", period, cancel, || queue_tick(&shared)).await;
}

async fn batch_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    let period = shared.config.batch_interval;
    run_periodic("batch", period, cancel, || batch_tick(&shared)).await;
}

async fn rate_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    let period = shared.config.stats_interval;
    run_periodic("rate", period, cancel, || rate_tick(&shared)).await;
}

/// Replays the offline store on every transition to online.
async fn network_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    let mut rx = shared.network.subscribe();
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    tracing::warn!("network monitor closed its channel");
                    break;
                }
                let online = *rx.borrow_and_update();
                if !online {
                    tracing::info!("Offline, new requests will be mirrored to the offline store");
                    continue;
                }
                match AssertUnwindSafe(shared.replay_offline(false)).catch_unwind().await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => tracing::error!(error = %e, "Offline replay failed"),
                    Err(panic) => {
                        tracing::error!(panic = panic_message(&*panic), "Offline replay panicked");
                    }
                }
            }
        }
    }
}

/// Hand at most one queued request to the sender.
fn queue_tick(shared: &Arc<Shared>) {
    if !shared.can_process() {
        return;
    }
    let next = {
        let mut state = shared.state.lock();
        if state.queue.is_empty() || !state.rate_limiter.can_send() {
            return;
        }
        let next = state.queue.pop();
        if next.is_some() {
            state.rate_limiter.record_send();
        }
        next
    };
    if let Some(req) = next {
        shared.spawn_tracked(dispatch_queued(shared.clone(), req));
    }
}

/// Flush every buffer its strategy says is ready, while the limiter allows.
fn batch_tick(shared: &Arc<Shared>) {
    if !shared.can_process() {
        return;
    }
    let now = Instant::now();
    let flushes = {
        let mut guard = shared.state.lock();
        let state = &mut *guard;
        let due_batches: Vec<String> = state
            .batches
            .iter()
            .filter(|(_, b)| b.strategy.should_send_batch(&b.requests, b.opened_at))
            .map(|(key, _)| key.clone())
            .collect();
        let due_merges: Vec<String> = state
            .merges
            .iter()
            .filter(|(_, m)| {
                !m.requests.is_empty()
                    && now.saturating_duration_since(m.opened_at) >= m.strategy.max_merge_delay()
            })
            .map(|(key, _)| key.clone())
            .collect();

        let mut flushes = Vec::new();
        for key in due_batches {
            if !state.rate_limiter.can_send() {
                break;
            }
            if let Some(mut buffer) = state.batches.remove(&key) {
                let overflow = buffer.split_overflow();
                if !overflow.is_empty() {
                    // Still due, so the rest goes out on the next tick.
                    let rest = BatchBuffer {
                        strategy: buffer.strategy.clone(),
                        requests: overflow,
                        opened_at: buffer.opened_at,
                    };
                    state.batches.insert(key.clone(), rest);
                }
                state.rate_limiter.record_send();
                flushes.push(Flush::Batch(key, buffer));
            }
        }
        for key in due_merges {
            if !state.rate_limiter.can_send() {
                break;
            }
            if let Some(buffer) = state.merges.remove(&key) {
                state.rate_limiter.record_send();
                flushes.push(Flush::Merge(key, buffer));
            }
        }
        flushes
    };
    for flush in flushes {
        shared.spawn_tracked(dispatch_flush(shared.clone(), flush));
    }
}

/// Age the limiter windows and publish statistics.
fn rate_tick(shared: &Arc<Shared>) {
    shared.state.lock().rate_limiter.update(Instant::now());
    let stats = shared.statistics();
    shared.metrics.set_queue_depth(stats.queued);
    shared.stats_tx.send_replace(stats);
}

/// Queue path: rate limit re-queues without counting a retry, failures with
/// retries left re-queue a derived copy, anything else is terminal.
pub(super) async fn dispatch_queued(shared: Arc<Shared>, req: QueuedRequest) {
    tracing::debug!(request_id = %req.id(), endpoint = req.endpoint(), priority = %req.priority(), "Sending request");
    let report = shared.sender.send(&req).await;

    if report.result.is_rate_limited() {
        shared.activate_cooldown(req.endpoint());
        shared.requeue(req);
        return;
    }

    let used = req.retry_count() + report.attempts.saturating_sub(1);
    if !report.result.is_success() && used < req.config().max_retries {
        tracing::info!(request_id = %req.id(), retry = used + 1, "Re-queueing for retry");
        shared.requeue(req.with_retry_count(used + 1));
        return;
    }

    shared.finish(&req, report.result.into_outcome());
}

/// Critical path: one attempt, no retry, no re-queue.
pub(super) async fn dispatch_immediate(shared: Arc<Shared>, req: QueuedRequest) {
    tracing::info!(request_id = %req.id(), endpoint = req.endpoint(), "Sending critical request immediately");
    let result = shared.sender.send_immediate(&req).await;
    shared.finish(&req, result.into_outcome());
}

pub(super) async fn dispatch_flush(shared: Arc<Shared>, flush: Flush) {
    match flush {
        Flush::Batch(key, buffer) => send_batch(shared, key, buffer).await,
        Flush::Merge(key, buffer) => send_merge(shared, key, buffer).await,
    }
}

/// Fail every member the strategy left without an outcome.
fn complete_stragglers(members: &[QueuedRequest], what: &str) {
    for req in members {
        if req.complete(Err(RequestFailure::new(
            FailureKind::Unknown,
            0,
            format!("{what} produced no outcome for this request"),
        ))) {
            tracing::error!(request_id = %req.id(), "{what} left a member without an outcome");
        }
    }
}

fn fail_all(shared: &Shared, members: &[QueuedRequest], failure: RequestFailure) {
    shared.settle(members, false);
    for req in members {
        req.complete(Err(failure.clone()));
    }
}

async fn send_batch(shared: Arc<Shared>, key: String, buffer: BatchBuffer) {
    let BatchBuffer { strategy, requests, .. } = buffer;
    let size = requests.len();
    let wire = match strategy.create_batch_request(&requests).await {
        Ok(wire) => wire,
        Err(e) => {
            tracing::error!(batch_key = %key, error = %e, "Failed to build batch request");
            fail_all(&shared, &requests, RequestFailure::new(FailureKind::Parse, 0, e.to_string()));
            return;
        }
    };

    tracing::info!(
        batch_key = %key,
        endpoint = wire.endpoint(),
        batch_size = size,
        strategy = strategy.name(),
        "Sending batch"
    );
    shared.metrics.record_batch(size);
    let report = shared.sender.send(&wire).await;

    if report.result.is_rate_limited() {
        shared.activate_cooldown(wire.endpoint());
        rebuffer_batch(&shared, key, strategy, requests);
        return;
    }

    let outcome = report.result.into_outcome();
    strategy.process_batch_response(&requests, &outcome).await;
    strategy.record_batch_result(outcome.is_ok(), size);
    shared.settle(&requests, outcome.is_ok());
    complete_stragglers(&requests, strategy.name());
}

fn rebuffer_batch(
    shared: &Shared,
    key: String,
    strategy: Arc<dyn BatchingStrategy>,
    requests: Vec<QueuedRequest>,
) {
    tracing::info!(batch_key = %key, batch_size = requests.len(), "Batch rate limited, members returned to buffer");
    shared.rebuffer_batch(key, strategy, requests);
}

async fn send_merge(shared: Arc<Shared>, key: String, buffer: MergeBuffer) {
    let MergeBuffer { strategy, requests, .. } = buffer;
    let merged = match strategy.merge_requests(&requests).await {
        Ok(merged) => merged,
        Err(e) => {
            tracing::error!(merge_key = %key, error = %e, "Failed to merge requests");
            fail_all(&shared, &requests, RequestFailure::new(FailureKind::Parse, 0, e.to_string()));
            return;
        }
    };

    tracing::info!(
        merge_key = %key,
        endpoint = merged.endpoint(),
        collapsed = requests.len(),
        strategy = strategy.name(),
        "Sending merged request"
    );
    shared.metrics.record_merge(requests.len());
    let report = shared.sender.send(&merged).await;

    if report.result.is_rate_limited() {
        shared.activate_cooldown(merged.endpoint());
        rebuffer_merge(&shared, key, strategy, requests);
        return;
    }

    let outcome = report.result.into_outcome();
    strategy.process_merged_response(&requests, &outcome).await;
    shared.settle(&requests, outcome.is_ok());
    complete_stragglers(&requests, strategy.name());
}

fn rebuffer_merge(
    shared: &Shared,
    key: String,
    strategy: Arc<dyn MergingStrategy>,
    requests: Vec<QueuedRequest>,
) {
    tracing::info!(merge_key = %key, collapsed = requests.len(), "Merge rate limited, members returned to buffer");
    shared.rebuffer_merge(key, strategy, requests);
}
