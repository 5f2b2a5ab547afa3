//! Scheduler metrics.
//!
//! Every observation goes to the `metrics` facade (no exporter is installed
//! here) and to a local `MetricsStore` so the embedding application can read
//! a snapshot without one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::FailureKind;
use crate::scheduler::Priority;

/// Snapshot of all metrics at a point in time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub counters: HashMap<String, u64>,
    pub gauges: HashMap<String, f64>,
    pub histograms: HashMap<String, HistogramSummary>,
}

impl MetricsSnapshot {
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.gauges.get(name).copied()
    }
}

/// Summary statistics for a histogram.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Copy)]
struct Histogram {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl Histogram {
    fn new() -> Self {
        Self { count: 0, sum: 0.0, min: f64::MAX, max: f64::MIN }
    }

    fn record(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    fn summary(&self) -> HistogramSummary {
        let empty = self.count == 0;
        HistogramSummary {
            count: self.count,
            sum: self.sum,
            min: if empty { 0.0 } else { self.min },
            max: if empty { 0.0 } else { self.max },
        }
    }
}

/// Thread-safe local metrics storage.
#[derive(Default)]
pub struct MetricsStore {
    counters: RwLock<HashMap<String, AtomicU64>>,
    gauges: RwLock<HashMap<String, f64>>,
    histograms: RwLock<HashMap<String, Histogram>>,
}

impl MetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_counter(&self, name: &str, value: u64) {
        if let Some(counter) = self.counters.read().get(name) {
            counter.fetch_add(value, Ordering::Relaxed);
            return;
        }
        self.counters
            .write()
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(value, Ordering::Relaxed);
    }

    pub fn set_gauge(&self, name: &str, value: f64) {
        self.gauges.write().insert(name.to_string(), value);
    }

    pub fn record_histogram(&self, name: &str, value: f64) {
        self.histograms
            .write()
            .entry(name.to_string())
            .or_insert_with(Histogram::new)
            .record(value);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self
                .counters
                .read()
                .iter()
                .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
                .collect(),
            gauges: self.gauges.read().clone(),
            histograms: self.histograms.read().iter().map(|(k, v)| (k.clone(), v.summary())).collect(),
        }
    }
}

pub const DISPATCH_SUCCESS: &str = "reqflow_dispatch_success_total";
pub const DISPATCH_FAILURE: &str = "reqflow_dispatch_failure_total";
pub const DISPATCH_LATENCY_MS: &str = "reqflow_dispatch_latency_ms";
pub const RETRIES: &str = "reqflow_retries_total";
pub const REQUEUES: &str = "reqflow_requeues_total";
pub const EVICTIONS: &str = "reqflow_evictions_total";
pub const COOLDOWNS: &str = "reqflow_cooldowns_total";
pub const BATCHES_SENT: &str = "reqflow_batches_sent_total";
pub const BATCH_SIZE: &str = "reqflow_batch_size";
pub const MERGES_SENT: &str = "reqflow_merges_sent_total";
pub const DEDUP_HITS: &str = "reqflow_dedup_hits_total";
pub const OFFLINE_SAVED: &str = "reqflow_offline_saved_total";
pub const OFFLINE_REPLAYED: &str = "reqflow_offline_replayed_total";
pub const QUEUE_DEPTH: &str = "reqflow_queue_depth";
pub const IN_FLIGHT: &str = "reqflow_in_flight";

/// Metrics recorder shared by the scheduler, the sender and the loops.
#[derive(Default)]
pub struct SchedulerMetrics {
    store: MetricsStore,
}

impl SchedulerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.store.snapshot()
    }

    pub fn record_dispatch_success(&self, endpoint: &str, latency: Duration) {
        let ms = latency.as_secs_f64() * 1000.0;
        metrics::counter!(DISPATCH_SUCCESS, "endpoint" => endpoint.to_string()).increment(1);
        metrics::histogram!(DISPATCH_LATENCY_MS, "endpoint" => endpoint.to_string()).record(ms);
        self.store.increment_counter(DISPATCH_SUCCESS, 1);
        self.store.record_histogram(DISPATCH_LATENCY_MS, ms);
    }

    pub fn record_dispatch_failure(&self, endpoint: &str, kind: FailureKind) {
        metrics::counter!(
            DISPATCH_FAILURE,
            "endpoint" => endpoint.to_string(),
            "kind" => kind.as_str()
        )
        .increment(1);
        self.store.increment_counter(DISPATCH_FAILURE, 1);
        self.store
            .increment_counter(&format!("{DISPATCH_FAILURE}.{}", kind.as_str()), 1);
    }

    pub fn record_retry(&self, endpoint: &str, attempt: u32) {
        metrics::counter!(RETRIES, "endpoint" => endpoint.to_string()).increment(1);
        self.store.increment_counter(RETRIES, 1);
        tracing::trace!(endpoint, attempt, "retry recorded");
    }

    pub fn record_requeue(&self, priority: Priority) {
        metrics::counter!(REQUEUES, "priority" => priority.as_str()).increment(1);
        self.store.increment_counter(REQUEUES, 1);
    }

    pub fn record_evictions(&self, count: usize) {
        if count == 0 {
            return;
        }
        metrics::counter!(EVICTIONS).increment(count as u64);
        self.store.increment_counter(EVICTIONS, count as u64);
    }

    pub fn record_cooldown(&self, duration: Duration) {
        metrics::counter!(COOLDOWNS).increment(1);
        self.store.increment_counter(COOLDOWNS, 1);
        tracing::trace!(secs = duration.as_secs_f64(), "cooldown recorded");
    }

    pub fn record_batch(&self, size: usize) {
        metrics::counter!(BATCHES_SENT).increment(1);
        metrics::histogram!(BATCH_SIZE).record(size as f64);
        self.store.increment_counter(BATCHES_SENT, 1);
        self.store.record_histogram(BATCH_SIZE, size as f64);
    }

    pub fn record_merge(&self, collapsed: usize) {
        metrics::counter!(MERGES_SENT).increment(1);
        self.store.increment_counter(MERGES_SENT, 1);
        self.store.record_histogram("reqflow_merge_size", collapsed as f64);
    }

    pub fn record_dedup_hit(&self) {
        metrics::counter!(DEDUP_HITS).increment(1);
        self.store.increment_counter(DEDUP_HITS, 1);
    }

    pub fn record_offline_saved(&self) {
        metrics::counter!(OFFLINE_SAVED).increment(1);
        self.store.increment_counter(OFFLINE_SAVED, 1);
    }

    pub fn record_offline_replayed(&self, count: usize) {
        metrics::counter!(OFFLINE_REPLAYED).increment(count as u64);
        self.store.increment_counter(OFFLINE_REPLAYED, count as u64);
    }

    pub fn set_queue_depth(&self, depth: usize) {
        metrics::gauge!(QUEUE_DEPTH).set(depth as f64);
        self.store.set_gauge(QUEUE_DEPTH, depth as f64);
    }

    pub fn set_in_flight(&self, count: usize) {
        metrics::gauge!(IN_FLIGHT).set(count as f64);
        self.store.set_gauge(IN_FLIGHT, count as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_tracks_counters_gauges_histograms() {
        let store = MetricsStore::new();
        store.increment_counter("a", 2);
        store.increment_counter("a", 3);
        store.set_gauge("g", 1.5);
        store.record_histogram("h", 4.0);
        store.record_histogram("h", 2.0);

        let snap = store.snapshot();
        assert_eq!(snap.counter("a"), 5);
        assert_eq!(snap.gauge("g"), Some(1.5));
        let h = &snap.histograms["h"];
        assert_eq!((h.count, h.min, h.max, h.sum), (2, 2.0, 4.0, 6.0));
    }

    #[test]
    fn failures_are_counted_by_kind() {
        let m = SchedulerMetrics::new();
        m.record_dispatch_failure("/x", FailureKind::Server);
        m.record_dispatch_failure("/x", FailureKind::Timeout);
        m.record_evictions(0);

        let snap = m.snapshot();
        assert_eq!(snap.counter(DISPATCH_FAILURE), 2);
        assert_eq!(snap.counter("reqflow_dispatch_failure_total.server"), 1);
        assert_eq!(snap.counter(EVICTIONS), 0);
    }
}
