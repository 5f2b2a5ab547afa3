//! Telemetry: structured logging setup, dispatch spans and metrics.

mod logging;
mod metrics;
mod spans;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use metrics::{HistogramSummary, MetricsSnapshot, MetricsStore, SchedulerMetrics};
pub use spans::{DispatchSpan, SpanExt};

/// Metric names.
pub mod names {
    pub use super::metrics::{
        BATCHES_SENT, BATCH_SIZE, COOLDOWNS, DEDUP_HITS, DISPATCH_FAILURE, DISPATCH_LATENCY_MS,
        DISPATCH_SUCCESS, EVICTIONS, IN_FLIGHT, MERGES_SENT, OFFLINE_REPLAYED, OFFLINE_SAVED,
        QUEUE_DEPTH, REQUEUES, RETRIES,
    };
}
