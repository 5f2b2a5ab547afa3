//! Request scheduling core.
//!
//! Priority queue with eviction, sliding-window rate limiting, dedup,
//! batching and merging engines, the retrying sender, the offline store and
//! the `Scheduler` that ties them together.

pub mod batching;
mod dedup;
mod loops;
mod manager;
pub mod merging;
mod offline;
mod policy;
mod priority;
mod rate_limiter;
mod request;
mod sender;
mod stats;

pub use batching::{
    AdaptiveBatchingStrategy, BasicBatchingStrategy, BatchKeyMode, BatchingStrategy,
    PriorityAwareBatchingStrategy, SizeBasedBatchingStrategy, TimeBasedBatchingStrategy,
};
pub use dedup::{Deduplicator, ProcessedIds, DEFAULT_DEDUP_CACHE_SIZE, DEFAULT_PROCESSED_HISTORY};
pub use manager::{
    DedupConfig, NetworkConfig, OfflineConfig, Scheduler, SchedulerBuilder, SchedulerConfig,
};
pub use merging::{LastWinsMergingStrategy, MergingStrategy};
pub use offline::{OfflineQueueStore, PersistedRequest, DEFAULT_OFFLINE_KEY};
pub use policy::{PolicyTable, RequestConfig};
pub use priority::{Priority, PriorityQueue, DEFAULT_EVICTION_BATCH};
pub use rate_limiter::{RateLimiter, RateLimits, MAX_COOLDOWN};
pub use request::{
    HttpMethod, QueuedRequest, RequestId, RequestOutcome, Response, ResponseSink, Ticket,
};
pub use sender::{backoff_delay, RequestSender, SendReport, SendResult, SenderConfig};
pub use stats::QueueStatistics;
