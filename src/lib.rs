//! reqflow
//!
//! A client-side outbound request scheduler. Application API calls are
//! accepted, held and put on the wire at a pace the backend tolerates, and
//! every caller receives exactly one outcome.
//!
//! # Pieces
//!
//! - **Priority queue**: five lanes, FIFO within a lane, least urgent traffic
//!   evicted first under pressure
//! - **Rate limiter**: per-second and per-minute sliding windows plus a global
//!   cooldown after a 429
//! - **Batching and merging**: pluggable strategies that collapse many calls
//!   into one wire request and route the single result back
//! - **Sender**: bounded concurrency, per-attempt timeout, exponential backoff
//! - **Offline store**: requests made while offline are persisted and replayed
//!   when connectivity returns
//!
//! The HTTP client, connectivity source and persistence backend are supplied
//! by the embedding application through the [`Transport`],
//! [`NetworkMonitor`](network::NetworkMonitor) and
//! [`Persistence`](storage::Persistence) traits.

pub mod config;
pub mod error;
pub mod network;
pub mod routes;
pub mod scheduler;
pub mod shutdown;
pub mod storage;
pub mod telemetry;
pub mod transport;

use std::sync::Arc;

pub use config::EnvConfig;
pub use error::{FailureKind, RequestFailure, SchedulerError, StorageError};
pub use routes::{CallError, Route, RouteDescriptor};
pub use scheduler::{
    HttpMethod, Priority, QueueStatistics, RequestConfig, Response, Scheduler, SchedulerConfig, Ticket,
};
pub use shutdown::ShutdownResult;
pub use transport::{Transport, TransportRequest, TransportResponse};

use storage::FilePersistence;

/// Build a scheduler from `REQFLOW_*` environment variables.
///
/// The offline queue is persisted as JSON files under the configured offline
/// directory and policies come from the policy file when one is set. The
/// loaded configuration is returned alongside so callers can reuse the log
/// settings and shutdown timeout.
pub fn scheduler_from_env(transport: Arc<dyn Transport>) -> Result<(Scheduler, EnvConfig), SchedulerError> {
    let env = config::load();
    let policies = env.policies()?;
    let scheduler = Scheduler::builder(transport)
        .config(env.scheduler.clone())
        .persistence(Arc::new(FilePersistence::new(env.offline_dir.clone())))
        .policies(policies)
        .build();
    tracing::debug!(config = ?env.effective_config(), "Scheduler configured from environment");
    Ok((scheduler, env))
}
