//! Offline queue: bounded FIFO persistence of requests across connectivity
//! loss and restarts.
//!
//! The whole queue lives under one persistence key as a JSON document. Sinks
//! are not persisted; replayed requests come back detached with a policy
//! looked up by priority.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::policy::PolicyTable;
use super::priority::Priority;
use super::request::{HttpMethod, QueuedRequest, RequestId};
use crate::error::StorageError;
use crate::storage::Persistence;

/// Default persistence key.
pub const DEFAULT_OFFLINE_KEY: &str = "offline_queue";

/// Serialized form of a queued request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedRequest {
    pub request_id: RequestId,
    pub endpoint: String,
    pub body: String,
    pub method: HttpMethod,
    pub priority: Priority,
    pub queued_at: DateTime<Utc>,
    #[serde(default)]
    pub retry_count: u32,
}

impl From<&QueuedRequest> for PersistedRequest {
    fn from(req: &QueuedRequest) -> Self {
        Self {
            request_id: req.id().clone(),
            endpoint: req.endpoint().to_string(),
            body: req.body().to_string(),
            method: req.method(),
            priority: req.priority(),
            queued_at: req.created_at(),
            retry_count: req.retry_count(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedQueue {
    #[serde(default)]
    requests: Vec<PersistedRequest>,
}

pub struct OfflineQueueStore {
    persistence: Arc<dyn Persistence>,
    key: String,
    max_size: usize,
    policies: Arc<PolicyTable>,
    // Serializes read-modify-write cycles.
    lock: tokio::sync::Mutex<()>,
}

impl OfflineQueueStore {
    pub fn new(
        persistence: Arc<dyn Persistence>,
        key: impl Into<String>,
        max_size: usize,
        policies: Arc<PolicyTable>,
    ) -> Self {
        Self {
            persistence,
            key: key.into(),
            max_size: max_size.max(1),
            policies,
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    async fn read(&self) -> Result<Vec<PersistedRequest>, StorageError> {
        let Some(raw) = self.persistence.get(&self.key).await? else {
            return Ok(Vec::new());
        };
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        match serde_json::from_str::<PersistedQueue>(&raw) {
            Ok(queue) => Ok(queue.requests),
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "Discarding unreadable offline queue");
                Ok(Vec::new())
            }
        }
    }

    async fn write(&self, requests: Vec<PersistedRequest>) -> Result<(), StorageError> {
        let raw = serde_json::to_string(&PersistedQueue { requests })?;
        self.persistence.set(&self.key, &raw).await
    }

    /// Append one request. A full store drops its oldest entry first.
    pub async fn save(&self, req: &QueuedRequest) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;
        let mut records = self.read().await?;
        while records.len() >= self.max_size {
            let dropped = records.remove(0);
            tracing::warn!(
                request_id = %dropped.request_id,
                endpoint = %dropped.endpoint,
                "Offline queue full, dropping oldest request"
            );
        }
        records.push(req.into());
        self.write(records).await
    }

    /// Append requests until the store is full; the rest are dropped.
    /// Returns how many were saved.
    pub async fn save_many(&self, reqs: &[QueuedRequest]) -> Result<usize, StorageError> {
        let _guard = self.lock.lock().await;
        let mut records = self.read().await?;
        let room = self.max_size.saturating_sub(records.len());
        let saved = reqs.len().min(room);
        records.extend(reqs[..saved].iter().map(PersistedRequest::from));
        if saved < reqs.len() {
            tracing::warn!(dropped = reqs.len() - saved, "Offline queue full, dropping requests");
        }
        self.write(records).await?;
        Ok(saved)
    }

    /// Rebuild every persisted request. Entries whose priority has no policy
    /// are skipped.
    pub async fn load_all(&self) -> Result<Vec<QueuedRequest>, StorageError> {
        let _guard = self.lock.lock().await;
        let records = self.read().await?;
        let mut loaded = Vec::with_capacity(records.len());
        for record in records {
            let Some(config) = self.policies.get(record.priority) else {
                tracing::warn!(
                    request_id = %record.request_id,
                    priority = %record.priority,
                    "No policy for persisted request priority, dropping it"
                );
                continue;
            };
            loaded.push(QueuedRequest::restore(
                record.request_id,
                record.endpoint,
                record.body,
                record.method,
                record.priority,
                config,
                record.queued_at,
                record.retry_count,
            ));
        }
        Ok(loaded)
    }

    pub async fn clear(&self) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;
        self.persistence.remove(&self.key).await
    }

    /// Persisted entries, including ones `load_all` would skip.
    pub async fn count(&self) -> Result<usize, StorageError> {
        let _guard = self.lock.lock().await;
        Ok(self.read().await?.len())
    }

    pub async fn is_full(&self) -> Result<bool, StorageError> {
        Ok(self.count().await? >= self.max_size)
    }
}
