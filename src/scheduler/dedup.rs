//! Client-side suppression of identical in-flight requests.
//!
//! Identity is the SHA-256 of `endpoint | body`. The cache is bounded and
//! evicts strictly in insertion order.

use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet, VecDeque};

use super::request::{QueuedRequest, RequestId};

/// Default number of tracked fingerprints.
pub const DEFAULT_DEDUP_CACHE_SIZE: usize = 1000;

/// Default number of remembered completed request ids.
pub const DEFAULT_PROCESSED_HISTORY: usize = 10_000;

pub struct Deduplicator {
    tracked: HashMap<String, QueuedRequest>,
    order: VecDeque<String>,
    max_size: usize,
}

impl Deduplicator {
    pub fn new(max_size: usize) -> Self {
        Self {
            tracked: HashMap::new(),
            order: VecDeque::new(),
            max_size: max_size.max(1),
        }
    }

    /// Hex fingerprint for an endpoint/body pair.
    pub fn fingerprint(endpoint: &str, body: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(endpoint.as_bytes());
        hasher.update(b"|");
        hasher.update(body.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn key(req: &QueuedRequest) -> String {
        Self::fingerprint(req.endpoint(), req.body())
    }

    /// The tracked request with the same endpoint and body, if any.
    pub fn is_duplicate(&self, req: &QueuedRequest) -> Option<&QueuedRequest> {
        self.tracked.get(&Self::key(req))
    }

    /// Start tracking `req`. When full, the oldest fingerprint goes first.
    pub fn track(&mut self, req: &QueuedRequest) {
        let key = Self::key(req);
        if self.tracked.contains_key(&key) {
            return;
        }
        while self.tracked.len() >= self.max_size {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.tracked.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(key.clone());
        self.tracked.insert(key, req.clone());
    }

    /// Stop tracking `req`, but only if it is the request currently tracked
    /// under its fingerprint.
    pub fn untrack(&mut self, req: &QueuedRequest) {
        let key = Self::key(req);
        let owned = self
            .tracked
            .get(&key)
            .map_or(false, |existing| existing.id() == req.id());
        if owned {
            self.tracked.remove(&key);
            self.order.retain(|k| k != &key);
        }
    }

    pub fn clear(&mut self) {
        self.tracked.clear();
        self.order.clear();
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }
}

/// Ids of requests that already succeeded, so a resubmission is not sent
/// again. Bounded; the oldest id is forgotten first.
pub struct ProcessedIds {
    ids: HashSet<RequestId>,
    order: VecDeque<RequestId>,
    capacity: usize,
}

impl ProcessedIds {
    pub fn new(capacity: usize) -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn insert(&mut self, id: RequestId) {
        if self.ids.contains(&id) {
            return;
        }
        while self.ids.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.ids.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(id.clone());
        self.ids.insert(id);
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.ids.contains(id)
    }

    pub fn clear(&mut self) {
        self.ids.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
