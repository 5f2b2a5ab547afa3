//! Request prioritization.
//!
//! One FIFO lane per priority level. `pop` always serves the most urgent
//! non-empty lane; a full queue sheds work from the least urgent lanes.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Number of items dropped when a full queue admits a new request.
pub const DEFAULT_EVICTION_BATCH: usize = 100;

/// Priority level for outbound requests. Lower ordinal = more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Purchases, critical gameplay. Eligible for rate-limit bypass.
    Critical = 0,
    High = 1,
    Normal = 2,
    /// Analytics, telemetry.
    Low = 3,
    Batch = 4,
}

impl Priority {
    /// All levels, most urgent first.
    pub const ALL: [Priority; 5] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
        Priority::Batch,
    ];

    pub fn ordinal(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
            Self::Batch => "batch",
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

impl From<u8> for Priority {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Critical,
            1 => Self::High,
            2 => Self::Normal,
            3 => Self::Low,
            _ => Self::Batch,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bounded priority queue, FIFO within a level.
pub struct PriorityQueue<T> {
    lanes: [VecDeque<T>; 5],
    max_size: usize,
    eviction_batch: usize,
}

impl<T> PriorityQueue<T> {
    pub fn new(max_size: usize) -> Self {
        Self::with_eviction_batch(max_size, DEFAULT_EVICTION_BATCH)
    }

    pub fn with_eviction_batch(max_size: usize, eviction_batch: usize) -> Self {
        Self {
            lanes: Default::default(),
            max_size: max_size.max(1),
            eviction_batch: eviction_batch.max(1),
        }
    }

    /// Push an item. If the queue is full, first drops up to `eviction_batch`
    /// items from the least urgent lanes. Returns whatever was evicted.
    pub fn push(&mut self, item: T, priority: Priority) -> Vec<T> {
        let evicted = if self.len() >= self.max_size {
            self.drop_lowest_priority(self.eviction_batch)
        } else {
            Vec::new()
        };
        self.lanes[priority.ordinal()].push_back(item);
        evicted
    }

    /// Pop from the most urgent non-empty lane.
    pub fn pop(&mut self) -> Option<T> {
        self.lanes.iter_mut().find_map(|lane| lane.pop_front())
    }

    pub fn peek(&self) -> Option<&T> {
        self.lanes.iter().find_map(|lane| lane.front())
    }

    /// Drop up to `count` items, least urgent lane first. Critical items are
    /// only dropped when every other lane is already empty.
    pub fn drop_lowest_priority(&mut self, count: usize) -> Vec<T> {
        let mut dropped = Vec::new();
        for lane in self.lanes[1..].iter_mut().rev() {
            while dropped.len() < count {
                match lane.pop_front() {
                    Some(item) => dropped.push(item),
                    None => break,
                }
            }
            if dropped.len() >= count {
                return dropped;
            }
        }
        if dropped.is_empty() {
            let critical = &mut self.lanes[Priority::Critical.ordinal()];
            while dropped.len() < count {
                match critical.pop_front() {
                    Some(item) => dropped.push(item),
                    None => break,
                }
            }
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.lanes.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.iter().all(VecDeque::is_empty)
    }

    /// Items waiting at one priority level.
    pub fn len_at(&self, priority: Priority) -> usize {
        self.lanes[priority.ordinal()].len()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.lanes.iter().flat_map(|lane| lane.iter())
    }

    /// Remove everything, returning the drained items in dequeue order.
    pub fn clear(&mut self) -> Vec<T> {
        self.lanes.iter_mut().flat_map(|lane| lane.drain(..)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_most_urgent_first() {
        let mut q = PriorityQueue::new(16);
        q.push("low", Priority::Low);
        q.push("critical", Priority::Critical);
        q.push("batch", Priority::Batch);
        q.push("normal", Priority::Normal);

        assert_eq!(q.pop(), Some("critical"));
        assert_eq!(q.pop(), Some("normal"));
        assert_eq!(q.pop(), Some("low"));
        assert_eq!(q.pop(), Some("batch"));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn fifo_within_level() {
        let mut q = PriorityQueue::new(16);
        for i in 0..5 {
            q.push(i, Priority::High);
        }
        let order: Vec<_> = std::iter::from_fn(|| q.pop()).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn full_queue_evicts_least_urgent_lane() {
        let mut q = PriorityQueue::with_eviction_batch(4, 2);
        q.push("c1", Priority::Critical);
        q.push("n1", Priority::Normal);
        q.push("b1", Priority::Batch);
        q.push("b2", Priority::Batch);

        let evicted = q.push("h1", Priority::High);
        assert_eq!(evicted, vec!["b1", "b2"]);
        assert_eq!(q.len(), 3);
        assert_eq!(q.len_at(Priority::Critical), 1);
        assert_eq!(q.len_at(Priority::Batch), 0);
    }

    #[test]
    fn eviction_spills_upward_but_spares_critical() {
        let mut q = PriorityQueue::with_eviction_batch(4, 10);
        q.push("c1", Priority::Critical);
        q.push("c2", Priority::Critical);
        q.push("l1", Priority::Low);
        q.push("h1", Priority::High);

        let evicted = q.push("n1", Priority::Normal);
        assert_eq!(evicted, vec!["l1", "h1"]);
        assert_eq!(q.len_at(Priority::Critical), 2);
    }

    #[test]
    fn critical_evicted_only_when_nothing_else_left() {
        let mut q = PriorityQueue::with_eviction_batch(2, 1);
        q.push("c1", Priority::Critical);
        q.push("c2", Priority::Critical);

        let evicted = q.push("c3", Priority::Critical);
        assert_eq!(evicted, vec!["c1"]);
        assert_eq!(q.pop(), Some("c2"));
        assert_eq!(q.pop(), Some("c3"));
    }

    #[test]
    fn clear_drains_in_dequeue_order() {
        let mut q = PriorityQueue::new(8);
        q.push(3, Priority::Low);
        q.push(1, Priority::Critical);
        q.push(2, Priority::Normal);
        assert_eq!(q.clear(), vec![1, 2, 3]);
        assert!(q.is_empty());
    }

    #[test]
    fn priority_from_u8_saturates_to_batch() {
        assert_eq!(Priority::from(0), Priority::Critical);
        assert_eq!(Priority::from(3), Priority::Low);
        assert_eq!(Priority::from(200), Priority::Batch);
    }
}
