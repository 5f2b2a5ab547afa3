//! Rate limiter windows, cooldown and priority queue eviction.

use std::time::Duration;

use tokio::time::Instant;

use reqflow::scheduler::{PriorityQueue, RateLimiter, RateLimits};
use reqflow::Priority;

#[tokio::test(start_paused = true)]
async fn test_per_second_cap_until_window_ages() {
    let mut limiter = RateLimiter::new(RateLimits { per_second: 3, per_minute: 100 });
    for _ in 0..3 {
        assert!(limiter.can_send());
        limiter.record_send();
    }
    assert!(!limiter.can_send());

    tokio::time::advance(Duration::from_millis(999)).await;
    limiter.update(Instant::now());
    assert!(!limiter.can_send());

    tokio::time::advance(Duration::from_millis(1)).await;
    limiter.update(Instant::now());
    assert!(limiter.can_send());
    assert_eq!(limiter.window_counts(), (0, 3));
}

#[tokio::test(start_paused = true)]
async fn test_per_minute_cap_outlives_second_window() {
    let mut limiter = RateLimiter::new(RateLimits { per_second: 10, per_minute: 4 });
    for _ in 0..4 {
        limiter.record_send();
        tokio::time::advance(Duration::from_secs(2)).await;
        limiter.update(Instant::now());
    }
    assert!(!limiter.can_send());

    tokio::time::advance(Duration::from_secs(53)).await;
    limiter.update(Instant::now());
    assert!(limiter.can_send());
}

#[tokio::test(start_paused = true)]
async fn test_cooldown_blocks_for_full_duration() {
    let mut limiter = RateLimiter::new(RateLimits::default());
    limiter.activate_cooldown(Duration::from_secs(2));
    assert!(limiter.is_cooling_down());
    assert!(!limiter.can_send());

    tokio::time::advance(Duration::from_millis(1999)).await;
    limiter.update(Instant::now());
    assert!(!limiter.can_send());
    assert_eq!(limiter.cooldown_remaining(Instant::now()), Some(Duration::from_millis(1)));

    tokio::time::advance(Duration::from_millis(1)).await;
    limiter.update(Instant::now());
    assert!(!limiter.is_cooling_down());
    assert!(limiter.can_send());
}

#[test]
fn test_eviction_takes_least_urgent_lane_first() {
    let mut queue = PriorityQueue::with_eviction_batch(4, 1);
    queue.push("purchase", Priority::Critical);
    queue.push("save", Priority::High);
    queue.push("telemetry-1", Priority::Batch);
    queue.push("telemetry-2", Priority::Batch);

    let evicted = queue.push("profile", Priority::Normal);
    assert_eq!(evicted, vec!["telemetry-1"]);
    assert_eq!(queue.len_at(Priority::Batch), 1);
    assert_eq!(queue.len_at(Priority::Critical), 1);
}

#[test]
fn test_default_eviction_clears_up_to_a_full_batch() {
    let mut queue = PriorityQueue::new(3);
    queue.push(1, Priority::Critical);
    queue.push(2, Priority::Low);
    queue.push(3, Priority::Low);

    let evicted = queue.push(4, Priority::High);
    assert_eq!(evicted, vec![2, 3]);
    assert_eq!(queue.pop(), Some(1));
    assert_eq!(queue.pop(), Some(4));
    assert!(queue.is_empty());
}

#[test]
fn test_critical_evicted_only_when_nothing_else_is_left() {
    let mut queue = PriorityQueue::with_eviction_batch(2, 1);
    queue.push("first", Priority::Critical);
    queue.push("second", Priority::Critical);

    let evicted = queue.push("third", Priority::Critical);
    assert_eq!(evicted, vec!["first"]);
    assert_eq!(queue.pop(), Some("second"));
    assert_eq!(queue.pop(), Some("third"));
}

#[test]
fn test_dequeue_respects_priority_then_fifo() {
    let mut queue = PriorityQueue::new(100);
    let arrivals = [
        (Priority::Low, "l1"),
        (Priority::High, "h1"),
        (Priority::Batch, "b1"),
        (Priority::High, "h2"),
        (Priority::Critical, "c1"),
        (Priority::Normal, "n1"),
        (Priority::Low, "l2"),
    ];
    for (priority, item) in arrivals {
        queue.push(item, priority);
    }

    let mut order = Vec::new();
    while let Some(item) = queue.pop() {
        order.push(item);
    }
    assert_eq!(order, vec!["c1", "h1", "h2", "n1", "l1", "l2", "b1"]);
}
