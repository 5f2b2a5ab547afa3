//! Drain coordination for scheduler shutdown.
//!
//! Every dispatch task holds a `DispatchGuard` while it is past the admission
//! point. Shutdown stops admitting new dispatches and then waits for the
//! guards to drop, up to a deadline.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownResult {
    Complete,
    /// The deadline passed with `remaining` dispatches still in flight.
    Timeout { remaining: u32 },
}

pub struct ShutdownCoordinator {
    state: RwLock<ShutdownState>,
    in_flight: Arc<AtomicU32>,
    notify: Arc<Notify>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ShutdownState::Running),
            in_flight: Arc::new(AtomicU32::new(0)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn state(&self) -> ShutdownState {
        *self.state.read()
    }

    pub fn is_accepting(&self) -> bool {
        self.state() == ShutdownState::Running
    }

    /// Register a dispatch. None once draining has begun.
    pub fn track(&self) -> Option<DispatchGuard> {
        let state = self.state.read();
        if *state != ShutdownState::Running {
            return None;
        }
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Some(DispatchGuard {
            counter: self.in_flight.clone(),
            notify: self.notify.clone(),
        })
    }

    pub fn in_flight_count(&self) -> u32 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Stop admitting, wait for in-flight dispatches, then mark stopped.
    pub async fn initiate(&self, timeout: Duration) -> ShutdownResult {
        *self.state.write() = ShutdownState::Draining;
        let result = self.wait_for_drain(timeout).await;
        *self.state.write() = ShutdownState::Stopped;
        result
    }

    async fn wait_for_drain(&self, timeout: Duration) -> ShutdownResult {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            // Register interest before reading the counter so a guard dropped
            // in between still wakes us.
            let notified = self.notify.notified();
            let count = self.in_flight_count();
            if count == 0 {
                return ShutdownResult::Complete;
            }
            if tokio::time::Instant::now() >= deadline {
                return ShutdownResult::Timeout { remaining: count };
            }

            tokio::select! {
                () = notified => continue,
                () = tokio::time::sleep_until(deadline) => {
                    let remaining = self.in_flight_count();
                    if remaining == 0 {
                        return ShutdownResult::Complete;
                    }
                    return ShutdownResult::Timeout { remaining };
                }
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps one dispatch counted as in flight until dropped.
pub struct DispatchGuard {
    counter: Arc<AtomicU32>,
    notify: Arc<Notify>,
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn idle_shutdown_completes_immediately() {
        let coordinator = ShutdownCoordinator::new();
        assert!(coordinator.is_accepting());
        assert_eq!(coordinator.initiate(Duration::from_secs(1)).await, ShutdownResult::Complete);
        assert_eq!(coordinator.state(), ShutdownState::Stopped);
        assert!(coordinator.track().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_guards_to_drop() {
        let coordinator = Arc::new(ShutdownCoordinator::new());
        let guard = coordinator.track().unwrap();
        assert_eq!(coordinator.in_flight_count(), 1);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            drop(guard);
        });

        let result = coordinator.initiate(Duration::from_secs(5)).await;
        assert_eq!(result, ShutdownResult::Complete);
        assert_eq!(coordinator.in_flight_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reports_stragglers_on_timeout() {
        let coordinator = ShutdownCoordinator::new();
        let _a = coordinator.track().unwrap();
        let _b = coordinator.track().unwrap();

        let result = coordinator.initiate(Duration::from_millis(500)).await;
        assert_eq!(result, ShutdownResult::Timeout { remaining: 2 });
    }
}
