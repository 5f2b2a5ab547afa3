//! Sliding-window admission control with a server-triggered cooldown.
//!
//! Two windows of send timestamps (1s and 60s). `can_send` only reads; the
//! windows are pruned and the cooldown expires exclusively in `update`, which
//! the scheduler ticks every 100ms.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

const SECOND: Duration = Duration::from_secs(1);
const MINUTE: Duration = Duration::from_secs(60);

/// Longest cooldown a single activation can impose.
pub const MAX_COOLDOWN: Duration = Duration::from_secs(86_400);

/// Caps for the two windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    pub per_second: usize,
    pub per_minute: usize,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self { per_second: 10, per_minute: 300 }
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    limits: RateLimits,
    second_window: VecDeque<Instant>,
    minute_window: VecDeque<Instant>,
    cooldown_until: Option<Instant>,
}

impl RateLimiter {
    pub fn new(limits: RateLimits) -> Self {
        Self {
            limits,
            second_window: VecDeque::new(),
            minute_window: VecDeque::new(),
            cooldown_until: None,
        }
    }

    /// True iff not cooling down and both windows have room.
    pub fn can_send(&self) -> bool {
        !self.is_cooling_down()
            && self.second_window.len() < self.limits.per_second
            && self.minute_window.len() < self.limits.per_minute
    }

    pub fn record_send(&mut self) {
        self.record_send_at(Instant::now());
    }

    pub fn record_send_at(&mut self, now: Instant) {
        self.second_window.push_back(now);
        self.minute_window.push_back(now);
    }

    /// Suppress every send for `duration`, capped at `MAX_COOLDOWN`. A later
    /// activation replaces the current deadline.
    pub fn activate_cooldown(&mut self, duration: Duration) {
        let duration = duration.min(MAX_COOLDOWN);
        let now = Instant::now();
        let until = now.checked_add(duration).unwrap_or(now);
        self.cooldown_until = Some(until);
        tracing::warn!(cooldown_secs = duration.as_secs_f64(), "Rate limit cooldown activated");
    }

    pub fn is_cooling_down(&self) -> bool {
        self.cooldown_until.is_some()
    }

    /// Remaining cooldown as of `now`, if any.
    pub fn cooldown_remaining(&self, now: Instant) -> Option<Duration> {
        self.cooldown_until.map(|end| end.saturating_duration_since(now))
    }

    /// Prune both windows and end the cooldown once its deadline has passed.
    pub fn update(&mut self, now: Instant) {
        prune(&mut self.second_window, now, SECOND);
        prune(&mut self.minute_window, now, MINUTE);

        if let Some(end) = self.cooldown_until {
            if now >= end {
                self.cooldown_until = None;
                tracing::info!("Rate limit cooldown ended");
            }
        }
    }

    pub fn reset(&mut self) {
        self.second_window.clear();
        self.minute_window.clear();
        self.cooldown_until = None;
    }

    /// Sends counted in the 1s and 60s windows.
    pub fn window_counts(&self) -> (usize, usize) {
        (self.second_window.len(), self.minute_window.len())
    }

    pub fn limits(&self) -> RateLimits {
        self.limits
    }
}

fn prune(window: &mut VecDeque<Instant>, now: Instant, span: Duration) {
    while let Some(&oldest) = window.front() {
        if now.saturating_duration_since(oldest) >= span {
            window.pop_front();
        } else {
            break;
        }
    }
}
