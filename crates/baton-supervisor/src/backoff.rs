//! Respawn backoff for automatic restarts.
//!
//! The first automatic respawn inside a quiet window is immediate. Each
//! further respawn within the window doubles the delay, capped at
//! `max`. Respawns older than the window stop counting.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct RespawnBackoff {
    base: Duration,
    max: Duration,
    window: Duration,
    /// When recent automatic respawns were scheduled, oldest first.
    recent: VecDeque<Instant>,
}

impl RespawnBackoff {
    pub fn new(base: Duration, max: Duration, window: Duration) -> Self {
        Self {
            base,
            max,
            window,
            recent: VecDeque::new(),
        }
    }

    /// Record a respawn at `now` and return how long to wait before it.
    pub fn next_delay(&mut self, now: Instant) -> Duration {
        while let Some(&oldest) = self.recent.front() {
            if now.saturating_duration_since(oldest) > self.window {
                self.recent.pop_front();
            } else {
                break;
            }
        }

        let prior = self.recent.len() as u32;
        self.recent.push_back(now);

        if prior == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(prior - 1);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Respawns counted in the current window.
    pub fn recent_respawns(&self) -> usize {
        self.recent.len()
    }

    /// Forget history (operator intervention).
    pub fn reset(&mut self) {
        self.recent.clear();
    }
}

impl Default for RespawnBackoff {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(1),
            Duration::from_secs(60),
            Duration::from_secs(600),
        )
    }
}
