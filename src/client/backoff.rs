//! Reconnection backoff schedule.

use std::time::Duration;

/// Exponential backoff bounded by a delay cap and an attempt budget.
///
/// Attempt `n` (1-based) waits `base_delay * 2^(n-1)`, capped at
/// `max_delay`. Once `max_attempts` reconnects have been scheduled without
/// a successful open, the controller gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect.
    pub base_delay: Duration,
    /// Upper bound for delay growth.
    pub max_delay: Duration,
    /// Reconnects allowed before giving up.
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Computes the delay to apply before the given attempt.
    ///
    /// `attempt` is 1-based; `0` is treated as `1`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let mut delay = self.base_delay;
        for _ in 1..attempt {
            if delay >= self.max_delay {
                break;
            }
            delay = delay.saturating_mul(2);
        }
        delay.min(self.max_delay)
    }

    /// Returns `true` while another reconnect may be scheduled after
    /// `attempts_so_far` failed ones.
    #[must_use]
    pub const fn allows(&self, attempts_so_far: u32) -> bool {
        attempts_so_far < self.max_attempts
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(30_000),
            max_attempts: 5,
        }
    }
}
