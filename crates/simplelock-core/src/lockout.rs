//! Adaptive lockout after failed password attempts
//!
//! Instead of a fixed attempt counter the timer keeps a goodwill budget.
//! Every failure blocks input for `base_timeout` plus a share of the
//! remaining goodwill, and spends that share. Time spent waiting after a
//! lockout window has passed is paid back into the budget, so:
//!
//! - rapid guessing drains goodwill and each window ends later than the last,
//! - the total extra delay is bounded by `max_goodwill`,
//! - a user who pauses between typos gets short lockouts again.
//!
//! All timestamps are milliseconds in the event time domain, so the delay is
//! independent of how long event delivery itself takes.

use crate::config::LockoutConfig;
use crate::event::Timestamp;

/// Lockout state owned by the key event loop
#[derive(Clone, Debug)]
pub struct LockoutTimer {
    /// Fixed delay per failure (ms)
    base_timeout: u64,
    /// Upper bound of the goodwill budget (ms)
    max_goodwill: u64,
    /// Share of the goodwill spent per failure
    portion: f64,
    /// Remaining goodwill (ms)
    goodwill: u64,
    /// Key presses before this instant are ignored
    blocked_until: Option<Timestamp>,
}

impl LockoutTimer {
    /// Create a timer with full goodwill and no active lockout
    pub fn new(config: &LockoutConfig) -> Self {
        let max_goodwill = duration_ms(config.max_goodwill);
        Self {
            base_timeout: duration_ms(config.base_timeout),
            max_goodwill,
            portion: config.goodwill_portion,
            goodwill: max_goodwill,
            blocked_until: None,
        }
    }

    /// Record a failed attempt at `now` and return the new end of the lockout
    pub fn on_failure(&mut self, now: Timestamp) -> Timestamp {
        // Pay back the time waited since the previous window expired.
        if let Some(until) = self.blocked_until {
            let waited = now.saturating_sub(until);
            self.goodwill = self.goodwill.saturating_add(waited).min(self.max_goodwill);
        }

        let penalty = (self.goodwill as f64 * self.portion) as u64;
        self.goodwill -= penalty.min(self.goodwill);

        let until = now
            .saturating_add(self.base_timeout)
            .saturating_add(penalty);
        self.blocked_until = Some(until);

        tracing::debug!(
            penalty_ms = penalty,
            goodwill_ms = self.goodwill,
            "lockout re-armed"
        );

        until
    }

    /// Whether an event stamped `now` falls inside the lockout window
    pub fn is_blocked(&self, now: Timestamp) -> bool {
        self.blocked_until.is_some_and(|until| now < until)
    }

    /// End of the current (or last) lockout window
    pub fn blocked_until(&self) -> Option<Timestamp> {
        self.blocked_until
    }

    /// Remaining goodwill in milliseconds
    pub fn goodwill(&self) -> u64 {
        self.goodwill
    }

    /// Upper bound of the goodwill budget in milliseconds
    pub fn max_goodwill(&self) -> u64 {
        self.max_goodwill
    }

    /// Override the remaining goodwill, clamped to the maximum
    pub fn with_goodwill(mut self, goodwill: u64) -> Self {
        self.goodwill = goodwill.min(self.max_goodwill);
        self
    }
}

fn duration_ms(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
