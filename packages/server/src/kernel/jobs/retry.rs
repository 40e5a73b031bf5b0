//! Retry/backoff policy.
//!
//! Pure functions of the attempt count: exponential growth from `base`,
//! capped at `max_delay`, optionally jittered so that a burst of failures
//! does not come back as a burst of re-claims.

use std::time::Duration;

use rand::Rng;

use super::error::ErrorKind;
use super::message::NackAction;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max_delay: Duration::from_secs(3600), // Max 1 hour
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(base: Duration, max_delay: Duration) -> Self {
        Self {
            base,
            max_delay,
            jitter: true,
        }
    }

    pub fn without_jitter(self) -> Self {
        Self {
            jitter: false,
            ..self
        }
    }

    /// Delay before the next attempt: `min(base * 2^attempts, max_delay)`.
    ///
    /// With jitter the delay is scaled by a random factor in `[0.5, 1.0]`.
    pub fn next_delay(&self, attempts: i32) -> Duration {
        let exponent = attempts.clamp(0, 31) as u32;
        let delay = self
            .base
            .checked_mul(2u32.saturating_pow(exponent))
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        if self.jitter {
            delay.mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
        } else {
            delay
        }
    }

    /// Decides how a failed delivery is reported back to the queue.
    ///
    /// The store still enforces `max_attempts`; this only routes permanent
    /// errors straight to the dead-letter state.
    pub fn decide(&self, attempts: i32, kind: ErrorKind) -> NackAction {
        if kind.should_retry() {
            NackAction::Retry(self.next_delay(attempts))
        } else {
            NackAction::DeadLetter
        }
    }
}
