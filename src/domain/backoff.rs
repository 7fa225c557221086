use std::time::Duration;

use rand::Rng;

/// Explicit retry state machine for a persistently failing delivery:
/// exponential delays from `base` doubling up to `cap`, reset on the next
/// success. Jitter is additive on top of the deterministic delay so the
/// underlying schedule stays non-decreasing.
#[derive(Debug, Clone)]
pub struct RetryBackoff {
    base: Duration,
    cap: Duration,
    jitter: Duration,
    failures: u32,
}

impl RetryBackoff {
    #[must_use]
    pub fn new(base: Duration, cap: Duration, jitter: Duration) -> Self {
        Self {
            base,
            cap,
            jitter,
            failures: 0,
        }
    }

    /// Records a failed attempt and returns the deterministic delay before
    /// the next one.
    pub fn next_delay(&mut self) -> Duration {
        let exponent = self.failures.min(16);
        self.failures = self.failures.saturating_add(1);
        let multiplier = 1u32 << exponent;
        self.base.saturating_mul(multiplier).min(self.cap)
    }

    /// The delay with jitter applied; what the delivery loop actually sleeps.
    pub fn next_sleep(&mut self) -> Duration {
        let delay = self.next_delay();
        if self.jitter.is_zero() {
            return delay;
        }
        let extra_ms = rand::thread_rng().gen_range(0..=self.jitter.as_millis() as u64);
        delay + Duration::from_millis(extra_ms)
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    #[must_use]
    pub fn failures(&self) -> u32 {
        self.failures
    }
}
