//! Reconnect backoff for the MQTT event loop.

use std::time::Duration;

/// Jitter percentage for exponential backoff (±20%).
///
/// Spreads reconnects out so a fleet of ingest nodes does not hit a
/// restarted broker at the same instant.
const BACKOFF_JITTER_PERCENT: f64 = 0.2;

/// Minimum delay between reconnection attempts in milliseconds.
const MIN_RECONNECT_DELAY_MS: u64 = 100;

/// Exponential backoff with jitter.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before the given attempt (1-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis() as u64;
        let max_ms = self.max.as_millis() as u64;
        let delay_ms = base_ms
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
            .min(max_ms);
        Duration::from_millis(delay_ms)
    }

    /// Delay before the given attempt with ±20% jitter, floored at 100ms.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with_jitter(attempt, rand_jitter())
    }

    fn delay_with_jitter(&self, attempt: u32, unit: f64) -> Duration {
        let delay_ms = self.base_delay(attempt).as_millis() as u64;
        let jitter = (delay_ms as f64 * BACKOFF_JITTER_PERCENT * (unit * 2.0 - 1.0)) as i64;
        let final_ms = (delay_ms as i64 + jitter).max(MIN_RECONNECT_DELAY_MS as i64) as u64;
        Duration::from_millis(final_ms)
    }
}

/// Random value in `[0.0, 1.0)` from the thread-local RNG.
fn rand_jitter() -> f64 {
    use rand::Rng;
    rand::rng().random::<f64>()
}
