use std::time::Duration;

use super::types::ReconnectStrategy;

/// Linear backoff: attempt `n` waits `base * n`, up to `max_attempts` consecutive attempts.
///
/// Deterministic on purpose so the schedule can be asserted against a paused clock.
#[derive(Clone, Debug)]
pub struct LinearBackoffReconnect {
    base: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl LinearBackoffReconnect {
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_attempts,
            attempt: 0,
        }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Default for LinearBackoffReconnect {
    fn default() -> Self {
        Self::new(Duration::from_secs(3), 5)
    }
}

impl ReconnectStrategy for LinearBackoffReconnect {
    fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1).min(self.max_attempts);
        self.base.saturating_mul(self.attempt)
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }

    fn should_retry(&self) -> bool {
        self.attempt < self.max_attempts
    }

    fn attempts(&self) -> u32 {
        self.attempt
    }
}
