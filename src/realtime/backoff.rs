//! Reconnect delay schedule.

use rand::Rng;
use std::time::Duration;

use crate::config::RealtimeConfig;

/// `min(cap, base * 2^attempt) + jitter`, jitter uniform in `0..=max_jitter`.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    max_jitter: Duration,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration, max_jitter: Duration) -> Self {
        Self {
            base,
            cap,
            max_jitter,
        }
    }

    pub fn from_config(config: &RealtimeConfig) -> Self {
        Self::new(config.backoff_base, config.backoff_cap, config.max_jitter)
    }

    /// Delay before reconnect number `attempt` (0-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map(|d| d.min(self.cap))
            .unwrap_or(self.cap)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        self.base_delay(attempt) + jitter
    }
}
