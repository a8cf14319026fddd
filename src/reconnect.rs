//! Reconnect policy
//!
//! Exponential backoff over a rolling count of consecutive failures.

use std::time::Duration;

use crate::config::Config;

/// Outcome of recording a transport failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Reopen the stream after `delay`
    Retry { attempt: u32, delay: Duration },
    /// Attempts exhausted, stop for good
    GiveUp { attempts: u32 },
}

/// Backoff state for one feed
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    base_delay_ms: u64,
    max_delay_ms: Option<u64>,
    max_attempts: u32,
    attempt_count: u32,
}

impl ReconnectPolicy {
    pub fn new(base_delay_ms: u64, max_delay_ms: Option<u64>, max_attempts: u32) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
            max_attempts,
            attempt_count: 0,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.reconnect_base_delay_ms,
            config.max_reconnect_delay_ms,
            config.max_reconnect_attempts,
        )
    }

    /// Delay before reconnecting after the `attempt_count`-th consecutive
    /// failure: `base * 2^(attempt_count - 1)`, capped when a cap is set.
    pub fn next_delay(&self, attempt_count: u32) -> Duration {
        let exp = attempt_count.saturating_sub(1).min(63);
        let ms = self
            .base_delay_ms
            .saturating_mul(1u64.checked_shl(exp).unwrap_or(u64::MAX));
        let ms = match self.max_delay_ms {
            Some(cap) => ms.min(cap),
            None => ms,
        };
        Duration::from_millis(ms)
    }

    /// Whether connection attempt number `attempt` (1-based) may be made
    pub fn should_retry(attempt: u32, max_attempts: u32) -> bool {
        attempt <= max_attempts
    }

    /// Count one failure and decide what happens next.
    ///
    /// The counter is incremented before the delay is computed. With
    /// `max_attempts = n` the n-th consecutive failure gives up, so at most
    /// `n` connections are ever attempted without an intervening success.
    pub fn record_failure(&mut self) -> ReconnectDecision {
        self.attempt_count = self.attempt_count.saturating_add(1);

        if Self::should_retry(self.attempt_count.saturating_add(1), self.max_attempts) {
            ReconnectDecision::Retry {
                attempt: self.attempt_count,
                delay: self.next_delay(self.attempt_count),
            }
        } else {
            ReconnectDecision::GiveUp {
                attempts: self.attempt_count,
            }
        }
    }

    /// Successful handshake
    pub fn reset(&mut self) {
        self.attempt_count = 0;
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        !Self::should_retry(self.attempt_count.saturating_add(1), self.max_attempts)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
