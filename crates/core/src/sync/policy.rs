//! Retry policy for outbox replay.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default delay before the first retry.
pub const DEFAULT_BACKOFF_BASE_SECS: u64 = 5;

/// Exponent cap: with the default base the longest wait is 5 s * 2^8 (about 21 min).
pub const DEFAULT_BACKOFF_MAX_EXPONENT: u32 = 8;

/// Share of the computed delay that may be added as random jitter.
pub const DEFAULT_JITTER_RATIO: f64 = 0.2;

/// Queue length above which the status reports queue pressure.
pub const DEFAULT_QUEUE_WARN_THRESHOLD: usize = 500;

/// Retry policy classification for remote failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryClass {
    Retryable,
    Permanent,
    ReauthRequired,
}

/// Classify HTTP status into retry behavior.
pub fn classify_http_status(status: u16) -> RetryClass {
    match status {
        401 | 403 => RetryClass::ReauthRequired,
        408 | 409 | 423 | 425 | 429 => RetryClass::Retryable,
        500..=599 => RetryClass::Retryable,
        _ => RetryClass::Permanent,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncPolicy {
    pub backoff_base: Duration,
    pub max_exponent: u32,
    pub jitter_ratio: f64,
    pub queue_warn_threshold: usize,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            backoff_base: Duration::from_secs(DEFAULT_BACKOFF_BASE_SECS),
            max_exponent: DEFAULT_BACKOFF_MAX_EXPONENT,
            jitter_ratio: DEFAULT_JITTER_RATIO,
            queue_warn_threshold: DEFAULT_QUEUE_WARN_THRESHOLD,
        }
    }
}

impl SyncPolicy {
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    pub fn with_queue_warn_threshold(mut self, threshold: usize) -> Self {
        self.queue_warn_threshold = threshold;
        self
    }

    /// Exponential delay without jitter: `base * 2^min(failures - 1, max_exponent)`.
    pub fn backoff_delay(&self, consecutive_failures: u32) -> Duration {
        let exponent = consecutive_failures
            .saturating_sub(1)
            .min(self.max_exponent)
            .min(31);
        self.backoff_base.saturating_mul(1_u32 << exponent)
    }

    /// `backoff_delay` plus up to `jitter_ratio` of itself.
    pub fn jittered_delay(&self, consecutive_failures: u32) -> Duration {
        let delay = self.backoff_delay(consecutive_failures);
        if self.jitter_ratio <= 0.0 {
            return delay;
        }
        let factor = rand::thread_rng().gen_range(0.0..=self.jitter_ratio);
        delay + delay.mul_f64(factor)
    }

    pub fn is_under_pressure(&self, pending: usize) -> bool {
        self.queue_warn_threshold > 0 && pending >= self.queue_warn_threshold
    }
}

/// Exponential backoff in seconds under the default policy.
pub fn backoff_seconds(consecutive_failures: u32) -> u64 {
    SyncPolicy::default()
        .backoff_delay(consecutive_failures)
        .as_secs()
}
