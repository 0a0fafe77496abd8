use chrono::{DateTime, Utc};
use rand::Rng;
use std::time::Duration;

use crate::config::RetryConfig;

/// Exponential backoff with a ceiling, an exponent cap, and bounded jitter.
///
/// `delay(attempts) = min(max_delay, base_delay * 2^min(attempts, max_exponent))`,
/// then perturbed by at most 10% of the delay (and never more than `jitter_cap`).
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_exponent: u32,
    pub jitter_cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl BackoffPolicy {
    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self {
            base_delay: Duration::from_secs(cfg.base_delay_secs),
            max_delay: Duration::from_secs(cfg.max_delay_secs),
            max_exponent: cfg.max_exponent.min(30),
            jitter_cap: Duration::from_millis(cfg.jitter_cap_ms),
        }
    }

    /// Un-jittered delay before the next attempt, given attempts made so far.
    pub fn delay(&self, attempts: u32) -> Duration {
        let exp = attempts.min(self.max_exponent).min(30);
        let raw = self.base_delay.saturating_mul(1u32 << exp);
        raw.min(self.max_delay)
    }

    /// Apply a symmetric random perturbation of at most `min(jitter_cap, delay / 10)`.
    pub fn jitter<R: Rng + ?Sized>(&self, delay: Duration, rng: &mut R) -> Duration {
        let spread = self.jitter_cap.min(delay / 10).as_millis() as i64;
        if spread == 0 {
            return delay;
        }
        let offset = rng.gen_range(-spread..=spread);
        if offset >= 0 {
            delay.saturating_add(Duration::from_millis(offset as u64))
        } else {
            delay.saturating_sub(Duration::from_millis(offset.unsigned_abs()))
        }
    }

    /// Jittered delay for `attempts`.
    pub fn jittered_delay(&self, attempts: u32) -> Duration {
        self.jitter(self.delay(attempts), &mut rand::thread_rng())
    }

    /// Absolute time of the next attempt.
    pub fn next_attempt_at(&self, now: DateTime<Utc>, attempts: u32) -> DateTime<Utc> {
        let delay = self.jittered_delay(attempts);
        let millis = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
        now.checked_add_signed(chrono::Duration::milliseconds(millis))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
