//! Retry Strategy (§4.2)
//!
//! Classifies errors as retryable vs terminal and computes exponential
//! backoff delays with an optional full-jitter component.

use std::time::Duration;

const RETRYABLE_SUBSTRINGS: &[&str] = &[
    "timeout",
    "connection refused",
    "connection reset",
    "connection aborted",
    "temporarily",
    "unavailable",
    "try again",
];

/// True for generic network errors, connection-reset/refused/aborted,
/// read/connect timeouts, and any message matching §4.2's substring list
/// (case-insensitive). False for permission-denied, disk-full, validation,
/// and integrity-mismatch errors classified elsewhere in the taxonomy.
pub fn is_retryable(message: &str) -> bool {
    let lower = message.to_lowercase();
    RETRYABLE_SUBSTRINGS
        .iter()
        .any(|needle| lower.contains(needle))
}

/// Backoff policy: `min(initial * multiplier^retry_count, max)`, with an
/// optional full-jitter of up to ±10% applied after the cap (documented
/// per spec's "optional" clause — jitter never pushes the delay past
/// `max` by more than 10%, and never below 90% of the unjittered value).
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: false,
        }
    }
}

impl BackoffPolicy {
    pub fn from_config(multiplier: f64) -> Self {
        Self {
            multiplier,
            ..Self::default()
        }
    }

    /// Computes the backoff duration for the given retry attempt (0-indexed).
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let scaled = self.initial.as_secs_f64() * self.multiplier.powi(retry_count as i32);
        let capped = scaled.min(self.max.as_secs_f64());

        let final_secs = if self.jitter {
            let jitter_frac = 1.0 + (rand::random::<f64>() * 0.2 - 0.1);
            (capped * jitter_frac).clamp(0.0, self.max.as_secs_f64())
        } else {
            capped
        };

        Duration::from_secs_f64(final_secs)
    }
}
