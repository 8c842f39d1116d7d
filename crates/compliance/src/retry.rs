//! Retry logic with exponential backoff for read-only management-plane calls.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    #[serde(with = "millis")]
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum delay between retries
    #[serde(with = "millis")]
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_factor,
            ..Self::default()
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Create a config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Execute an operation with retry logic.
///
/// Retries only errors for which [`Error::is_retryable`] holds, sleeping
/// with exponential backoff in between. Returns the last error once all
/// attempts are used.
pub fn with_retry<T, F>(config: &RetryConfig, label: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match operation() {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_retryable() || attempt + 1 >= max_attempts => return Err(e),
            Err(e) => {
                let delay = config.delay_for_attempt(attempt);
                log::warn!(
                    "{label}: attempt {}/{max_attempts} failed: {e}. Retrying in {}ms",
                    attempt + 1,
                    delay.as_millis()
                );
                thread::sleep(delay);
                attempt += 1;
            }
        }
    }
}
