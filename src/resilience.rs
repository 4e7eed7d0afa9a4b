//! Retry with exponential backoff for transient failures.
//!
//! Only model provider calls go through here. SQL statements are never
//! retried automatically, since `ServerError::is_transient()` is false for
//! every database error.

use crate::config::ModelConfig;
use crate::error::ServerError;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Backoff multiplier (for exponential backoff).
    pub multiplier: f64,
    /// Whether to add jitter to delays.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a retry config with no retries (just execute once).
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Retry budget for one model's completion calls.
    pub fn for_model(config: &ModelConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            ..Default::default()
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay_ms = self.initial_delay.as_millis() as f64
            * self.multiplier.powi(attempt.saturating_sub(1) as i32);

        let capped_delay_ms = base_delay_ms.min(self.max_delay.as_millis() as f64);

        let final_delay_ms = if self.jitter {
            // +/- 25%
            let jitter_factor = 0.75 + (rand_jitter() * 0.5);
            capped_delay_ms * jitter_factor
        } else {
            capped_delay_ms
        };

        Duration::from_millis(final_delay_ms as u64)
    }
}

/// Pseudo-random factor between 0.0 and 1.0 taken from the clock.
fn rand_jitter() -> f64 {
    use std::time::SystemTime;

    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);

    jitter_fraction(nanos)
}

/// Map sub-second nanoseconds onto `[0.0, 1.0)`.
fn jitter_fraction(nanos: u32) -> f64 {
    f64::from(nanos) / 1_000_000_000.0
}

/// Result of a retry operation.
#[derive(Debug)]
pub struct RetryResult<T> {
    /// The successful result, if any.
    pub value: Option<T>,
    /// Number of attempts made.
    pub attempts: u32,
    /// The last error, if the operation failed.
    pub last_error: Option<ServerError>,
}

impl<T> RetryResult<T> {
    pub fn is_success(&self) -> bool {
        self.value.is_some()
    }

    /// Convert to a standard Result.
    pub fn into_result(self) -> Result<T, ServerError> {
        match self.value {
            Some(v) => Ok(v),
            None => Err(self
                .last_error
                .unwrap_or_else(|| ServerError::internal("Retry failed with no error captured"))),
        }
    }
}

/// Execute an async operation, retrying while it fails with a transient error.
///
/// Non-transient errors are returned after the first attempt.
pub async fn retry_async<F, Fut, T>(config: &RetryConfig, operation: F) -> RetryResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ServerError>>,
{
    let mut last_error = None;
    let max_attempts = config.max_attempts.max(1);

    for attempt in 0..max_attempts {
        if attempt > 0 {
            let delay = config.delay_for_attempt(attempt);
            debug!("Retry attempt {} after {:?} delay", attempt + 1, delay);
            sleep(delay).await;
        }

        match operation().await {
            Ok(value) => {
                return RetryResult {
                    value: Some(value),
                    attempts: attempt + 1,
                    last_error: None,
                };
            }
            Err(e) => {
                if !e.is_transient() {
                    debug!("Non-transient error, not retrying: {}", e);
                    return RetryResult {
                        value: None,
                        attempts: attempt + 1,
                        last_error: Some(e),
                    };
                }

                warn!(
                    "Transient error on attempt {}/{}: {}",
                    attempt + 1,
                    max_attempts,
                    e
                );
                last_error = Some(e);
            }
        }
    }

    RetryResult {
        value: None,
        attempts: max_attempts,
        last_error,
    }
}

/// `retry_async` returning a plain Result.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: F) -> Result<T, ServerError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ServerError>>,
{
    retry_async(config, operation).await.into_result()
}
