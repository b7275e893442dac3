//! Caller-side retry with exponential backoff for key validation.
//!
//! The validator itself never retries. Callers that want to ride out a
//! flaky network wrap their validation in [`with_retry`], which repeats the
//! attempt only while the outcome is a transient failure.

use std::future::Future;
use std::time::Duration;

use crate::providers::ValidationOutcome;

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

/// Run a validation, retrying while it reports a transient failure.
///
/// `Valid` and `Invalid` are final and returned immediately.
pub async fn with_retry<F, Fut>(config: &RetryConfig, mut f: F) -> ValidationOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ValidationOutcome>,
{
    let mut attempt = 0;
    let mut backoff = config.initial_backoff;

    loop {
        let outcome = f().await;
        if !outcome.is_transient() {
            return outcome;
        }

        attempt += 1;
        if attempt > config.max_retries {
            return outcome;
        }

        tracing::warn!(
            attempt = attempt,
            max_retries = config.max_retries,
            backoff_ms = backoff.as_millis(),
            "Validation did not complete, retrying"
        );

        tokio::time::sleep(backoff).await;

        // Exponential backoff with cap
        backoff = Duration::from_secs_f64(
            (backoff.as_secs_f64() * config.multiplier).min(config.max_backoff.as_secs_f64()),
        );
    }
}
