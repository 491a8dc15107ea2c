//! Retry logic with exponential backoff for transient errors.

use crate::error::ApiError;
use crate::types::RetryConfig;
use std::thread;

/// Callback trait for retry progress notifications.
pub trait RetryCallback {
    /// Called when an operation is about to be retried.
    ///
    /// # Arguments
    /// * `attempt` - The attempt that just failed (1-indexed)
    /// * `max_attempts` - Maximum number of attempts
    /// * `error` - The error that triggered the retry
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &ApiError);
}

impl<F> RetryCallback for F
where
    F: Fn(u32, u32, &ApiError),
{
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &ApiError) {
        self(attempt, max_attempts, error);
    }
}

/// Outcome of a retried operation, with the number of attempts it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempted<T> {
    pub result: Result<T, ApiError>,
    pub attempts: u32,
}

impl<T> Attempted<T> {
    pub fn into_result(self) -> Result<T, ApiError> {
        self.result
    }
}

/// Execute an operation with retry logic.
///
/// Only [`ApiError::Transient`] errors are retried, with exponential backoff
/// between attempts. Permanent errors are returned immediately.
pub fn with_retry<T, F>(
    config: &RetryConfig,
    callback: Option<&dyn RetryCallback>,
    mut operation: F,
) -> Attempted<T>
where
    F: FnMut() -> Result<T, ApiError>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation() {
            Ok(value) => {
                return Attempted {
                    result: Ok(value),
                    attempts: attempt,
                };
            }
            Err(e) if !e.is_retryable() || attempt >= max_attempts => {
                return Attempted {
                    result: Err(e),
                    attempts: attempt,
                };
            }
            Err(e) => {
                let delay = config.delay_for_attempt(attempt - 1);
                log::debug!(
                    "attempt {}/{} failed: {}, retrying in {:?}",
                    attempt,
                    max_attempts,
                    e,
                    delay
                );
                if let Some(cb) = callback {
                    cb.on_retry(attempt, max_attempts, &e);
                }
                thread::sleep(delay);
            }
        }
    }
}
