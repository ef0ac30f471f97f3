//! Bounded exponential backoff for callers that want it.
//!
//! Session operations never retry on their own. Application code that wants
//! to ride out a flaky connection wraps the call in [`with_backoff`], which
//! only retries network and server failures.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

use super::ApiError;

/// 3 retries with exponential backoff usually succeeds without excessive delay.
const DEFAULT_MAX_RETRIES: u32 = 3;

/// 1 second is polite to the server while not making users wait too long.
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 1000;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
        }
    }
}

/// Errors that can tell a transient failure from a final one.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for ApiError {
    fn is_retryable(&self) -> bool {
        ApiError::is_retryable(self)
    }
}

pub async fn with_backoff<T, E, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, E>
where
    E: Retryable + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut retries = 0;
    let mut backoff = policy.initial_backoff;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && retries < policy.max_retries => {
                retries += 1;
                warn!(
                    retry = retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "Request failed, backing off"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            Err(err) => return Err(err),
        }
    }
}
