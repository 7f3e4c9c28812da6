//! Startup connection retry
//!
//! Broker and vector store connections are attempted a bounded number of
//! times with a fixed pause between attempts. Failures after startup are not
//! retried here; they are settled per message by the consumers.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Fixed-delay retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first (at least 1)
    pub max_attempts: u32,
    /// Pause between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    /// 3 attempts, 3 seconds apart
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

/// Run `operation` until it succeeds or the policy's attempts are used up
///
/// Returns the last error when every attempt fails.
pub async fn retry_fixed<F, Fut, T, E>(
    service: &str,
    policy: RetryPolicy,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(result) => {
                tracing::info!(service = %service, attempt, "Connected");
                return Ok(result);
            }
            Err(error) if attempt >= max_attempts => {
                tracing::error!(
                    service = %service,
                    attempts = attempt,
                    error = %error,
                    "All connection attempts exhausted"
                );
                return Err(error);
            }
            Err(error) => {
                tracing::warn!(
                    service = %service,
                    attempt,
                    max_attempts,
                    delay_ms = policy.delay.as_millis() as u64,
                    error = %error,
                    "Connection attempt failed, retrying"
                );
                sleep(policy.delay).await;
                attempt += 1;
            }
        }
    }
}
