//! Bounded exponential backoff
//!
//! One retry implementation for every external adapter. Callers decide which
//! errors are fatal (cannot succeed on retry); everything else is treated as
//! transient, logged, and retried after a growing delay.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

/// Run `operation` until it succeeds, `is_fatal` rejects the error, or the
/// attempt budget runs out (the last error is surfaced).
pub async fn with_retry<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    op_name: &str,
    is_fatal: P,
    mut operation: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 0..attempts {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if is_fatal(&e) => return Err(e),
            Err(e) => {
                tracing::warn!(
                    "{} failed (attempt {}/{}): {}",
                    op_name,
                    attempt + 1,
                    attempts,
                    e
                );
                last_error = Some(e);
                if attempt + 1 < attempts {
                    tokio::time::sleep(policy.delay_for(attempt)).await;
                }
            }
        }
    }

    Err(last_error.expect("at least one attempt runs"))
}
