//! Bounded retry for transient gateway failures
//!
//! Rate limits and timestamp skew are retried a fixed number of times with
//! fixed backoff; every other error surfaces immediately. Retries never
//! loop unbounded.

use std::future::Future;
use std::time::Duration;

use log::warn;

use crate::error::GatewayError;

/// Retry policy: bounded attempts, fixed backoff
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub attempts: u32,
    /// Pause between attempts
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Run `operation`, retrying transient gateway errors per `policy`
///
/// `label` names the call in logs.
pub async fn with_retry<T, F, Fut>(
    label: &str,
    policy: RetryPolicy,
    mut operation: F,
) -> Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < attempts => {
                warn!(
                    "[GATEWAY] {} failed on attempt {}/{}: {} (retrying)",
                    label, attempt, attempts, e
                );
                tokio::time::sleep(policy.backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
