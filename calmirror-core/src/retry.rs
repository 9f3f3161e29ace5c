//! Bounded retry with exponential backoff for per-record sink calls.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::MirrorResult;

/// Retry budget for one sink call.
///
/// Only transient failures are retried; deterministic rejections return
/// immediately.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, the first try included.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
}

impl RetryPolicy {
    /// Budget for live sink traffic.
    pub fn standard() -> Self {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            factor: 2.0,
        }
    }

    /// Millisecond delays so retry paths stay fast under test.
    pub fn fast() -> Self {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            factor: 1.0,
        }
    }

    fn delay_for(&self, completed_attempts: u32) -> Duration {
        let scaled = self
            .initial_delay
            .mul_f64(self.factor.powi(completed_attempts as i32));
        scaled.min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::standard()
    }
}

/// Run `call`, retrying transient failures within the policy's budget.
///
/// Returns the first success, the first non-transient error, or the last
/// transient error once attempts run out.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut call: F) -> MirrorResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = MirrorResult<T>>,
{
    let mut completed = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && completed + 1 < policy.max_attempts => {
                let delay = policy.delay_for(completed);
                warn!(
                    operation,
                    attempt = completed + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying transient failure"
                );
                tokio::time::sleep(delay).await;
                completed += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
