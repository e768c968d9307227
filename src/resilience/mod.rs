//! Retry with delay for dispatch attempts.
//!
//! Only retryable errors (transport failures) trigger another attempt.
//! The wait happens strictly between attempts, and when the budget is
//! spent the last attempt's error is returned as-is.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

use crate::config::RetryPolicy;
use crate::errors::{MailResult, TransportError};
use crate::observability::DispatchMetrics;

/// Retry executor with fixed or exponential delay.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    metrics: Option<Arc<DispatchMetrics>>,
}

impl RetryExecutor {
    /// Creates a new retry executor.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            metrics: None,
        }
    }

    /// Records retries in the given metrics collector.
    pub fn with_metrics(mut self, metrics: Arc<DispatchMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Returns the policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Executes an async operation with retry logic.
    ///
    /// The operation receives the 1-based attempt number. A `max_attempts`
    /// of zero is treated as one.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> MailResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = MailResult<T>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let result = match self.policy.attempt_timeout {
                Some(limit) => match timeout(limit, operation(attempt)).await {
                    Ok(result) => result,
                    Err(_) => Err(TransportError::timeout(format!(
                        "Attempt {} exceeded {}",
                        attempt,
                        humantime::format_duration(limit)
                    ))
                    .into()),
                },
                None => operation(attempt).await,
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() || attempt >= max_attempts => return Err(e),
                Err(_e) => {
                    let delay = self.calculate_delay(attempt);

                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        attempt = attempt,
                        max_attempts = max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %_e,
                        "Retrying dispatch after failure"
                    );

                    if let Some(metrics) = &self.metrics {
                        metrics.record_retry();
                    }

                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Calculates the wait after the given failed attempt (1-based).
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.policy.delay.as_millis() as f64
            * self.policy.multiplier.powi(attempt.saturating_sub(1) as i32);

        // The cap never shortens the configured base delay.
        let cap_ms = self.policy.max_delay.max(self.policy.delay).as_millis() as f64;
        let delay_ms = base_ms.min(cap_ms);

        let final_ms = if self.policy.jitter {
            delay_ms + rand::random::<f64>() * 0.3 * delay_ms
        } else {
            delay_ms
        };

        Duration::from_millis(final_ms as u64)
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}
