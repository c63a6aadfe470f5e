//! Bounded-retry wrapper around a single provider call.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use super::retry::{RetryConfig, RetryDecision, RetryState};
use crate::errors::{ProviderError, RetriesExhausted};
use crate::providers::ProviderOutput;

/// Runs one provider call with a fixed attempt budget and a per-call timeout.
///
/// Every failure cause is treated the same: transport errors, elapsed
/// timeouts and unusable responses all consume an attempt, and once the
/// budget is spent the caller receives a single [`RetriesExhausted`].
#[derive(Debug, Clone)]
pub struct StageExecutor {
    retry: RetryConfig,
    call_timeout: Duration,
}

impl StageExecutor {
    /// Creates an executor.
    #[must_use]
    pub fn new(retry: RetryConfig, call_timeout: Duration) -> Self {
        Self {
            retry,
            call_timeout,
        }
    }

    /// Returns the retry budget.
    #[must_use]
    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    /// Invokes `call` until it yields a usable output or the budget is spent.
    pub async fn execute<T, F, Fut>(
        &self,
        operation: &str,
        mut call: F,
    ) -> Result<T, RetriesExhausted>
    where
        T: ProviderOutput + Send,
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, ProviderError>> + Send,
    {
        let mut state = RetryState::new();

        loop {
            let attempt = state.attempts + 1;
            let error = match tokio::time::timeout(self.call_timeout, call()).await {
                Ok(Ok(output)) if output.is_usable() => {
                    debug!(operation, attempt, "Provider call succeeded");
                    return Ok(output);
                }
                Ok(Ok(_)) => ProviderError::EmptyResponse,
                Ok(Err(err)) => err,
                Err(_) => ProviderError::Timeout {
                    timeout_ms: u64::try_from(self.call_timeout.as_millis()).unwrap_or(u64::MAX),
                },
            };

            match state.record_failure(&self.retry) {
                RetryDecision::Retry(delay) => {
                    warn!(
                        operation,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "Provider call failed, retrying"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                RetryDecision::GiveUp => {
                    warn!(operation, attempts = state.attempts, error = %error, "Provider call exhausted retries");
                    return Err(RetriesExhausted {
                        operation: operation.to_string(),
                        attempts: state.attempts,
                        last_error: error,
                    });
                }
            }
        }
    }
}
