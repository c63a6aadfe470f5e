//! Retry budgets with configurable backoff and jitter.
//!
//! Provider calls get a fixed number of attempts. Single-shot stages usually
//! back off between attempts; batch items usually do not, since the batch
//! runner's inter-item delay already throttles them.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^(retry - 1)
    Exponential,
    /// delay = base * retry
    Linear,
    /// delay = base
    #[default]
    Constant,
}

/// Jitter strategy applied on top of the backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    #[default]
    None,
    /// Random from 0 to delay
    Full,
    /// Half fixed, half random
    Equal,
}

/// Retry budget for one kind of provider call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: usize,
    /// Base delay between attempts in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff strategy.
    pub backoff: BackoffStrategy,
    /// Jitter strategy.
    pub jitter: JitterStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff: BackoffStrategy::Constant,
            jitter: JitterStrategy::None,
        }
    }
}

impl RetryConfig {
    /// Creates the default config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `attempts` tries with no delay between them.
    #[must_use]
    pub fn immediate(attempts: usize) -> Self {
        Self::new().with_max_attempts(attempts).with_base_delay_ms(0)
    }

    /// `attempts` tries with a constant delay.
    #[must_use]
    pub fn fixed(attempts: usize, delay_ms: u64) -> Self {
        Self::new()
            .with_max_attempts(attempts)
            .with_base_delay_ms(delay_ms)
            .with_backoff(BackoffStrategy::Constant)
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter = strategy;
        self
    }

    /// Returns the attempt budget, never less than one.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.max_attempts.max(1)
    }

    /// Delay before retry number `retry` (1 = the second attempt).
    #[must_use]
    pub fn delay_before_retry(&self, retry: usize) -> Duration {
        let base = self.base_delay_ms;
        let retry = retry.max(1);

        let delay = match self.backoff {
            BackoffStrategy::Exponential => {
                let exponent = u32::try_from(retry - 1).unwrap_or(u32::MAX);
                base.saturating_mul(2u64.saturating_pow(exponent))
            }
            BackoffStrategy::Linear => {
                base.saturating_mul(u64::try_from(retry).unwrap_or(u64::MAX))
            }
            BackoffStrategy::Constant => base,
        }
        .min(self.max_delay_ms);

        let jittered = match self.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full if delay == 0 => 0,
            JitterStrategy::Full => rand::thread_rng().gen_range(0..=delay),
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };

        Duration::from_millis(jittered)
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry(Duration),
    /// No more attempts, give up.
    GiveUp,
}

/// Attempt bookkeeping for one operation.
#[derive(Debug, Default)]
pub struct RetryState {
    /// Attempts made so far.
    pub attempts: usize,
}

impl RetryState {
    /// Creates a new retry state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failed attempt and decides what to do next.
    pub fn record_failure(&mut self, config: &RetryConfig) -> RetryDecision {
        self.attempts += 1;
        if self.attempts >= config.attempts() {
            RetryDecision::GiveUp
        } else {
            RetryDecision::Retry(config.delay_before_retry(self.attempts))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay_ms, 1000);
        assert_eq!(config.backoff, BackoffStrategy::Constant);
        assert_eq!(config.jitter, JitterStrategy::None);
    }

    #[test]
    fn test_retry_config_builder() {
        let config = RetryConfig::new()
            .with_max_attempts(5)
            .with_base_delay_ms(500)
            .with_max_delay_ms(10000)
            .with_backoff(BackoffStrategy::Linear)
            .with_jitter(JitterStrategy::Equal);

        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.base_delay_ms, 500);
        assert_eq!(config.backoff, BackoffStrategy::Linear);
        assert_eq!(config.jitter, JitterStrategy::Equal);
    }

    #[test]
    fn test_zero_attempts_still_tries_once() {
        assert_eq!(RetryConfig::immediate(0).attempts(), 1);
    }

    #[test]
    fn test_exponential_delays() {
        let config = RetryConfig::new()
            .with_base_delay_ms(100)
            .with_backoff(BackoffStrategy::Exponential);

        assert_eq!(config.delay_before_retry(1), Duration::from_millis(100));
        assert_eq!(config.delay_before_retry(2), Duration::from_millis(200));
        assert_eq!(config.delay_before_retry(3), Duration::from_millis(400));
    }

    #[test]
    fn test_linear_and_constant_delays() {
        let linear = RetryConfig::new()
            .with_base_delay_ms(100)
            .with_backoff(BackoffStrategy::Linear);
        assert_eq!(linear.delay_before_retry(3), Duration::from_millis(300));

        let constant = RetryConfig::fixed(3, 250);
        assert_eq!(constant.delay_before_retry(1), Duration::from_millis(250));
        assert_eq!(constant.delay_before_retry(7), Duration::from_millis(250));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let config = RetryConfig::new()
            .with_base_delay_ms(1000)
            .with_max_delay_ms(5000)
            .with_backoff(BackoffStrategy::Exponential);

        assert_eq!(config.delay_before_retry(10), Duration::from_millis(5000));
    }

    #[test]
    fn test_full_jitter_bounded() {
        let config = RetryConfig::fixed(3, 100).with_jitter(JitterStrategy::Full);
        for _ in 0..20 {
            assert!(config.delay_before_retry(1) <= Duration::from_millis(100));
        }
    }

    #[test]
    fn test_retry_state_budget() {
        let config = RetryConfig::immediate(3);
        let mut state = RetryState::new();

        assert_eq!(state.record_failure(&config), RetryDecision::Retry(Duration::ZERO));
        assert_eq!(state.record_failure(&config), RetryDecision::Retry(Duration::ZERO));
        assert_eq!(state.record_failure(&config), RetryDecision::GiveUp);
        assert_eq!(state.attempts, 3);
    }
}
