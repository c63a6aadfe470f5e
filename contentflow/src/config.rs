//! Pipeline configuration.
//!
//! Every field has a default, so an empty TOML document is a valid config:
//!
//! ```toml
//! provider_timeout_ms = 120000
//!
//! [batch]
//! cap = 10
//! inter_item_delay_ms = 5000
//!
//! [retry.rewrite]
//! max_attempts = 3
//! base_delay_ms = 1000
//!
//! [poll]
//! interval_ms = 1000
//! max_polls = 300
//! timeout_policy = "client_only"
//!
//! [logging]
//! level = "info"
//! format = "compact"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::errors::ConfigError;
use crate::observability::LogConfig;
use crate::pipeline::{BatchConfig, ProgressBand, RetryConfig};
use crate::progress::PollConfig;

/// Retry budgets per provider call kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicies {
    /// Single-shot rewrite call.
    pub rewrite: RetryConfig,
    /// Per-image analysis call.
    pub analyze: RetryConfig,
    /// Per-image generation call.
    pub generate: RetryConfig,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            rewrite: RetryConfig::fixed(3, 1000),
            // Batch items are throttled by the inter-item delay instead.
            analyze: RetryConfig::immediate(2),
            generate: RetryConfig::immediate(2),
        }
    }
}

/// Progress ranges owned by each stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressBands {
    /// Rewrite stage.
    pub rewrite: ProgressBand,
    /// Analyze stage.
    pub analyze: ProgressBand,
    /// Generate stage.
    pub generate: ProgressBand,
}

impl Default for ProgressBands {
    fn default() -> Self {
        Self {
            rewrite: ProgressBand::new(5, 30),
            analyze: ProgressBand::new(30, 60),
            generate: ProgressBand::new(60, 95),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Batch limits for the per-image stages.
    pub batch: BatchConfig,
    /// Retry budgets.
    pub retry: RetryPolicies,
    /// Timeout for a single provider call.
    pub provider_timeout_ms: u64,
    /// Stage progress ranges.
    pub progress: ProgressBands,
    /// Consumer polling.
    pub poll: PollConfig,
    /// Logging.
    pub logging: LogConfig,
}

fn default_provider_timeout_ms() -> u64 {
    120_000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch: BatchConfig::default(),
            retry: RetryPolicies::default(),
            provider_timeout_ms: default_provider_timeout_ms(),
            progress: ProgressBands::default(),
            poll: PollConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|err| ConfigError::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        Self::from_toml_str(&content)
    }

    /// Returns the per-call provider timeout.
    #[must_use]
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch.cap == 0 {
            return Err(ConfigError::Invalid("batch.cap must be at least 1".to_string()));
        }
        for (name, retry) in [
            ("rewrite", &self.retry.rewrite),
            ("analyze", &self.retry.analyze),
            ("generate", &self.retry.generate),
        ] {
            if retry.max_attempts == 0 {
                return Err(ConfigError::Invalid(format!(
                    "retry.{name}.max_attempts must be at least 1"
                )));
            }
        }
        if self.provider_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "provider_timeout_ms must be positive".to_string(),
            ));
        }

        let bands = [
            ("rewrite", self.progress.rewrite),
            ("analyze", self.progress.analyze),
            ("generate", self.progress.generate),
        ];
        let mut floor = 0;
        for (name, band) in bands {
            if band.start > band.end || band.end > 100 || band.start < floor {
                return Err(ConfigError::Invalid(format!(
                    "progress.{name} must be an ordered range within 0..=100 (got {}..{})",
                    band.start, band.end
                )));
            }
            floor = band.end;
        }

        if self.poll.max_polls == 0 {
            return Err(ConfigError::Invalid("poll.max_polls must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::LogFormat;
    use crate::pipeline::BackoffStrategy;
    use crate::progress::PollTimeoutPolicy;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::from_toml_str("").unwrap();

        assert_eq!(config.batch.cap, 10);
        assert_eq!(config.batch.inter_item_delay_ms, 5000);
        assert_eq!(config.retry.rewrite.max_attempts, 3);
        assert_eq!(config.retry.rewrite.base_delay_ms, 1000);
        assert_eq!(config.retry.generate.max_attempts, 2);
        assert_eq!(config.retry.generate.base_delay_ms, 0);
        assert_eq!(config.provider_timeout(), Duration::from_secs(120));
        assert_eq!(config.progress.generate, ProgressBand::new(60, 95));
        assert_eq!(config.poll.max_polls, 300);
        assert_eq!(config.poll.timeout_policy, PollTimeoutPolicy::ClientOnly);
        assert_eq!(config.logging.format, LogFormat::Compact);
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_partial_override() {
        let config = PipelineConfig::from_toml_str(
            r#"
            provider_timeout_ms = 30000

            [batch]
            inter_item_delay_ms = 2000

            [retry.generate]
            max_attempts = 4
            backoff = "exponential"
            base_delay_ms = 250

            [poll]
            timeout_policy = "fail_task"

            [logging]
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.batch.cap, 10);
        assert_eq!(config.batch.inter_item_delay_ms, 2000);
        assert_eq!(config.retry.generate.max_attempts, 4);
        assert_eq!(config.retry.generate.backoff, BackoffStrategy::Exponential);
        assert_eq!(config.retry.analyze, RetryConfig::immediate(2));
        assert_eq!(config.provider_timeout_ms, 30_000);
        assert_eq!(config.poll.timeout_policy, PollTimeoutPolicy::FailTask);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = PipelineConfig::from_toml_str("[batch]\ncap = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = PipelineConfig::from_toml_str("[retry.rewrite]\nmax_attempts = 0").unwrap_err();
        assert!(err.to_string().contains("retry.rewrite.max_attempts"));

        let err = PipelineConfig::from_toml_str("[progress.analyze]\nstart = 20\nend = 60")
            .unwrap_err();
        assert!(err.to_string().contains("progress.analyze"));

        let err = PipelineConfig::from_toml_str("[poll]\nmax_polls = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_parse_error() {
        let err = PipelineConfig::from_toml_str("batch = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contentflow.toml");
        std::fs::write(&path, "[batch]\ncap = 4\n").unwrap();

        let config = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(config.batch.cap, 4);

        let err = PipelineConfig::from_file(dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
