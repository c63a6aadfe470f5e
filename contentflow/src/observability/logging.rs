//! Structured logging setup.
//!
//! Three output formats are supported:
//!
//! - `json` - one JSON object per event, for log aggregation
//! - `pretty` - multi-line, coloured, for development
//! - `compact` - single-line, coloured, for terminals
//!
//! `RUST_LOG` overrides the configured level when it is set.

use serde::{Deserialize, Serialize};
use std::env;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::errors::ConfigError;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Structured JSON (machine-readable).
    Json,
    /// Coloured and indented (human-readable).
    Pretty,
    /// Coloured, one line per event.
    #[default]
    Compact,
}

impl LogFormat {
    /// Parses a format name, falling back to compact.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "pretty" => Self::Pretty,
            _ => Self::Compact,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive, e.g. `info` or `contentflow=debug,info`.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
    /// Emit span open/close events.
    pub include_spans: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            include_spans: false,
        }
    }
}

impl LogConfig {
    /// Builds the filter, letting `RUST_LOG` take precedence.
    pub fn env_filter(&self) -> Result<EnvFilter, ConfigError> {
        if let Ok(rust_log) = env::var("RUST_LOG") {
            if let Ok(filter) = EnvFilter::try_new(rust_log) {
                return Ok(filter);
            }
        }

        let filter = EnvFilter::try_new(&self.level)
            .map_err(|err| ConfigError::Invalid(format!("logging.level '{}': {err}", self.level)))?;
        Ok(filter
            .add_directive(quiet("hyper"))
            .add_directive(quiet("reqwest")))
    }
}

fn quiet(target: &str) -> tracing_subscriber::filter::Directive {
    // Statically valid directive.
    format!("{target}=warn")
        .parse()
        .unwrap_or_else(|_| tracing_subscriber::filter::LevelFilter::WARN.into())
}

/// Installs the global subscriber.
///
/// Returns `Ok(false)` if a subscriber was already installed, so calling this
/// more than once is harmless.
pub fn init_logging(config: &LogConfig) -> Result<bool, ConfigError> {
    let filter = config.env_filter()?;
    let span_events = if config.include_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match config.format {
        LogFormat::Json => subscriber
            .with(fmt::layer().json().with_span_events(span_events))
            .try_init(),
        LogFormat::Pretty => subscriber
            .with(fmt::layer().pretty().with_ansi(true).with_span_events(span_events))
            .try_init(),
        LogFormat::Compact => subscriber
            .with(
                fmt::layer()
                    .compact()
                    .with_ansi(true)
                    .with_target(false)
                    .with_span_events(span_events),
            )
            .try_init(),
    };

    Ok(installed.is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("compact"), LogFormat::Compact);
        assert_eq!(LogFormat::parse("nonsense"), LogFormat::Compact);
    }

    #[test]
    fn test_log_config_serde() {
        let config: LogConfig = toml::from_str("format = \"json\"").unwrap();
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.level, "info");
    }

    #[test]
    fn test_invalid_level_rejected() {
        if env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = LogConfig {
            level: "contentflow=[".to_string(),
            ..LogConfig::default()
        };
        assert!(matches!(config.env_filter(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_init_is_repeatable() {
        let config = LogConfig::default();
        let _ = init_logging(&config).unwrap();
        assert!(!init_logging(&config).unwrap());
    }
}
