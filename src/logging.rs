//! Tracing Infrastructure
//!
//! Structured, async-aware logging built on `tracing` and `tracing-subscriber`:
//! - Structured events with `run_id`, `device`, `phase` and `channel` fields
//! - Multiple output formats (pretty, compact, JSON)
//! - Environment-based filtering (`RUST_LOG` wins over the configured level)
//! - Integration with the configuration system
//!
//! # Example
//! ```no_run
//! use motor_tuner::{config::TunerConfig, logging};
//! use tracing::{info, warn};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TunerConfig::load()?;
//! logging::init_from_config(&config)?;
//!
//! info!("Tuning tool started");
//! warn!(device = "md#100", "Drive did not answer");
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::config::TunerConfig;
use crate::error::{AppResult, TunerError};

/// Output format for tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Pretty-printed format with colors (for development)
    Pretty,
    /// Compact single-line format (for the interactive console)
    #[default]
    Compact,
    /// JSON format for structured logging (for log aggregation)
    Json,
}

/// Tracing configuration options
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: Level,
    /// Output format
    pub format: OutputFormat,
    /// Whether to include span events (NEW, CLOSE)
    pub with_span_events: bool,
    /// Whether to include file and line numbers
    pub with_file_and_line: bool,
    /// Whether to include thread names
    pub with_thread_names: bool,
    /// Whether to enable ANSI colors (ignored for JSON)
    pub with_ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Compact,
            with_span_events: false,
            with_file_and_line: false,
            with_thread_names: false,
            with_ansi: true,
        }
    }
}

impl TracingConfig {
    /// Create tracing config from the application configuration
    pub fn from_config(config: &TunerConfig) -> AppResult<Self> {
        let level = parse_log_level(&config.application.log_level)?;

        Ok(Self {
            level,
            format: config.application.log_format,
            ..Default::default()
        })
    }

    /// Create tracing config with custom settings
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Set output format
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable span events
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }

    /// Enable or disable ANSI colors
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Initialize tracing from the application configuration
pub fn init_from_config(config: &TunerConfig) -> AppResult<()> {
    init(TracingConfig::from_config(config)?)
}

/// Initialize tracing with custom configuration
///
/// Idempotent: if a global subscriber is already installed this returns
/// `Ok(())`, which keeps it safe to call from tests and embedding binaries.
pub fn init(config: TracingConfig) -> AppResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_to_filter_string(config.level)));

    let span_events = if config.with_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        OutputFormat::Pretty => fmt::layer()
            .pretty()
            .with_span_events(span_events)
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_thread_names(config.with_thread_names)
            .with_ansi(config.with_ansi)
            .boxed(),
        OutputFormat::Compact => fmt::layer()
            .compact()
            .with_span_events(span_events)
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_thread_names(config.with_thread_names)
            .with_ansi(config.with_ansi)
            .boxed(),
        OutputFormat::Json => fmt::layer()
            .json()
            .with_span_events(span_events)
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_thread_names(config.with_thread_names)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(env_filter))
        .try_init()
        .or_else(|e| {
            // Another subscriber won the race; expected in tests.
            if e.to_string()
                .contains("a global default trace dispatcher has already been set")
            {
                Ok(())
            } else {
                Err(TunerError::Configuration(format!(
                    "Failed to initialize tracing: {}",
                    e
                )))
            }
        })
}

/// Parse log level string into tracing Level
pub fn parse_log_level(level: &str) -> AppResult<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(TunerError::Configuration(format!(
            "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        ))),
    }
}

fn level_to_filter_string(level: Level) -> String {
    level.as_str().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert!(matches!(parse_log_level("trace"), Ok(Level::TRACE)));
        assert!(matches!(parse_log_level("warn"), Ok(Level::WARN)));

        // Case insensitive
        assert!(matches!(parse_log_level("INFO"), Ok(Level::INFO)));
        assert!(matches!(parse_log_level("Debug"), Ok(Level::DEBUG)));

        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn test_tracing_config_from_app_config() {
        let mut config = TunerConfig::default();
        config.application.log_level = "debug".to_string();
        config.application.log_format = OutputFormat::Json;

        let tracing_config = TracingConfig::from_config(&config).unwrap();
        assert_eq!(tracing_config.level, Level::DEBUG);
        assert_eq!(tracing_config.format, OutputFormat::Json);
    }

    #[test]
    fn test_tracing_config_builder() {
        let config = TracingConfig::new(Level::WARN)
            .with_format(OutputFormat::Pretty)
            .with_span_events(true)
            .with_ansi(false);

        assert_eq!(config.level, Level::WARN);
        assert_eq!(config.format, OutputFormat::Pretty);
        assert!(config.with_span_events);
        assert!(!config.with_ansi);
    }
}
