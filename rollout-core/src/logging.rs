use serde::{Deserialize, Serialize};
use std::io;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format (text, json, compact)
    pub format: LogFormat,
    /// Whether to include file and line numbers
    pub include_location: bool,
    /// Whether to include span open/close events
    pub include_spans: bool,
}

/// Log output formats
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable text format
    Text,
    /// JSON format for structured logging
    Json,
    /// Compact text format
    Compact,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            include_location: false,
            include_spans: false,
        }
    }
}

/// Initialize logging with the given configuration
pub fn init_logging(config: &LogConfig) -> crate::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level))
        .add_directive(
            format!("rollout={}", config.level)
                .parse()
                .map_err(|e| crate::RolloutError::config(format!("Invalid log level: {}", e)))?,
        );

    let registry = tracing_subscriber::registry().with(env_filter);

    let span_events = if config.include_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    match config.format {
        LogFormat::Text => {
            let layer = fmt::layer()
                .with_target(true)
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_span_events(span_events)
                .with_writer(io::stderr);

            registry.with(layer).try_init().map_err(|e| {
                crate::RolloutError::config(format!("Failed to initialize logging: {}", e))
            })?;
        }
        LogFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_target(true)
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_span_events(span_events)
                .with_writer(io::stderr);

            registry.with(layer).try_init().map_err(|e| {
                crate::RolloutError::config(format!("Failed to initialize logging: {}", e))
            })?;
        }
        LogFormat::Compact => {
            let layer = fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(io::stderr);

            registry.with(layer).try_init().map_err(|e| {
                crate::RolloutError::config(format!("Failed to initialize logging: {}", e))
            })?;
        }
    }

    tracing::debug!(level = %config.level, format = ?config.format, "Logging initialized");

    Ok(())
}

/// Configure logging for CLI invocations
pub fn init_cli_logging() -> crate::Result<()> {
    let config = LogConfig {
        level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        format: LogFormat::Compact,
        include_location: false,
        include_spans: false,
    };
    init_logging(&config)
}
