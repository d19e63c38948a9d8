//! Log output for the CLI
//!
//! Logs go to stderr so command output on stdout stays scriptable.

use std::io;
use std::str::FromStr;

use tracing_subscriber::{fmt::Layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(LogFormat::Text),
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}' (expected text, pretty or json)", other)),
        }
    }
}

/// Logging configuration for the CLI
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "warn")
    pub level: String,
    pub format: LogFormat,
    /// Environment filter (supports directives like "migra=debug,sqlx=warn")
    pub env_filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            env_filter: None,
        }
    }
}

impl LoggingConfig {
    pub fn new(level: impl Into<String>, format: LogFormat) -> Self {
        Self {
            level: level.into(),
            format,
            env_filter: None,
        }
    }

    /// Debug output for migra itself; other crates stay at the configured
    /// level and sqlx's per-query logging stays quiet
    pub fn verbose(mut self) -> Self {
        let base = self.level.to_lowercase();
        self.env_filter = Some(format!("{base},migra=debug,sqlx=warn"));
        self.level = "debug".to_string();
        self
    }

    /// Directive string handed to [`EnvFilter`] when `RUST_LOG` is unset
    pub fn filter_directives(&self) -> String {
        self.env_filter
            .clone()
            .unwrap_or_else(|| format!("{level},sqlx=warn", level = self.level.to_lowercase()))
    }
}

/// Install the global subscriber; `RUST_LOG` wins over the configuration
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(config.filter_directives()))?;

    match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(Layer::new().with_writer(io::stderr).json())
            .try_init()?,
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(Layer::new().with_writer(io::stderr).pretty())
            .try_init()?,
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(Layer::new().with_writer(io::stderr).with_target(false))
            .try_init()?,
    }

    tracing::debug!(level = %config.level, format = ?config.format, "logging initialized");
    Ok(())
}
