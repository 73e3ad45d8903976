//! Logging setup for processes embedding the presence core

use crate::error::{Result, SignalingError};
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt};

/// Target of this crate's own log lines
const CORE_TARGET: &str = "peerlink_presence_core";

/// Output format of the installed subscriber
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Subscriber settings for one process
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Level applied to the application and the presence core
    pub level: Level,
    pub format: LogFormat,
    /// Binary name; its crate target shares `level`, dependencies stay at `warn`
    pub app_name: String,
}

impl LoggingConfig {
    pub fn new(level: Level, app_name: impl Into<String>) -> Self {
        Self {
            level,
            format: LogFormat::Text,
            app_name: app_name.into(),
        }
    }

    pub fn with_json(mut self) -> Self {
        self.format = LogFormat::Json;
        self
    }

    /// Filter used when `RUST_LOG` is unset
    pub fn default_directives(&self) -> String {
        let level = self.level.as_str().to_ascii_lowercase();
        let app_target = self.app_name.replace('-', "_");
        format!("warn,{}={},{}={}", app_target, level, CORE_TARGET, level)
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` replaces the default directives when set. Fails if a global
/// subscriber is already installed.
pub fn setup_logging(config: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(config.default_directives())
            .map_err(|e| SignalingError::config(format!("Invalid log filter: {}", e)))?,
    };

    let builder = fmt::Subscriber::builder().with_env_filter(filter);
    let installed = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().with_current_span(false).try_init(),
    };

    installed.map_err(|e| {
        SignalingError::config(format!("Failed to install logger for {}: {}", config.app_name, e))
    })
}

pub fn parse_log_level(level: &str) -> Result<Level> {
    Level::from_str(level).map_err(|_| SignalingError::config(format!("Invalid log level: {}", level)))
}

/// First line every embedding process logs
pub fn log_welcome(config: &LoggingConfig, version: &str) {
    tracing::info!("Starting {} v{} (presence core v{})", config.app_name, version, crate::VERSION);
}
