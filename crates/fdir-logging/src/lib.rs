use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub use tracing::{debug, error, info, instrument, trace, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Level filter, overridden by `RUST_LOG` when set.
    #[serde(default = "default_level")]
    pub level: String,

    /// Directory for rolling log files. No file output when unset.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    #[serde(default = "default_prefix")]
    pub file_prefix: String,

    /// "hourly", "daily" or "never".
    #[serde(default = "default_rotation")]
    pub rotation: String,

    #[serde(default)]
    pub json_format: bool,

    #[serde(default = "default_true")]
    pub console_output: bool,
}

fn default_level() -> String {
    "info".into()
}

fn default_prefix() -> String {
    "fdir".into()
}

fn default_rotation() -> String {
    "hourly".into()
}

fn default_true() -> bool {
    true
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: default_level(),
            log_dir: None,
            file_prefix: default_prefix(),
            rotation: default_rotation(),
            json_format: false,
            console_output: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log level `{0}`")]
    InvalidLevel(String),

    #[error("failed to create log file appender: {0}")]
    Appender(#[from] rolling::InitError),

    #[error("a global subscriber is already installed: {0}")]
    AlreadyInitialized(#[from] tracing_subscriber::util::TryInitError),
}

fn rotation_of(name: &str) -> rolling::Rotation {
    match name {
        "daily" => rolling::Rotation::DAILY,
        "never" => rolling::Rotation::NEVER,
        _ => rolling::Rotation::HOURLY,
    }
}

fn build_filter(config: &LogConfig) -> Result<EnvFilter, LoggingError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|_| LoggingError::InvalidLevel(config.level.clone())),
    }
}

/// Install the global subscriber described by `config`.
///
/// The returned guard flushes the non-blocking file writer on drop and must
/// be held for the lifetime of the process.
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>, LoggingError> {
    let registry = tracing_subscriber::registry().with(build_filter(config)?);

    let console_layer: Option<Box<dyn tracing_subscriber::Layer<_> + Send + Sync>> =
        match (config.console_output, config.json_format) {
            (false, _) => None,
            (true, true) => Some(Box::new(fmt::layer().json())),
            (true, false) => Some(Box::new(fmt::layer())),
        };

    let (file_layer, guard): (
        Option<Box<dyn tracing_subscriber::Layer<_> + Send + Sync>>,
        Option<WorkerGuard>,
    ) = match config.log_dir {
        Some(ref log_dir) => {
            let appender = rolling::RollingFileAppender::builder()
                .rotation(rotation_of(&config.rotation))
                .filename_prefix(&config.file_prefix)
                .filename_suffix("log")
                .build(log_dir)?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer: Box<dyn tracing_subscriber::Layer<_> + Send + Sync> = if config.json_format
            {
                Box::new(fmt::layer().json().with_ansi(false).with_writer(writer))
            } else {
                Box::new(fmt::layer().with_ansi(false).with_writer(writer))
            };
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    registry.with(console_layer).with(file_layer).try_init()?;
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_toml() {
        let config: LogConfig = toml::from_str("").unwrap();
        assert_eq!(config, LogConfig::default());
        assert_eq!(config.file_prefix, "fdir");
        assert!(config.console_output);
    }

    #[test]
    fn test_rotation_names() {
        assert_eq!(rotation_of("daily"), rolling::Rotation::DAILY);
        assert_eq!(rotation_of("never"), rolling::Rotation::NEVER);
        assert_eq!(rotation_of("hourly"), rolling::Rotation::HOURLY);
        assert_eq!(rotation_of("weekly"), rolling::Rotation::HOURLY);
    }

    #[test]
    fn test_invalid_level_is_reported() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = LogConfig {
            level: "fdir=not_a_level".into(),
            ..LogConfig::default()
        };
        assert!(matches!(
            build_filter(&config),
            Err(LoggingError::InvalidLevel(_))
        ));
    }
}
