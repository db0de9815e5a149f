//! Logging setup for hosts that do not install their own subscriber.
//!
//! The backend itself only emits `tracing` events. A host that already has a
//! subscriber can ignore this module entirely.

use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::PresentError;

/// Initializes a minimal logging setup, directing messages to `stderr`.
///
/// Filters on `RUST_LOG`, defaulting to "info". Errors (e.g. a subscriber
/// already being installed) are ignored.
pub fn init_minimal_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()));

    let _ = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .try_init();
}

/// Parses a configured level name.
pub fn parse_level(level: &str) -> Result<Level, PresentError> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        invalid => Err(PresentError::LoggingInitialization(format!(
            "Invalid log level in config: {invalid}"
        ))),
    }
}

/// Installs a global `stderr` subscriber configured by `config`.
///
/// # Errors
///
/// Returns `PresentError::LoggingInitialization` for an invalid level or if a
/// global subscriber is already set.
pub fn init_logging(config: &LoggingConfig) -> Result<(), PresentError> {
    let level = parse_level(&config.level)?;
    let filter = EnvFilter::new(level.to_string());

    let result = match config.format.to_lowercase().as_str() {
        "json" => fmt::Subscriber::builder()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init(),
        _ => fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(atty::is(atty::Stream::Stderr))
            .try_init(),
    };

    result.map_err(|e| {
        PresentError::LoggingInitialization(format!(
            "Failed to set global tracing subscriber. Was it already initialized? Error: {e}"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names_parse() {
        assert_eq!(parse_level("warn").unwrap(), Level::WARN);
        assert_eq!(parse_level("TRACE").unwrap(), Level::TRACE);
        assert!(matches!(
            parse_level("verbose"),
            Err(PresentError::LoggingInitialization(_))
        ));
    }

    #[test]
    fn second_initialization_is_reported() {
        init_minimal_logging();
        let config = LoggingConfig::default();
        assert!(init_logging(&config).is_err());
    }

    #[test]
    fn invalid_level_fails_before_installing() {
        let config = LoggingConfig {
            level: "chatty".to_string(),
            format: "text".to_string(),
        };
        assert!(matches!(
            init_logging(&config),
            Err(PresentError::LoggingInitialization(msg)) if msg.contains("chatty")
        ));
    }
}
