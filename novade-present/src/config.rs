//! Driver configuration.
//!
//! All fields have defaults, so an empty or missing file yields a working
//! configuration. Values are checked by [`PresentConfig::validate`] after
//! parsing.
//!
//! ```toml
//! [dri2_version]
//! major = 1
//! minor = 4
//!
//! [fallback_size]
//! width = 800
//! height = 600
//!
//! [logging]
//! level = "debug"
//! format = "json"
//! ```

use std::fs;
use std::path::Path;

use novade_dri2::{Version, DRI2_VERSION, XFIXES_VERSION};
use serde::Deserialize;

use crate::error::ConfigError;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: &[&str] = &["text", "json"];

/// A protocol version to request from the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VersionConfig {
    pub major: u32,
    pub minor: u32,
}

impl From<VersionConfig> for Version {
    fn from(v: VersionConfig) -> Self {
        Version::new(v.major, v.minor)
    }
}

impl From<Version> for VersionConfig {
    fn from(v: Version) -> Self {
        VersionConfig {
            major: v.major,
            minor: v.minor,
        }
    }
}

/// Back buffer size used when the window's client area cannot be queried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SizeConfig {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// One of "trace", "debug", "info", "warn", "error" (case-insensitive).
    #[serde(default = "defaults::log_level")]
    pub level: String,
    /// "text" or "json".
    #[serde(default = "defaults::log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        defaults::logging()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PresentConfig {
    #[serde(default = "defaults::dri2_version")]
    pub dri2_version: VersionConfig,
    #[serde(default = "defaults::xfixes_version")]
    pub xfixes_version: VersionConfig,
    #[serde(default = "defaults::fallback_size")]
    pub fallback_size: SizeConfig,
    #[serde(default = "defaults::logging")]
    pub logging: LoggingConfig,
}

impl Default for PresentConfig {
    fn default() -> Self {
        Self {
            dri2_version: defaults::dri2_version(),
            xfixes_version: defaults::xfixes_version(),
            fallback_size: defaults::fallback_size(),
            logging: defaults::logging(),
        }
    }
}

mod defaults {
    use super::*;

    pub(super) fn dri2_version() -> VersionConfig {
        DRI2_VERSION.into()
    }

    pub(super) fn xfixes_version() -> VersionConfig {
        XFIXES_VERSION.into()
    }

    pub(super) fn fallback_size() -> SizeConfig {
        SizeConfig {
            width: 640,
            height: 480,
        }
    }

    pub(super) fn log_level() -> String {
        "info".to_string()
    }

    pub(super) fn log_format() -> String {
        "text".to_string()
    }

    pub(super) fn logging() -> LoggingConfig {
        LoggingConfig {
            level: log_level(),
            format: log_format(),
        }
    }
}

impl PresentConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: PresentConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Normalizes case and rejects values the backend cannot use.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.fallback_size.width == 0 || self.fallback_size.height == 0 {
            return Err(ConfigError::ValidationError(format!(
                "fallback_size must not be empty, got {}x{}",
                self.fallback_size.width, self.fallback_size.height
            )));
        }
        if self.dri2_version.major != DRI2_VERSION.major {
            return Err(ConfigError::ValidationError(format!(
                "dri2_version.major must be {}, got {}",
                DRI2_VERSION.major, self.dri2_version.major
            )));
        }

        self.logging.level = self.logging.level.to_lowercase();
        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "invalid log level '{}', expected one of {LOG_LEVELS:?}",
                self.logging.level
            )));
        }
        self.logging.format = self.logging.format.to_lowercase();
        if !LOG_FORMATS.contains(&self.logging.format.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "invalid log format '{}', expected one of {LOG_FORMATS:?}",
                self.logging.format
            )));
        }
        Ok(())
    }
}

/// Loads a [`PresentConfig`] from disk.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path`. A missing or blank file gives the defaults.
    pub fn load_from_path(path: &Path) -> Result<PresentConfig, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(?path, "no configuration file, using defaults");
                return Ok(PresentConfig::default());
            }
            Err(e) => {
                return Err(ConfigError::ReadError {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        if content.trim().is_empty() {
            return Ok(PresentConfig::default());
        }
        PresentConfig::from_toml_str(&content)
    }
}
