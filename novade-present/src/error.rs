//! Error handling for the presentation backend.
//!
//! [`PresentError`] is what every fallible operation of this crate returns.
//! Callers on the Direct3D side only understand a handful of result codes, so
//! each error also maps onto a [`ResultCode`] via [`PresentError::code`].

use std::path::PathBuf;

use novade_dri2::Dri2Error;
use thiserror::Error;

/// The result codes reported to the rendering adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    Ok,
    InvalidCall,
    DriverInternalError,
    OutOfMemory,
}

impl ResultCode {
    /// The Direct3D `HRESULT` value of this code.
    pub const fn as_hresult(self) -> i32 {
        match self {
            ResultCode::Ok => 0,
            ResultCode::InvalidCall => 0x8876_086C_u32 as i32,
            ResultCode::DriverInternalError => 0x8876_0827_u32 as i32,
            ResultCode::OutOfMemory => 0x8007_000E_u32 as i32,
        }
    }
}

/// Errors of the presentation backend.
#[derive(Debug, Error)]
pub enum PresentError {
    /// The caller passed arguments the operation cannot accept. Nothing was changed.
    #[error("Invalid call: {0}")]
    InvalidCall(String),

    /// The backend could not complete an otherwise valid request.
    #[error("Driver internal error: {0}")]
    DriverInternal(String),

    #[error("Out of memory")]
    OutOfMemory,

    /// The driver cannot be used on this system.
    /// Contains the reason found while probing.
    #[error("Native Direct3D is unavailable: {0}")]
    Unavailable(String),

    /// A DRI2 or XFixes request failed.
    #[error("Protocol Error: {0}")]
    Protocol(#[from] Dri2Error),

    /// Opening or querying a DRM device node failed.
    #[error("DRM device {path:?}: {source}")]
    Device {
        path: PathBuf,
        #[source]
        source: nix::errno::Errno,
    },

    /// Errors related to configuration loading, parsing, or validation.
    #[error("Configuration Error: {0}")]
    Config(#[from] ConfigError),

    /// The global tracing subscriber could not be installed.
    #[error("Logging Initialization Failed: {0}")]
    LoggingInitialization(String),

    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),
}

impl PresentError {
    /// The result code reported for this error.
    pub fn code(&self) -> ResultCode {
        match self {
            PresentError::InvalidCall(_) => ResultCode::InvalidCall,
            PresentError::OutOfMemory => ResultCode::OutOfMemory,
            PresentError::DriverInternal(_)
            | PresentError::Unavailable(_)
            | PresentError::Protocol(_)
            | PresentError::Device { .. }
            | PresentError::Config(_)
            | PresentError::LoggingInitialization(_)
            | PresentError::Io(_) => ResultCode::DriverInternalError,
        }
    }

    pub(crate) fn invalid_call(message: impl Into<String>) -> Self {
        PresentError::InvalidCall(message.into())
    }

    pub(crate) fn driver_internal(message: impl Into<String>) -> Self {
        PresentError::DriverInternal(message.into())
    }
}

/// Converts a result into the code reported to the adapter.
pub fn result_code<T>(result: &Result<T, PresentError>) -> ResultCode {
    match result {
        Ok(_) => ResultCode::Ok,
        Err(err) => err.code(),
    }
}

/// Error type for configuration-related operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An error occurred while attempting to read a configuration file.
    #[error("Failed to read configuration file from {path:?}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML or does not match the schema.
    #[error("Failed to parse configuration file: {0}")]
    ParseError(#[from] toml::de::Error),

    /// A value parsed fine but is out of range.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
