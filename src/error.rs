//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the failures that can occur between the serial line and the exported data file.
//!
//! ## Error Hierarchy
//!
//! - **`Transport`**: The port could not be opened, a write/flush failed, or no response
//!   line arrived before the read timed out.
//! - **`Parse`**: The instrument answered, but the first field of the response is not a number.
//! - **`Validation`**: Rejected before any I/O is attempted (no device selected, unknown
//!   device, missing export fields, ...).
//! - **`Busy`**: The transport is held by another caller. On the sampling path this is a
//!   skip signal, not a failure.
//! - **`InitializationFailed`**: One step of the fixed device setup sequence failed. The
//!   remaining steps were not issued and the device is left in whatever state the
//!   completed steps produced.
//! - **`Config`** / **`Configuration`**: Configuration could not be loaded, or loaded but
//!   holds values that make no sense.
//!
//! By using `#[from]`, `DaqError` can be created from underlying error types,
//! simplifying error handling with the `?` operator.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

#[derive(Error, Debug)]
pub enum DaqError {
    #[error("Transport error on '{device}': {message}")]
    Transport { device: String, message: String },

    #[error("Failed to parse instrument response '{response}': {reason}")]
    Parse { response: String, reason: String },

    #[error("{0}")]
    Validation(String),

    #[error("Transport is busy")]
    Busy,

    #[error("Initialization step {step} ('{command}') failed: {source}")]
    InitializationFailed {
        step: usize,
        command: String,
        #[source]
        source: Box<DaqError>,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial support not enabled. Rebuild with --features instrument_serial")]
    SerialFeatureDisabled,
}

impl DaqError {
    /// Build a [`DaqError::Transport`] for `device`.
    pub fn transport(device: &str, message: impl std::fmt::Display) -> Self {
        DaqError::Transport {
            device: device.to_string(),
            message: message.to_string(),
        }
    }

    /// Build a [`DaqError::Parse`] for the raw `response`.
    pub fn parse(response: &str, reason: impl std::fmt::Display) -> Self {
        DaqError::Parse {
            response: response.to_string(),
            reason: reason.to_string(),
        }
    }

    /// 1-based index of the failed setup step, if this is an initialization failure.
    pub fn failed_step(&self) -> Option<usize> {
        match self {
            DaqError::InitializationFailed { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// Whether the error is a per-reading I/O or decode failure.
    ///
    /// The sampling loop logs these and keeps going.
    pub fn is_sample_failure(&self) -> bool {
        matches!(self, DaqError::Transport { .. } | DaqError::Parse { .. })
    }
}
