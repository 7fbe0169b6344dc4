//! Unified error handling for the noisemap library.
//!
//! Validation failures are always recovered locally by the caller (the
//! offending fix, measurement or CSV row is dropped and counted). The other
//! variants describe failures owned by external collaborators.

use thiserror::Error;

/// A single input sample was rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// Latitude outside [-90, 90], longitude outside [-180, 180], or non-finite
    #[error("coordinates out of range: ({latitude}, {longitude})")]
    CoordinatesOutOfRange { latitude: f64, longitude: f64 },
    /// dB value that is not a finite number
    #[error("invalid sound level: {value}")]
    InvalidLevel { value: String },
    /// Field missing or not a number
    #[error("unparsable {field}: {value:?}")]
    Unparsable { field: &'static str, value: String },
}

/// Unified error type for noisemap operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NoiseMapError {
    /// Rejected input sample
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),
    /// Upstream fix/measurement source failed
    #[error("transport error: {message}")]
    Transport { message: String },
    /// Map rendering layer refused new data
    #[error("presentation error: {message}")]
    Presentation { message: String },
    /// Invalid session configuration
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl NoiseMapError {
    pub fn transport(message: impl Into<String>) -> Self {
        NoiseMapError::Transport {
            message: message.into(),
        }
    }

    pub fn presentation(message: impl Into<String>) -> Self {
        NoiseMapError::Presentation {
            message: message.into(),
        }
    }

    /// True for errors that only ever cost a single sample.
    pub fn is_validation(&self) -> bool {
        matches!(self, NoiseMapError::Validation(_))
    }
}

/// Result type alias for noisemap operations.
pub type Result<T> = std::result::Result<T, NoiseMapError>;
