//! Error types for core spatial math

use thiserror::Error;

/// Core error types
#[derive(Error, Debug)]
pub enum CoreError {
    /// Ambisonic order outside the supported range
    #[error("Invalid Ambisonic order: {0} (max supported: 7)")]
    InvalidOrder(usize),

    /// Loudspeaker layout cannot be used
    #[error("Invalid loudspeaker layout: {0}")]
    InvalidLayout(String),

    /// Direction with non-finite components
    #[error("Invalid direction: azimuth {azimuth}, elevation {elevation}")]
    InvalidDirection { azimuth: f32, elevation: f32 },
}

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;
