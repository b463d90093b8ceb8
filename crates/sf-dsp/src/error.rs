//! Error types for the transform engine

use thiserror::Error;

/// DSP error types
#[derive(Error, Debug)]
pub enum DspError {
    /// Frame size must be a positive multiple of the hop size
    #[error("Invalid frame size: {0} (must be a positive multiple of the 128-sample hop)")]
    InvalidFrameSize(usize),

    /// Channel count mismatch between engine and buffer
    #[error("Channel count mismatch: expected {expected}, got {got}")]
    ChannelMismatch { expected: usize, got: usize },

    /// Buffer length mismatch
    #[error("Buffer size mismatch: expected {expected}, got {got}")]
    BufferSizeMismatch { expected: usize, got: usize },
}

/// Result type for DSP operations
pub type DspResult<T> = Result<T, DspError>;
