//! Decoder error taxonomy
//!
//! Rebuild failures never cross into the audio path; they are captured by
//! the lifecycle manager and surfaced through its status channel. The three
//! recoverable/fatal flavors mirror how the lifecycle reacts:
//! configuration problems keep the last-good snapshot, resource problems
//! fall back to the default HRTF set, invariant violations abort the
//! rebuild attempt.

use thiserror::Error;

/// Decoder error types
#[derive(Error, Debug)]
pub enum DecoderError {
    /// Invalid or degenerate configuration (order, loudspeaker count,
    /// geometry); recoverable, the previous snapshot stays live
    #[error("Configuration error: {0}")]
    Config(String),

    /// Missing or corrupt external resource (HRIR files); recoverable by
    /// falling back to the bundled default set
    #[error("Resource error: {0}")]
    Resource(String),

    /// Internal dimension/consistency violation; fatal to the current
    /// rebuild attempt only
    #[error("Internal invariant violation: {0}")]
    Invariant(String),

    /// Transform engine error
    #[error(transparent)]
    Dsp(#[from] sf_dsp::DspError),

    /// Core math error
    #[error(transparent)]
    Core(#[from] sf_core::CoreError),
}

/// Result type for decoder operations
pub type DecoderResult<T> = Result<T, DecoderError>;
