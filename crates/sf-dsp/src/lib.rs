//! Soundfield signal plumbing
//!
//! The time-frequency collaborators consumed by the decoder core:
//! - [`StftEngine`]: overlapping STFT forward/inverse transform with a fixed
//!   hop and a fixed, reported latency
//! - [`TfFrame`]: contiguously allocated bands x channels x slots spectra
//! - [`hrir_band_response`]: HRIR to per-band complex response conversion

mod error;
mod response;
mod stft;

pub use error::{DspError, DspResult};
pub use response::hrir_band_response;
pub use stft::{StftEngine, TfFrame, FFT_SIZE, HOP_SIZE, NUM_BANDS};
