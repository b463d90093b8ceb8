//! Frequency-dependent Ambisonic loudspeaker decoder
//!
//! Decodes ACN-ordered spherical harmonic signals to loudspeaker feeds, or
//! binaurally to headphones, with independent low- and high-frequency
//! decoder slots split at a configurable transition frequency. Decoding
//! runs per STFT band, so the decoding order, method, maxrE weighting, and
//! diffuse-field EQ can all differ across the spectrum.
//!
//! The crate splits into a control half ([`DecoderControl`]) that owns
//! parameters and rebuilds decoding state, and an audio half
//! ([`DecoderProcessor`]) that decodes frames without locking or
//! allocating. [`create`] wires the two together.
//!
//! ```no_run
//! use sf_decoder::create;
//!
//! let (mut control, mut processor) = create(48000, 512)?;
//! control.set_binaural(true);
//! control.tick();
//!
//! let input = vec![vec![0.0f32; 512]; 4]; // first-order ACN
//! let mut output = vec![vec![0.0f32; 512]; 2];
//! processor.process(&input, &mut output)?;
//! # Ok::<(), sf_decoder::DecoderError>(())
//! ```

pub mod codec;
pub mod error;
pub mod hrtf;
pub mod matrix;
pub mod params;
pub mod processor;
pub mod vbap;

pub use codec::{
    create, CodecStatus, DecoderControl, ProcessingState, ProgressReport, Snapshot,
};
pub use error::{DecoderError, DecoderResult};
pub use hrtf::{BinauralTable, HrirSet, HrtfEngine, HrtfFilterbank};
pub use matrix::{build_decode_matrix, DecodingMatrixSet};
pub use params::{
    DecoderSlot, DecodingMethod, DiffuseFieldEq, HrtfSource, SlotConfig, UserParameters,
    NUM_DECODERS,
};
pub use processor::DecoderProcessor;
pub use vbap::SphericalTriangulation;
