//! User parameters and decoder slot configuration
//!
//! Everything here is control-plane data. Setters on the control handle
//! stage changes into a pending copy of [`UserParameters`]; the audio path
//! only ever sees the immutable snapshot the lifecycle manager builds from
//! them at the next safe reinitialization point.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use sf_core::{LayoutPreset, LoudspeakerLayout, ShNormalization, MAX_SH_ORDER};
use sf_dsp::NUM_BANDS;

/// Number of decoder slots (low- and high-frequency)
pub const NUM_DECODERS: usize = 2;

/// Decoding method for one decoder slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecodingMethod {
    /// Sampling decoder (SAD): transposed encoding matrix
    Sampling,
    /// Mode matching (MMD): regularized pseudoinverse
    ModeMatching,
    /// Energy preserving (EPAD-style row normalization)
    EnergyPreserving,
    /// All-round Ambisonic decoding: projection onto a dense virtual grid,
    /// panned to the real loudspeakers
    AllRad,
}

/// Diffuse-field EQ approach: which normalization scalar the frame
/// processor applies for a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiffuseFieldEq {
    /// Preserve omnidirectional amplitude across orders/decoders
    AmplitudePreserving = 0,
    /// Preserve omnidirectional energy across orders/decoders
    EnergyPreserving = 1,
}

/// Decoder slot selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecoderSlot {
    /// Bands below the transition frequency
    Low = 0,
    /// Bands at or above the transition frequency
    High = 1,
}

impl DecoderSlot {
    /// Both slots, low first
    pub const ALL: [DecoderSlot; NUM_DECODERS] = [DecoderSlot::Low, DecoderSlot::High];

    /// Index into per-slot tables
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Where the HRIR measurements come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HrtfSource {
    /// Bundled synthetic spherical-head set
    Default,
    /// Directory of per-direction stereo WAV files named
    /// `azi<az>_elev<el>.wav`
    WavDirectory(PathBuf),
}

/// Per-slot decoder configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SlotConfig {
    /// Decoding strategy
    pub method: DecodingMethod,
    /// Apply maxrE weighting
    pub max_re: bool,
    /// Which normalization scalar the processor applies
    pub diffuse_eq: DiffuseFieldEq,
}

/// Full user-facing decoder configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserParameters {
    /// Master decoding order, 1..=MAX_SH_ORDER
    pub master_order: usize,
    /// Requested decoding order per frequency band (clamped to the
    /// effective master order at rebuild)
    pub order_per_band: Vec<usize>,
    /// Transition frequency between the two decoder slots, Hz
    pub transition_hz: f32,
    /// Output loudspeaker layout
    pub layout: LoudspeakerLayout,
    /// Convolve loudspeaker feeds with HRTFs into a 2-channel output
    pub binaural: bool,
    /// Per-slot decoder configuration, [low, high]
    pub slots: [SlotConfig; NUM_DECODERS],
    /// HRIR measurement source
    pub hrtf_source: HrtfSource,
    /// Input normalization convention (ACN ordering is fixed)
    pub normalization: ShNormalization,
}

impl Default for UserParameters {
    fn default() -> Self {
        Self {
            master_order: 1,
            order_per_band: vec![1; NUM_BANDS],
            transition_hz: 800.0,
            layout: LoudspeakerLayout::preset(LayoutPreset::Quad),
            binaural: false,
            slots: [
                SlotConfig {
                    method: DecodingMethod::AllRad,
                    max_re: false,
                    diffuse_eq: DiffuseFieldEq::AmplitudePreserving,
                },
                SlotConfig {
                    method: DecodingMethod::AllRad,
                    max_re: true,
                    diffuse_eq: DiffuseFieldEq::EnergyPreserving,
                },
            ],
            hrtf_source: HrtfSource::Default,
            normalization: ShNormalization::Sn3d,
        }
    }
}

impl UserParameters {
    /// Clamp a requested master order to the supported range
    pub fn clamp_master_order(order: usize) -> usize {
        order.clamp(1, MAX_SH_ORDER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_parameters() {
        let p = UserParameters::default();
        assert_eq!(p.master_order, 1);
        assert_eq!(p.order_per_band.len(), NUM_BANDS);
        assert!(!p.binaural);
        assert_eq!(p.slots[DecoderSlot::High.index()].max_re, true);
    }

    #[test]
    fn test_parameters_serde_roundtrip() {
        let p = UserParameters::default();
        let json = serde_json::to_string(&p).unwrap();
        let back: UserParameters = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn test_clamp_master_order() {
        assert_eq!(UserParameters::clamp_master_order(0), 1);
        assert_eq!(UserParameters::clamp_master_order(9), MAX_SH_ORDER);
        assert_eq!(UserParameters::clamp_master_order(3), 3);
    }
}
