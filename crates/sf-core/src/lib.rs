//! Soundfield core types
//!
//! Shared vocabulary for the Ambisonic decoder workspace:
//! - Directions and unit-vector math
//! - Real spherical-harmonic basis (ACN ordering, SN3D/N3D normalization)
//!   up to 7th order, plus maxrE weighting
//! - Loudspeaker layouts and array presets

mod error;
mod layout;
mod sh;
mod vec3;

pub use error::{CoreError, CoreResult};
pub use layout::{LayoutPreset, Loudspeaker, LoudspeakerLayout, MIN_LOUDSPEAKERS};
pub use sh::{
    acn_index, acn_to_degree_order, max_re_weights, num_harmonics, sh_basis, MAX_SH_ORDER,
    ShNormalization,
};
pub use vec3::{Direction, Vec3};

/// Number of ears, true for most humans.
pub const NUM_EARS: usize = 2;
