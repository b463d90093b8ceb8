//! Loudspeaker layouts and array presets

use serde::{Deserialize, Serialize};

use crate::vec3::Direction;

/// Minimum loudspeaker count for safe triangulation-based decoders
pub const MIN_LOUDSPEAKERS: usize = 4;

/// Single loudspeaker definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loudspeaker {
    /// Label (e.g., "L", "R", "Ls")
    pub label: String,
    /// Direction relative to the listening position
    pub direction: Direction,
}

impl Loudspeaker {
    /// Create new loudspeaker
    pub fn new(label: &str, azimuth: f32, elevation: f32) -> Self {
        Self {
            label: label.to_string(),
            direction: Direction::new(azimuth, elevation),
        }
    }
}

/// Loudspeaker layout configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoudspeakerLayout {
    /// Layout name
    pub name: String,
    /// Loudspeakers in channel order
    pub speakers: Vec<Loudspeaker>,
}

/// Built-in loudspeaker array presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayoutPreset {
    /// 2.0 stereo pair
    Stereo,
    /// Horizontal quad at +/-45, +/-135
    Quad,
    /// ITU 5.0 (no LFE)
    Surround5_0,
    /// ITU 7.0 (no LFE)
    Surround7_0,
    /// Horizontal octagon
    Octagon,
    /// Cube corners (+/-45, +/-135 at +/-35.3 elevation)
    Cube,
    /// 12-channel dome: octagon plus four height speakers
    Dome12,
}

impl LoudspeakerLayout {
    /// Build a layout from explicit directions
    pub fn from_directions(name: &str, directions: &[Direction]) -> Self {
        Self {
            name: name.to_string(),
            speakers: directions
                .iter()
                .enumerate()
                .map(|(i, d)| Loudspeaker {
                    label: format!("S{i}"),
                    direction: *d,
                })
                .collect(),
        }
    }

    /// Look up an array preset
    pub fn preset(preset: LayoutPreset) -> Self {
        match preset {
            LayoutPreset::Stereo => Self {
                name: "Stereo".into(),
                speakers: vec![
                    Loudspeaker::new("L", 30.0, 0.0),
                    Loudspeaker::new("R", -30.0, 0.0),
                ],
            },
            LayoutPreset::Quad => Self {
                name: "Quad".into(),
                speakers: vec![
                    Loudspeaker::new("FL", 45.0, 0.0),
                    Loudspeaker::new("FR", -45.0, 0.0),
                    Loudspeaker::new("BL", 135.0, 0.0),
                    Loudspeaker::new("BR", -135.0, 0.0),
                ],
            },
            LayoutPreset::Surround5_0 => Self {
                name: "5.0".into(),
                speakers: vec![
                    Loudspeaker::new("L", 30.0, 0.0),
                    Loudspeaker::new("R", -30.0, 0.0),
                    Loudspeaker::new("C", 0.0, 0.0),
                    Loudspeaker::new("Ls", 110.0, 0.0),
                    Loudspeaker::new("Rs", -110.0, 0.0),
                ],
            },
            LayoutPreset::Surround7_0 => Self {
                name: "7.0".into(),
                speakers: vec![
                    Loudspeaker::new("L", 30.0, 0.0),
                    Loudspeaker::new("R", -30.0, 0.0),
                    Loudspeaker::new("C", 0.0, 0.0),
                    Loudspeaker::new("Lss", 90.0, 0.0),
                    Loudspeaker::new("Rss", -90.0, 0.0),
                    Loudspeaker::new("Lsr", 135.0, 0.0),
                    Loudspeaker::new("Rsr", -135.0, 0.0),
                ],
            },
            LayoutPreset::Octagon => {
                let speakers = (0..8)
                    .map(|i| {
                        let az = 22.5 + 45.0 * i as f32;
                        let az = if az > 180.0 { az - 360.0 } else { az };
                        Loudspeaker::new(&format!("S{i}"), az, 0.0)
                    })
                    .collect();
                Self {
                    name: "Octagon".into(),
                    speakers,
                }
            }
            LayoutPreset::Cube => Self {
                name: "Cube".into(),
                speakers: vec![
                    Loudspeaker::new("FLU", 45.0, 35.3),
                    Loudspeaker::new("FRU", -45.0, 35.3),
                    Loudspeaker::new("BLU", 135.0, 35.3),
                    Loudspeaker::new("BRU", -135.0, 35.3),
                    Loudspeaker::new("FLD", 45.0, -35.3),
                    Loudspeaker::new("FRD", -45.0, -35.3),
                    Loudspeaker::new("BLD", 135.0, -35.3),
                    Loudspeaker::new("BRD", -135.0, -35.3),
                ],
            },
            LayoutPreset::Dome12 => {
                let mut speakers: Vec<Loudspeaker> = (0..8)
                    .map(|i| {
                        let az = 22.5 + 45.0 * i as f32;
                        let az = if az > 180.0 { az - 360.0 } else { az };
                        Loudspeaker::new(&format!("M{i}"), az, 0.0)
                    })
                    .collect();
                speakers.push(Loudspeaker::new("U0", 45.0, 45.0));
                speakers.push(Loudspeaker::new("U1", -45.0, 45.0));
                speakers.push(Loudspeaker::new("U2", 135.0, 45.0));
                speakers.push(Loudspeaker::new("U3", -135.0, 45.0));
                Self {
                    name: "Dome 12".into(),
                    speakers,
                }
            }
        }
    }

    /// Number of loudspeakers
    pub fn len(&self) -> usize {
        self.speakers.len()
    }

    /// True when the layout has no loudspeakers
    pub fn is_empty(&self) -> bool {
        self.speakers.is_empty()
    }

    /// Directions in channel order
    pub fn directions(&self) -> Vec<Direction> {
        self.speakers.iter().map(|s| s.direction).collect()
    }

    /// Dimensionality estimate: 2 when every elevation is zero, else 3
    ///
    /// A tilted ring that never touches the horizontal plane still counts
    /// as 3-D; only exact horizontal-only setups report 2.
    pub fn dims(&self) -> usize {
        let elev_sum: f32 = self
            .speakers
            .iter()
            .map(|s| s.direction.elevation.abs())
            .sum();
        if elev_sum < 1e-3 { 2 } else { 3 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_counts() {
        assert_eq!(LoudspeakerLayout::preset(LayoutPreset::Stereo).len(), 2);
        assert_eq!(LoudspeakerLayout::preset(LayoutPreset::Quad).len(), 4);
        assert_eq!(LoudspeakerLayout::preset(LayoutPreset::Surround7_0).len(), 7);
        assert_eq!(LoudspeakerLayout::preset(LayoutPreset::Dome12).len(), 12);
    }

    #[test]
    fn test_dims_detection() {
        assert_eq!(LoudspeakerLayout::preset(LayoutPreset::Quad).dims(), 2);
        assert_eq!(LoudspeakerLayout::preset(LayoutPreset::Cube).dims(), 3);
    }

    #[test]
    fn test_layout_serde_roundtrip() {
        let layout = LoudspeakerLayout::preset(LayoutPreset::Surround5_0);
        let json = serde_json::to_string(&layout).unwrap();
        let back: LoudspeakerLayout = serde_json::from_str(&json).unwrap();
        assert_eq!(back, layout);
    }

    #[test]
    fn test_layout_equality() {
        let quad = LoudspeakerLayout::preset(LayoutPreset::Quad);
        assert_eq!(quad, LoudspeakerLayout::preset(LayoutPreset::Quad));
        assert_ne!(quad, LoudspeakerLayout::preset(LayoutPreset::Cube));

        let mut moved = quad.clone();
        moved.speakers[0].direction = Direction::new(40.0, 0.0);
        assert_ne!(quad, moved);
    }
}
