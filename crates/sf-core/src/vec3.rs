//! Directions and unit-vector math

use serde::{Deserialize, Serialize};

/// 3D vector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    /// X coordinate (front/back, positive = front)
    pub x: f32,
    /// Y coordinate (left/right, positive = left)
    pub y: f32,
    /// Z coordinate (up/down, positive = up)
    pub z: f32,
}

impl Vec3 {
    /// Create new vector
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Get magnitude
    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Normalize to unit length
    pub fn normalize(&self) -> Self {
        let mag = self.magnitude();
        if mag < 1e-10 {
            return Self::new(1.0, 0.0, 0.0); // Default forward
        }
        Self::new(self.x / mag, self.y / mag, self.z / mag)
    }

    /// Dot product
    pub fn dot(&self, other: &Self) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Cross product
    pub fn cross(&self, other: &Self) -> Self {
        Self::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    /// Component-wise subtraction
    pub fn sub(&self, other: &Self) -> Self {
        Self::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    /// Distance to another point
    pub fn distance_to(&self, other: &Self) -> f32 {
        self.sub(other).magnitude()
    }
}

/// A direction on the sphere, in degrees
///
/// Azimuth is counter-clockwise from front (positive = left), elevation is
/// positive upwards. This is the [azimuth, elevation] convention used by
/// loudspeaker presets and HRIR measurement grids.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Direction {
    /// Azimuth in degrees (-180 to 180)
    pub azimuth: f32,
    /// Elevation in degrees (-90 to 90)
    pub elevation: f32,
}

impl Direction {
    /// Create new direction
    pub fn new(azimuth: f32, elevation: f32) -> Self {
        Self { azimuth, elevation }
    }

    /// Convert to a unit vector
    pub fn to_unit_vector(&self) -> Vec3 {
        let az = self.azimuth.to_radians();
        let el = self.elevation.to_radians();
        let cos_el = el.cos();
        Vec3::new(az.cos() * cos_el, az.sin() * cos_el, el.sin())
    }

    /// Create from a unit vector
    pub fn from_unit_vector(v: &Vec3) -> Self {
        let v = v.normalize();
        Self {
            azimuth: v.y.atan2(v.x).to_degrees(),
            elevation: v.z.asin().to_degrees(),
        }
    }

    /// Great-circle angle to another direction, in degrees
    pub fn angle_to(&self, other: &Self) -> f32 {
        let d = self
            .to_unit_vector()
            .dot(&other.to_unit_vector())
            .clamp(-1.0, 1.0);
        d.acos().to_degrees()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_unit_vector_roundtrip() {
        let dir = Direction::new(45.0, 30.0);
        let back = Direction::from_unit_vector(&dir.to_unit_vector());
        assert_abs_diff_eq!(dir.azimuth, back.azimuth, epsilon = 1e-4);
        assert_abs_diff_eq!(dir.elevation, back.elevation, epsilon = 1e-4);
    }

    #[test]
    fn test_front_is_x() {
        let v = Direction::new(0.0, 0.0).to_unit_vector();
        assert_abs_diff_eq!(v.x, 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(v.y, 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(v.z, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_angle_between_orthogonal() {
        let a = Direction::new(0.0, 0.0);
        let b = Direction::new(90.0, 0.0);
        assert_abs_diff_eq!(a.angle_to(&b), 90.0, epsilon = 1e-4);
    }

    #[test]
    fn test_cross_product() {
        let x = Vec3::new(1.0, 0.0, 0.0);
        let y = Vec3::new(0.0, 1.0, 0.0);
        let z = x.cross(&y);
        assert_abs_diff_eq!(z.z, 1.0, epsilon = 1e-6);
    }
}
