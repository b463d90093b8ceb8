//! Spherical triangulation and VBAP gains
//!
//! Builds a deterministic convex-hull triangulation over a set of unit
//! direction vectors; for near-uniform spherical grids the hull faces are
//! the spherical triangles VBAP wants. `gains` resolves an arbitrary
//! direction to the three vertices of its containing triangle and convex
//! interpolation weights (non-negative, summing to 1). Directions outside
//! the covered region pick the best-matching triangle and clamp, which is
//! the documented best-effort extrapolation.

use sf_core::{Direction, Vec3};

use crate::error::{DecoderError, DecoderResult};

const EPS: f32 = 1e-6;

/// Triangulated sphere over a fixed set of directions
pub struct SphericalTriangulation {
    vertices: Vec<Vec3>,
    faces: Vec<[usize; 3]>,
    /// Per-face inverse of the 3x3 matrix whose columns are the vertices
    inverses: Vec<[[f32; 3]; 3]>,
}

fn det3(m: &[[f32; 3]; 3]) -> f32 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

fn invert3(m: &[[f32; 3]; 3]) -> Option<[[f32; 3]; 3]> {
    let d = det3(m);
    if d.abs() < 1e-9 {
        return None;
    }
    let inv_d = 1.0 / d;
    let mut inv = [[0.0f32; 3]; 3];
    for r in 0..3 {
        for c in 0..3 {
            let r1 = (r + 1) % 3;
            let r2 = (r + 2) % 3;
            let c1 = (c + 1) % 3;
            let c2 = (c + 2) % 3;
            // Adjugate: cofactor of (r, c) lands at (c, r); cyclic index
            // choice absorbs the sign pattern
            inv[c][r] = (m[r1][c1] * m[r2][c2] - m[r1][c2] * m[r2][c1]) * inv_d;
        }
    }
    Some(inv)
}

fn face_normal(vertices: &[Vec3], f: &[usize; 3]) -> Vec3 {
    let a = vertices[f[0]];
    let ab = vertices[f[1]].sub(&a);
    let ac = vertices[f[2]].sub(&a);
    ab.cross(&ac)
}

impl SphericalTriangulation {
    /// Triangulate a set of measurement/loudspeaker directions
    ///
    /// Fails with a configuration error when fewer than four directions are
    /// given or when the set is degenerate (colinear or coplanar), since no
    /// sphere-covering hull exists then.
    pub fn new(directions: &[Direction]) -> DecoderResult<Self> {
        if directions.len() < 4 {
            return Err(DecoderError::Config(format!(
                "triangulation needs at least 4 directions, got {}",
                directions.len()
            )));
        }
        let vertices: Vec<Vec3> = directions.iter().map(|d| d.to_unit_vector()).collect();

        let faces = Self::convex_hull(&vertices)?;

        let mut inverses = Vec::with_capacity(faces.len());
        for f in &faces {
            let (a, b, c) = (vertices[f[0]], vertices[f[1]], vertices[f[2]]);
            let m = [[a.x, b.x, c.x], [a.y, b.y, c.y], [a.z, b.z, c.z]];
            let inv = invert3(&m).ok_or_else(|| {
                DecoderError::Config("degenerate triangle in direction set".into())
            })?;
            inverses.push(inv);
        }

        Ok(Self {
            vertices,
            faces,
            inverses,
        })
    }

    /// Number of triangles
    pub fn num_faces(&self) -> usize {
        self.faces.len()
    }

    /// Number of vertices
    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    /// Incremental convex hull of unit vectors
    fn convex_hull(v: &[Vec3]) -> DecoderResult<Vec<[usize; 3]>> {
        let n = v.len();

        // Seed tetrahedron: spread-out, non-coplanar points
        let i0 = 0usize;
        let i1 = (0..n)
            .max_by(|&a, &b| {
                v[a].distance_to(&v[i0])
                    .partial_cmp(&v[b].distance_to(&v[i0]))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(0);
        if v[i1].distance_to(&v[i0]) < EPS {
            return Err(DecoderError::Config(
                "all directions coincide; cannot triangulate".into(),
            ));
        }
        let e0 = v[i1].sub(&v[i0]);
        let area = |i: usize| e0.cross(&v[i].sub(&v[i0])).magnitude();
        let i2 = (0..n)
            .max_by(|&a, &b| {
                area(a)
                    .partial_cmp(&area(b))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(0);
        if area(i2) < EPS {
            return Err(DecoderError::Config(
                "directions are colinear; cannot triangulate".into(),
            ));
        }
        let fnorm = e0.cross(&v[i2].sub(&v[i0]));
        let volume = |i: usize| fnorm.dot(&v[i].sub(&v[i0])).abs();
        let i3 = (0..n)
            .max_by(|&a, &b| {
                volume(a)
                    .partial_cmp(&volume(b))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(0);
        if volume(i3) < EPS {
            return Err(DecoderError::Config(
                "directions are coplanar; cannot triangulate a sphere".into(),
            ));
        }

        let centroid = Vec3::new(
            (v[i0].x + v[i1].x + v[i2].x + v[i3].x) / 4.0,
            (v[i0].y + v[i1].y + v[i2].y + v[i3].y) / 4.0,
            (v[i0].z + v[i1].z + v[i2].z + v[i3].z) / 4.0,
        );
        let orient = |f: [usize; 3]| -> [usize; 3] {
            let normal = face_normal(v, &f);
            if normal.dot(&v[f[0]].sub(&centroid)) < 0.0 {
                [f[0], f[2], f[1]]
            } else {
                f
            }
        };
        let mut faces: Vec<[usize; 3]> = vec![
            orient([i0, i1, i2]),
            orient([i0, i1, i3]),
            orient([i0, i2, i3]),
            orient([i1, i2, i3]),
        ];

        let seed = [i0, i1, i2, i3];
        for p in 0..n {
            if seed.contains(&p) {
                continue;
            }
            let visible: Vec<usize> = (0..faces.len())
                .filter(|&fi| {
                    let f = &faces[fi];
                    face_normal(v, f).dot(&v[p].sub(&v[f[0]])) > EPS
                })
                .collect();
            if visible.is_empty() {
                continue; // inside the current hull (duplicate direction)
            }

            // Horizon: directed edges of visible faces whose reverse is not
            // itself part of a visible face
            let mut edges: Vec<(usize, usize)> = Vec::new();
            for &fi in &visible {
                let f = faces[fi];
                edges.push((f[0], f[1]));
                edges.push((f[1], f[2]));
                edges.push((f[2], f[0]));
            }
            let horizon: Vec<(usize, usize)> = edges
                .iter()
                .filter(|&&(a, b)| !edges.contains(&(b, a)))
                .copied()
                .collect();

            let mut keep: Vec<[usize; 3]> = faces
                .iter()
                .enumerate()
                .filter(|(fi, _)| !visible.contains(fi))
                .map(|(_, f)| *f)
                .collect();
            for (a, b) in horizon {
                keep.push([a, b, p]);
            }
            faces = keep;
        }

        // Final outward orientation against the full centroid
        let mut cx = 0.0;
        let mut cy = 0.0;
        let mut cz = 0.0;
        for p in v {
            cx += p.x;
            cy += p.y;
            cz += p.z;
        }
        let c = Vec3::new(cx / n as f32, cy / n as f32, cz / n as f32);
        for f in &mut faces {
            if face_normal(v, f).dot(&v[f[0]].sub(&c)) < 0.0 {
                f.swap(1, 2);
            }
        }

        Ok(faces)
    }

    /// Resolve a direction to its triangle and convex weights
    ///
    /// The returned weights are non-negative and sum to 1. At a vertex of
    /// the triangulation the weight vector is exactly the unit vector for
    /// that vertex (identity at measurement directions).
    pub fn gains(&self, direction: &Direction) -> ([usize; 3], [f32; 3]) {
        let p = direction.to_unit_vector();

        let mut best_face = 0usize;
        let mut best_min = f32::NEG_INFINITY;
        let mut best_g = [0.0f32; 3];
        for (fi, inv) in self.inverses.iter().enumerate() {
            let g = [
                inv[0][0] * p.x + inv[0][1] * p.y + inv[0][2] * p.z,
                inv[1][0] * p.x + inv[1][1] * p.y + inv[1][2] * p.z,
                inv[2][0] * p.x + inv[2][1] * p.y + inv[2][2] * p.z,
            ];
            let min_g = g[0].min(g[1]).min(g[2]);
            if min_g > best_min {
                best_min = min_g;
                best_face = fi;
                best_g = g;
            }
        }

        // Clamp tiny negatives (outside-hull extrapolation) and normalize
        // to amplitude preservation
        let mut g = [
            best_g[0].max(0.0),
            best_g[1].max(0.0),
            best_g[2].max(0.0),
        ];
        let sum = g[0] + g[1] + g[2];
        if sum > EPS {
            for w in &mut g {
                *w /= sum;
            }
        } else {
            // Pathological direction: weight the nearest vertex
            let f = self.faces[best_face];
            let nearest = (0..3)
                .max_by(|&a, &b| {
                    self.vertices[f[a]]
                        .dot(&p)
                        .partial_cmp(&self.vertices[f[b]].dot(&p))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .unwrap_or(0);
            g = [0.0; 3];
            g[nearest] = 1.0;
        }

        (self.faces[best_face], g)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn octahedron() -> Vec<Direction> {
        vec![
            Direction::new(0.0, 0.0),
            Direction::new(90.0, 0.0),
            Direction::new(180.0, 0.0),
            Direction::new(-90.0, 0.0),
            Direction::new(0.0, 90.0),
            Direction::new(0.0, -90.0),
        ]
    }

    #[test]
    fn test_octahedron_has_eight_faces() {
        let tri = SphericalTriangulation::new(&octahedron()).unwrap();
        assert_eq!(tri.num_vertices(), 6);
        assert_eq!(tri.num_faces(), 8);
    }

    #[test]
    fn test_coplanar_directions_fail() {
        let dirs = vec![
            Direction::new(45.0, 0.0),
            Direction::new(-45.0, 0.0),
            Direction::new(135.0, 0.0),
            Direction::new(-135.0, 0.0),
        ];
        assert!(SphericalTriangulation::new(&dirs).is_err());
    }

    #[test]
    fn test_too_few_directions_fail() {
        let dirs = vec![Direction::new(0.0, 0.0), Direction::new(90.0, 0.0)];
        assert!(SphericalTriangulation::new(&dirs).is_err());
    }

    #[test]
    fn test_weights_are_convex() {
        let tri = SphericalTriangulation::new(&octahedron()).unwrap();
        for az in [-170.0f32, -60.0, 0.0, 33.0, 121.0] {
            for el in [-80.0f32, -15.0, 10.0, 45.0] {
                let (_, w) = tri.gains(&Direction::new(az, el));
                let sum: f32 = w.iter().sum();
                assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-5);
                for &g in &w {
                    assert!(g >= 0.0);
                }
            }
        }
    }

    #[test]
    fn test_identity_at_vertices() {
        let dirs = octahedron();
        let tri = SphericalTriangulation::new(&dirs).unwrap();
        for (i, d) in dirs.iter().enumerate() {
            let (idx, w) = tri.gains(d);
            let slot = idx.iter().position(|&v| v == i);
            assert!(slot.is_some(), "vertex {i} not in its own triangle");
            assert_abs_diff_eq!(w[slot.unwrap()], 1.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_interior_direction_blends_neighbors() {
        let tri = SphericalTriangulation::new(&octahedron()).unwrap();
        // Between front and top
        let (idx, w) = tri.gains(&Direction::new(0.0, 45.0));
        let front = idx.iter().position(|&v| v == 0).unwrap();
        let top = idx.iter().position(|&v| v == 4).unwrap();
        assert!(w[front] > 0.3);
        assert!(w[top] > 0.3);
        assert_abs_diff_eq!(w[front], w[top], epsilon = 1e-4);
    }
}
