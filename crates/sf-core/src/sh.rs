//! Real spherical-harmonic basis
//!
//! ACN channel ordering with SN3D or N3D normalization, evaluated with
//! associated Legendre recurrences so any order up to [`MAX_SH_ORDER`] works
//! from the same code path. Also provides the maxrE per-degree weights used
//! by energy-concentrating decoders.

use crate::error::{CoreError, CoreResult};

/// Maximum supported Ambisonic order (64 channels)
pub const MAX_SH_ORDER: usize = 7;

/// Spherical-harmonic normalization convention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum ShNormalization {
    /// Schmidt semi-normalized (the common exchange convention)
    #[default]
    Sn3d,
    /// Fully normalized
    N3d,
}

/// Number of harmonic channels for an order: (order + 1)^2
pub fn num_harmonics(order: usize) -> usize {
    (order + 1) * (order + 1)
}

/// ACN channel index from (degree l, index m)
pub fn acn_index(l: usize, m: i32) -> usize {
    (l * l) as usize + (l as i32 + m) as usize
}

/// Get (degree l, index m) from ACN channel index
pub fn acn_to_degree_order(acn: usize) -> (usize, i32) {
    let l = (acn as f64).sqrt().floor() as usize;
    let m = acn as i32 - (l * l + l) as i32;
    (l, m)
}

fn factorial(n: usize) -> f64 {
    (1..=n).map(|i| i as f64).product()
}

/// Associated Legendre values P_l^m(x) for all l in 0..=order, m in 0..=l,
/// without the Condon-Shortley phase. Indexed as [l][m].
fn legendre_table(order: usize, x: f64) -> Vec<Vec<f64>> {
    let mut p = vec![vec![0.0f64; order + 1]; order + 1];
    let somx2 = (1.0 - x * x).max(0.0).sqrt();

    p[0][0] = 1.0;
    // Diagonal: P_mm = (2m - 1)!! (1 - x^2)^(m/2)
    for m in 1..=order {
        p[m][m] = p[m - 1][m - 1] * (2.0 * m as f64 - 1.0) * somx2;
    }
    // One above the diagonal: P_{m+1,m} = x (2m + 1) P_mm
    for m in 0..order {
        p[m + 1][m] = x * (2.0 * m as f64 + 1.0) * p[m][m];
    }
    // General recurrence
    for m in 0..=order {
        for l in (m + 2)..=order {
            p[l][m] = ((2.0 * l as f64 - 1.0) * x * p[l - 1][m]
                - (l as f64 + m as f64 - 1.0) * p[l - 2][m])
                / (l as f64 - m as f64);
        }
    }
    p
}

/// Evaluate the real SH basis for a direction, ACN ordering
///
/// Returns (order + 1)^2 coefficients. Azimuth is counter-clockwise from
/// front, elevation positive upwards, both in degrees.
pub fn sh_basis(
    order: usize,
    azimuth_deg: f32,
    elevation_deg: f32,
    norm: ShNormalization,
) -> CoreResult<Vec<f32>> {
    if order > MAX_SH_ORDER {
        return Err(CoreError::InvalidOrder(order));
    }
    if !azimuth_deg.is_finite() || !elevation_deg.is_finite() {
        return Err(CoreError::InvalidDirection {
            azimuth: azimuth_deg,
            elevation: elevation_deg,
        });
    }

    let az = azimuth_deg.to_radians() as f64;
    let x = (elevation_deg.to_radians() as f64).sin();
    let p = legendre_table(order, x);

    let mut out = vec![0.0f32; num_harmonics(order)];
    for l in 0..=order {
        for m in -(l as i32)..=(l as i32) {
            let ma = m.unsigned_abs() as usize;
            let delta = if m == 0 { 1.0 } else { 2.0 };
            let mut n = (delta * factorial(l - ma) / factorial(l + ma)).sqrt();
            if norm == ShNormalization::N3d {
                n *= (2.0 * l as f64 + 1.0).sqrt();
            }
            let angular = if m >= 0 {
                (ma as f64 * az).cos()
            } else {
                (ma as f64 * az).sin()
            };
            out[acn_index(l, m)] = (n * p[l][ma] * angular) as f32;
        }
    }
    Ok(out)
}

/// Legendre polynomial P_l(x)
fn legendre_poly(l: usize, x: f64) -> f64 {
    match l {
        0 => 1.0,
        1 => x,
        _ => {
            let mut p0 = 1.0;
            let mut p1 = x;
            for k in 2..=l {
                let p2 = ((2.0 * k as f64 - 1.0) * x * p1 - (k as f64 - 1.0) * p0) / k as f64;
                p0 = p1;
                p1 = p2;
            }
            p1
        }
    }
}

/// Per-degree maxrE weights for a decoding order
///
/// w_l = P_l(r_E) with r_E = cos(137.9 deg / (order + 1.51)); the weights
/// are non-increasing with degree, which is what concentrates the decoded
/// energy vector.
pub fn max_re_weights(order: usize) -> Vec<f32> {
    let r_e = (137.9f64.to_radians() / (order as f64 + 1.51)).cos();
    (0..=order).map(|l| legendre_poly(l, r_e) as f32).collect()
}
