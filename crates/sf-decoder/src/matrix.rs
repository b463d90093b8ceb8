//! Decoding matrix construction
//!
//! For each decoder slot and each order up to the effective master order
//! this builds the real loudspeaker decoding matrix for the slot's method,
//! its complex counterpart for the time-frequency path, the maxrE-weighted
//! variants, and the pair of normalization scalars (amplitude- and
//! energy-preserving) that keep a unit omnidirectional input at equal
//! loudness across orders and decoders.
//!
//! Construction is a pure function of (geometry, order, method, weighting):
//! identical inputs yield bit-identical matrices, which the lifecycle
//! manager relies on for idempotent rebuilds.

use ndarray::Array2;
use num_complex::Complex32;

use sf_core::{
    acn_to_degree_order, max_re_weights, num_harmonics, sh_basis, Direction, LoudspeakerLayout,
    ShNormalization,
};

use crate::error::{DecoderError, DecoderResult};
use crate::params::{DecoderSlot, DecodingMethod, SlotConfig, NUM_DECODERS};
use crate::vbap::SphericalTriangulation;

/// Per-slot, per-order decoding matrices plus normalization scalars
pub struct DecodingMatrixSet {
    n_ls: usize,
    master_order: usize,
    /// [slot][order] real matrices, order 0..=master
    real: Vec<Vec<Array2<f32>>>,
    cmplx: Vec<Vec<Array2<Complex32>>>,
    real_maxre: Vec<Vec<Array2<f32>>>,
    cmplx_maxre: Vec<Vec<Array2<Complex32>>>,
    /// [slot][order] -> [amplitude-preserving, energy-preserving]
    norms: Vec<Vec<[f32; 2]>>,
}

impl DecodingMatrixSet {
    /// Build all matrices for a layout and per-slot configuration
    pub fn build(
        layout: &LoudspeakerLayout,
        slots: &[SlotConfig; NUM_DECODERS],
        master_order: usize,
        norm: ShNormalization,
    ) -> DecoderResult<Self> {
        let n_ls = layout.len();

        let mut real = Vec::with_capacity(NUM_DECODERS);
        let mut cmplx = Vec::with_capacity(NUM_DECODERS);
        let mut real_maxre = Vec::with_capacity(NUM_DECODERS);
        let mut cmplx_maxre = Vec::with_capacity(NUM_DECODERS);
        let mut norms = Vec::with_capacity(NUM_DECODERS);

        for slot in DecoderSlot::ALL {
            let cfg = &slots[slot.index()];
            let mut slot_real = Vec::with_capacity(master_order + 1);
            let mut slot_cmplx = Vec::with_capacity(master_order + 1);
            let mut slot_real_w = Vec::with_capacity(master_order + 1);
            let mut slot_cmplx_w = Vec::with_capacity(master_order + 1);
            let mut slot_norms = Vec::with_capacity(master_order + 1);

            for order in 0..=master_order {
                let m = build_decode_matrix(cfg.method, layout, order, norm)?;
                if m.nrows() != n_ls || m.ncols() != num_harmonics(order) {
                    return Err(DecoderError::Invariant(format!(
                        "decode matrix has shape {}x{}, expected {}x{}",
                        m.nrows(),
                        m.ncols(),
                        n_ls,
                        num_harmonics(order)
                    )));
                }
                let m_w = apply_max_re(&m, order);
                let active = if cfg.max_re { &m_w } else { &m };
                slot_norms.push(norm_scalars(active)?);

                slot_cmplx.push(m.mapv(|x| Complex32::new(x, 0.0)));
                slot_cmplx_w.push(m_w.mapv(|x| Complex32::new(x, 0.0)));
                slot_real.push(m);
                slot_real_w.push(m_w);
            }

            real.push(slot_real);
            cmplx.push(slot_cmplx);
            real_maxre.push(slot_real_w);
            cmplx_maxre.push(slot_cmplx_w);
            norms.push(slot_norms);
        }

        Ok(Self {
            n_ls,
            master_order,
            real,
            cmplx,
            real_maxre,
            cmplx_maxre,
            norms,
        })
    }

    /// Number of loudspeakers the set was built for
    pub fn num_loudspeakers(&self) -> usize {
        self.n_ls
    }

    /// Highest order the set carries
    pub fn master_order(&self) -> usize {
        self.master_order
    }

    /// Real matrix for a slot and order
    pub fn matrix(&self, slot: DecoderSlot, order: usize, max_re: bool) -> &Array2<f32> {
        if max_re {
            &self.real_maxre[slot.index()][order]
        } else {
            &self.real[slot.index()][order]
        }
    }

    /// Complex matrix for a slot and order
    pub fn complex_matrix(
        &self,
        slot: DecoderSlot,
        order: usize,
        max_re: bool,
    ) -> &Array2<Complex32> {
        if max_re {
            &self.cmplx_maxre[slot.index()][order]
        } else {
            &self.cmplx[slot.index()][order]
        }
    }

    /// [amplitude, energy] normalization scalars for a slot and order
    pub fn norm(&self, slot: DecoderSlot, order: usize) -> [f32; 2] {
        self.norms[slot.index()][order]
    }
}

/// Build one real decoding matrix (loudspeakers x harmonics)
pub fn build_decode_matrix(
    method: DecodingMethod,
    layout: &LoudspeakerLayout,
    order: usize,
    norm: ShNormalization,
) -> DecoderResult<Array2<f32>> {
    let n_ls = layout.len();
    if n_ls == 0 {
        return Err(DecoderError::Config("no loudspeakers defined".into()));
    }
    let n_sh = num_harmonics(order);

    // Omnidirectional passthrough; every method degenerates to the same
    // equal split at order 0
    if order == 0 {
        return Ok(Array2::from_elem((n_ls, 1), 1.0 / n_ls as f32));
    }

    let basis: Vec<Vec<f32>> = layout
        .speakers
        .iter()
        .map(|s| sh_basis(order, s.direction.azimuth, s.direction.elevation, norm))
        .collect::<Result<_, _>>()?;

    let matrix = match method {
        DecodingMethod::Sampling => {
            let mut m = Array2::<f32>::zeros((n_ls, n_sh));
            for (ls, b) in basis.iter().enumerate() {
                for ch in 0..n_sh {
                    m[[ls, ch]] = b[ch] / n_ls as f32;
                }
            }
            m
        }
        DecodingMethod::ModeMatching => mode_matching_matrix(&basis, n_ls, n_sh)?,
        DecodingMethod::EnergyPreserving => {
            let mut m = Array2::<f32>::zeros((n_ls, n_sh));
            let scale = 1.0 / (n_ls as f32).sqrt();
            for (ls, b) in basis.iter().enumerate() {
                let energy: f32 = b.iter().map(|x| x * x).sum();
                let row_norm = if energy > 1e-12 {
                    scale / energy.sqrt()
                } else {
                    scale
                };
                for ch in 0..n_sh {
                    m[[ls, ch]] = b[ch] * row_norm;
                }
            }
            m
        }
        DecodingMethod::AllRad => allrad_matrix(layout, order, norm)?,
    };

    Ok(matrix)
}

/// Mode matching via a regularized right pseudoinverse: Y^T (Y Y^T + eI)^-1
fn mode_matching_matrix(
    basis: &[Vec<f32>],
    n_ls: usize,
    n_sh: usize,
) -> DecoderResult<Array2<f32>> {
    // Gram matrix Y Y^T (n_sh x n_sh) in f64 for stable inversion
    let mut gram = vec![vec![0.0f64; n_sh]; n_sh];
    for b in basis {
        for i in 0..n_sh {
            for j in 0..n_sh {
                gram[i][j] += b[i] as f64 * b[j] as f64;
            }
        }
    }
    let trace: f64 = (0..n_sh).map(|i| gram[i][i]).sum();
    let lambda = 1e-6 * trace / n_sh as f64;
    for (i, row) in gram.iter_mut().enumerate() {
        row[i] += lambda;
    }
    let inv = invert_gauss_jordan(gram).ok_or_else(|| {
        DecoderError::Config("mode-matching system is singular for this layout".into())
    })?;

    let mut m = Array2::<f32>::zeros((n_ls, n_sh));
    for (ls, b) in basis.iter().enumerate() {
        for ch in 0..n_sh {
            let mut acc = 0.0f64;
            for k in 0..n_sh {
                acc += b[k] as f64 * inv[k][ch];
            }
            m[[ls, ch]] = acc as f32;
        }
    }
    Ok(m)
}

/// Gauss-Jordan inversion with partial pivoting
fn invert_gauss_jordan(mut a: Vec<Vec<f64>>) -> Option<Vec<Vec<f64>>> {
    let n = a.len();
    let mut inv: Vec<Vec<f64>> = (0..n)
        .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect();

    for col in 0..n {
        let pivot = (col..n).max_by(|&r1, &r2| {
            a[r1][col]
                .abs()
                .partial_cmp(&a[r2][col].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        inv.swap(col, pivot);

        let d = a[col][col];
        for j in 0..n {
            a[col][j] /= d;
            inv[col][j] /= d;
        }
        for row in 0..n {
            if row == col {
                continue;
            }
            let f = a[row][col];
            if f == 0.0 {
                continue;
            }
            for j in 0..n {
                a[row][j] -= f * a[col][j];
                inv[row][j] -= f * inv[col][j];
            }
        }
    }
    Some(inv)
}

/// All-round Ambisonic decoding: sample a dense deterministic virtual grid,
/// pan each virtual source to the real loudspeakers with VBAP
fn allrad_matrix(
    layout: &LoudspeakerLayout,
    order: usize,
    norm: ShNormalization,
) -> DecoderResult<Array2<f32>> {
    let n_ls = layout.len();
    let n_sh = num_harmonics(order);

    // Horizontal-only layouts cannot be triangulated on the sphere; pad
    // with imaginary speakers at the poles and discard their gains, the
    // way AllRAD implementations handle 2-D rigs.
    let mut pan_dirs = layout.directions();
    let imaginary_from = pan_dirs.len();
    if layout.dims() == 2 {
        pan_dirs.push(Direction::new(0.0, 90.0));
        pan_dirs.push(Direction::new(0.0, -90.0));
    }
    let tri = SphericalTriangulation::new(&pan_dirs)?;

    // Dense enough that grid asymmetry is below audibility at any
    // supported order
    let virtual_dirs = fibonacci_sphere((30 * num_harmonics(order)).max(480));
    let mut m = Array2::<f32>::zeros((n_ls, n_sh));
    let scale = 1.0 / virtual_dirs.len() as f32;

    for vd in &virtual_dirs {
        let (idx, w) = tri.gains(vd);
        let b = sh_basis(order, vd.azimuth, vd.elevation, norm)?;
        for k in 0..3 {
            let ls = idx[k];
            if ls >= imaginary_from {
                continue;
            }
            let g = w[k] * scale;
            for ch in 0..n_sh {
                m[[ls, ch]] += g * b[ch];
            }
        }
    }
    Ok(m)
}

/// Deterministic quasi-uniform sphere sampling
fn fibonacci_sphere(n: usize) -> Vec<Direction> {
    let golden = (1.0 + 5.0f64.sqrt()) / 2.0;
    (0..n)
        .map(|i| {
            let theta = 2.0 * std::f64::consts::PI * i as f64 / golden;
            let z = 1.0 - 2.0 * (i as f64 + 0.5) / n as f64;
            let elevation = z.asin().to_degrees() as f32;
            let azimuth = (theta.to_degrees() % 360.0) as f32;
            let azimuth = if azimuth > 180.0 {
                azimuth - 360.0
            } else {
                azimuth
            };
            Direction::new(azimuth, elevation)
        })
        .collect()
}

/// Scale matrix columns by the per-degree maxrE weights
fn apply_max_re(m: &Array2<f32>, order: usize) -> Array2<f32> {
    let weights = max_re_weights(order);
    let mut out = m.clone();
    for ch in 0..m.ncols() {
        let (l, _) = acn_to_degree_order(ch);
        let w = weights[l];
        for ls in 0..m.nrows() {
            out[[ls, ch]] *= w;
        }
    }
    out
}

/// [amplitude, energy] normalization scalars from the omni column
fn norm_scalars(m: &Array2<f32>) -> DecoderResult<[f32; 2]> {
    let mut amp_sum = 0.0f32;
    let mut energy_sum = 0.0f32;
    for ls in 0..m.nrows() {
        let g = m[[ls, 0]];
        amp_sum += g;
        energy_sum += g * g;
    }
    if amp_sum.abs() < 1e-9 || energy_sum < 1e-12 {
        return Err(DecoderError::Invariant(
            "decode matrix has a vanishing omnidirectional response".into(),
        ));
    }
    Ok([1.0 / amp_sum, 1.0 / energy_sum.sqrt()])
}
