//! HRTF interpolation engine
//!
//! Owns the measured (or bundled synthetic) HRIR set, its per-band
//! filterbank representation, and the VBAP interpolation table over the
//! measurement grid. Loudspeaker responses are derived lazily through an
//! explicit dirty set: magnitude and ITD of the three nearest measurements
//! are interpolated separately, then recombined as magnitude times a linear
//! phase term, so crossing a triangle never phase-cancels the way raw
//! complex blending would.
//!
//! Everything in this module runs on the control plane during rebuilds;
//! the audio path only reads the finished [`BinauralTable`].

use num_complex::Complex32;
use rayon::prelude::*;
use std::path::Path;

use sf_core::{Direction, NUM_EARS};
use sf_dsp::{hrir_band_response, NUM_BANDS};

use crate::error::{DecoderError, DecoderResult};
use crate::vbap::SphericalTriangulation;

/// Impulse-response length of the bundled synthetic set
pub const DEFAULT_HRIR_LEN: usize = 128;

const SPEED_OF_SOUND: f32 = 343.0;
const HEAD_RADIUS: f32 = 0.0875;

/// A set of measured ear-pair impulse responses with their directions
#[derive(Debug)]
pub struct HrirSet {
    /// [measurement] -> [left, right] impulse responses
    hrirs: Vec<[Vec<f32>; 2]>,
    directions: Vec<Direction>,
    sample_rate: u32,
}

impl HrirSet {
    /// Bundled spherical-head model on a fixed measurement grid
    ///
    /// Not a measured dataset, but smooth, symmetric, and monotonic in ITD,
    /// which is what the interpolation contracts need.
    pub fn default_set(sample_rate: u32) -> Self {
        let mut directions = Vec::new();
        for el in [-60.0f32, -30.0, 0.0, 30.0, 60.0] {
            for k in 0..12 {
                let az = -180.0 + 30.0 * k as f32;
                directions.push(Direction::new(az, el));
            }
        }
        directions.push(Direction::new(0.0, 90.0));
        directions.push(Direction::new(0.0, -90.0));

        let hrirs = directions
            .iter()
            .map(|d| synthetic_hrir(d, sample_rate))
            .collect();

        Self {
            hrirs,
            directions,
            sample_rate,
        }
    }

    /// Load a set from a directory of stereo WAV files
    ///
    /// Files must be named `azi<az>_elev<el>.wav` (e.g. `azi-30_elev15.wav`)
    /// and share one sample rate. Anything malformed is a resource error;
    /// the lifecycle manager falls back to the default set on failure.
    pub fn load_wav_dir(path: &Path) -> DecoderResult<Self> {
        let mut entries: Vec<(Direction, std::path::PathBuf)> = Vec::new();
        let dir = std::fs::read_dir(path)
            .map_err(|e| DecoderError::Resource(format!("cannot read HRIR directory: {e}")))?;
        for entry in dir {
            let entry =
                entry.map_err(|e| DecoderError::Resource(format!("cannot list HRIR file: {e}")))?;
            let p = entry.path();
            if p.extension().and_then(|e| e.to_str()) != Some("wav") {
                continue;
            }
            let stem = p
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| DecoderError::Resource(format!("bad HRIR file name: {p:?}")))?;
            let direction = parse_hrir_name(stem)
                .ok_or_else(|| DecoderError::Resource(format!("bad HRIR file name: {stem}")))?;
            entries.push((direction, p));
        }
        if entries.is_empty() {
            return Err(DecoderError::Resource(format!(
                "no HRIR wav files found in {path:?}"
            )));
        }
        // Deterministic measurement order regardless of directory listing
        entries.sort_by(|a, b| {
            (a.0.elevation, a.0.azimuth)
                .partial_cmp(&(b.0.elevation, b.0.azimuth))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut hrirs = Vec::with_capacity(entries.len());
        let mut directions = Vec::with_capacity(entries.len());
        let mut sample_rate = 0u32;
        for (direction, p) in entries {
            let mut reader = hound::WavReader::open(&p)
                .map_err(|e| DecoderError::Resource(format!("cannot open {p:?}: {e}")))?;
            let spec = reader.spec();
            if spec.channels != 2 {
                return Err(DecoderError::Resource(format!(
                    "{p:?}: expected stereo HRIR, got {} channels",
                    spec.channels
                )));
            }
            if sample_rate == 0 {
                sample_rate = spec.sample_rate;
            } else if sample_rate != spec.sample_rate {
                return Err(DecoderError::Resource(format!(
                    "{p:?}: sample rate {} does not match set rate {}",
                    spec.sample_rate, sample_rate
                )));
            }
            let interleaved: Vec<f32> = match spec.sample_format {
                hound::SampleFormat::Float => reader
                    .samples::<f32>()
                    .collect::<Result<_, _>>()
                    .map_err(|e| DecoderError::Resource(format!("{p:?}: {e}")))?,
                hound::SampleFormat::Int => {
                    let scale = 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f32;
                    reader
                        .samples::<i32>()
                        .map(|s| s.map(|v| v as f32 * scale))
                        .collect::<Result<_, _>>()
                        .map_err(|e| DecoderError::Resource(format!("{p:?}: {e}")))?
                }
            };
            let frames = interleaved.len() / 2;
            let mut left = Vec::with_capacity(frames);
            let mut right = Vec::with_capacity(frames);
            for f in 0..frames {
                left.push(interleaved[2 * f]);
                right.push(interleaved[2 * f + 1]);
            }
            hrirs.push([left, right]);
            directions.push(direction);
        }

        Ok(Self {
            hrirs,
            directions,
            sample_rate,
        })
    }

    /// Number of measurements
    pub fn len(&self) -> usize {
        self.hrirs.len()
    }

    /// True when the set holds no measurements
    pub fn is_empty(&self) -> bool {
        self.hrirs.is_empty()
    }

    /// Measurement directions
    pub fn directions(&self) -> &[Direction] {
        &self.directions
    }

    /// Sampling rate of the impulse responses
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Parse `azi<az>_elev<el>` file stems
fn parse_hrir_name(stem: &str) -> Option<Direction> {
    let rest = stem.strip_prefix("azi")?;
    let (az_str, el_str) = rest.split_once("_elev")?;
    let azimuth: f32 = az_str.parse().ok()?;
    let elevation: f32 = el_str.parse().ok()?;
    if !(-180.0..=180.0).contains(&azimuth) || !(-90.0..=90.0).contains(&elevation) {
        return None;
    }
    Some(Direction::new(azimuth, elevation))
}

/// Spherical-head model impulse response for one direction
fn synthetic_hrir(direction: &Direction, sample_rate: u32) -> [Vec<f32>; 2] {
    let az = direction.azimuth.to_radians();
    let el = direction.elevation.to_radians();

    // Woodworth-style path difference; positive = left ear leads
    let itd_s = (HEAD_RADIUS / SPEED_OF_SOUND) * (az.sin() + az) * el.cos();
    let itd_samples = itd_s * sample_rate as f32;

    // Equal-power pan for the broadband level difference. The far ear is
    // floored above zero: a real head shadows, it never fully silences,
    // and the ITD estimator needs signal in both ears at +/-90 degrees.
    let pan = az.sin() * el.cos(); // positive = left
    let left_gain = ((1.0 + pan) * std::f32::consts::FRAC_PI_4).sin().max(0.05);
    let right_gain = ((1.0 + pan) * std::f32::consts::FRAC_PI_4).cos().max(0.05);

    let base_delay = 16.0f32;
    let delays = [
        base_delay - itd_samples / 2.0,
        base_delay + itd_samples / 2.0,
    ];
    let gains = [left_gain, right_gain];

    let mut out = [vec![0.0f32; DEFAULT_HRIR_LEN], vec![0.0f32; DEFAULT_HRIR_LEN]];
    let sigma = 1.5f32;
    for ear in 0..NUM_EARS {
        for (n, s) in out[ear].iter_mut().enumerate() {
            let d = n as f32 - delays[ear];
            *s = gains[ear] * (-d * d / (2.0 * sigma * sigma)).exp();
        }
    }

    // Head shadow: one-pole lowpass on the far ear
    let shadow = pan.abs() * 0.5;
    if shadow > 1e-3 {
        let far = if pan > 0.0 { 1 } else { 0 };
        let coeff = 1.0 - 0.6 * shadow;
        let mut state = 0.0f32;
        for s in &mut out[far] {
            state = state * (1.0 - coeff) + *s * coeff;
            *s = state;
        }
    }
    out
}

/// Interaural time difference estimate via cross-correlation, in seconds
///
/// Positive when the left ear leads. The lag search is limited to +/-1 ms,
/// the physical range for human heads.
pub fn estimate_itd(left: &[f32], right: &[f32], sample_rate: u32) -> f32 {
    let max_lag = (sample_rate / 1000).max(1) as i64;
    let n = left.len().min(right.len());

    let correlation = |lag: i64| -> f32 {
        let mut corr = 0.0f32;
        for i in 0..n as i64 {
            let j = i + lag;
            if j >= 0 && j < n as i64 {
                corr += left[i as usize] * right[j as usize];
            }
        }
        corr
    };

    // Seed with zero lag so degenerate inputs (a silent ear, all-flat
    // correlation) report no time difference instead of the search bound
    let mut best_lag = 0i64;
    let mut best_corr = correlation(0);
    for lag in -max_lag..=max_lag {
        let corr = correlation(lag);
        if corr > best_corr {
            best_corr = corr;
            best_lag = lag;
        }
    }
    best_lag as f32 / sample_rate as f32
}

/// Per-band magnitude/ITD representation of an HRIR set
///
/// Interpolation works on magnitudes and ITDs only; phase is resynthesized
/// from the interpolated ITD, so the raw complex responses are not kept.
pub struct HrtfFilterbank {
    /// bands x ears x measurements, band magnitudes
    mags: Vec<f32>,
    /// Per-measurement ITD in seconds
    itds: Vec<f32>,
    directions: Vec<Direction>,
    n: usize,
}

impl HrtfFilterbank {
    /// Convert a full HRIR set; runs in parallel over measurements
    pub fn build(set: &HrirSet) -> Self {
        let n = set.len();
        let converted: Vec<(f32, [Vec<Complex32>; 2])> = set
            .hrirs
            .par_iter()
            .map(|pair| {
                let itd = estimate_itd(&pair[0], &pair[1], set.sample_rate);
                let resp = [hrir_band_response(&pair[0]), hrir_band_response(&pair[1])];
                (itd, resp)
            })
            .collect();

        let mut mags = vec![0.0f32; NUM_BANDS * NUM_EARS * n];
        let mut itds = Vec::with_capacity(n);
        for (meas, (itd, resp)) in converted.iter().enumerate() {
            itds.push(*itd);
            for ear in 0..NUM_EARS {
                for band in 0..NUM_BANDS {
                    mags[(band * NUM_EARS + ear) * n + meas] = resp[ear][band].norm();
                }
            }
        }

        Self {
            mags,
            itds,
            directions: set.directions().to_vec(),
            n,
        }
    }

    /// Number of measurements
    pub fn len(&self) -> usize {
        self.n
    }

    /// True when the filterbank holds no measurements
    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Measurement directions
    pub fn directions(&self) -> &[Direction] {
        &self.directions
    }

    /// Magnitude of one measurement
    pub fn magnitude(&self, band: usize, ear: usize, meas: usize) -> f32 {
        self.mags[(band * NUM_EARS + ear) * self.n + meas]
    }

    /// ITD of one measurement, seconds
    pub fn itd(&self, meas: usize) -> f32 {
        self.itds[meas]
    }
}

/// Finished per-loudspeaker binaural filters, read by the audio path
#[derive(Clone)]
pub struct BinauralTable {
    /// loudspeakers x bands x ears
    data: Vec<Complex32>,
    n_ls: usize,
}

impl BinauralTable {
    /// Number of loudspeakers
    pub fn num_loudspeakers(&self) -> usize {
        self.n_ls
    }

    /// Interpolated response for one loudspeaker, band, and ear
    #[inline]
    pub fn at(&self, ls: usize, band: usize, ear: usize) -> Complex32 {
        self.data[(ls * NUM_BANDS + band) * NUM_EARS + ear]
    }
}

/// HRTF interpolation engine with a per-loudspeaker dirty set
pub struct HrtfEngine {
    fb: HrtfFilterbank,
    tri: SphericalTriangulation,
    /// Host-rate band center frequencies for phase synthesis
    band_freqs: Vec<f32>,
    ls_dirs: Vec<Direction>,
    /// Cached responses, loudspeakers x (bands x ears)
    cache: Vec<Vec<Complex32>>,
    dirty: Vec<bool>,
}

impl HrtfEngine {
    /// Build the filterbank and interpolation table for an HRIR set
    pub fn new(set: &HrirSet, band_freqs: Vec<f32>) -> DecoderResult<Self> {
        let fb = HrtfFilterbank::build(set);
        let tri = SphericalTriangulation::new(fb.directions())?;
        Ok(Self {
            fb,
            tri,
            band_freqs,
            ls_dirs: Vec::new(),
            cache: Vec::new(),
            dirty: Vec::new(),
        })
    }

    /// Number of HRIR measurements behind the engine
    pub fn num_measurements(&self) -> usize {
        self.fb.len()
    }

    /// Stage a loudspeaker setup; unchanged directions keep their cache
    pub fn set_loudspeakers(&mut self, dirs: &[Direction]) {
        let mut cache = vec![Vec::new(); dirs.len()];
        let mut dirty = vec![true; dirs.len()];
        for (i, d) in dirs.iter().enumerate() {
            if let Some(j) = self.ls_dirs.iter().position(|old| old == d) {
                if !self.dirty.get(j).copied().unwrap_or(true) {
                    cache[i] = self.cache[j].clone();
                    dirty[i] = false;
                }
            }
        }
        self.ls_dirs = dirs.to_vec();
        self.cache = cache;
        self.dirty = dirty;
    }

    /// Recompute every dirty loudspeaker in one pass
    pub fn recompute_dirty(&mut self) {
        for i in 0..self.ls_dirs.len() {
            if self.dirty[i] {
                self.cache[i] = self.interpolate(&self.ls_dirs[i]);
                self.dirty[i] = false;
            }
        }
    }

    /// Snapshot the cached responses for the audio path
    pub fn table(&self) -> BinauralTable {
        let n_ls = self.ls_dirs.len();
        let mut data = vec![Complex32::ZERO; n_ls * NUM_BANDS * NUM_EARS];
        for (ls, resp) in self.cache.iter().enumerate() {
            data[ls * NUM_BANDS * NUM_EARS..(ls + 1) * NUM_BANDS * NUM_EARS]
                .copy_from_slice(resp);
        }
        BinauralTable { data, n_ls }
    }

    /// Interpolate one direction: convex-blend magnitude and ITD, then
    /// recombine with a linear phase term
    pub fn interpolate(&self, direction: &Direction) -> Vec<Complex32> {
        let (idx, w) = self.tri.gains(direction);

        let itd: f32 = (0..3).map(|k| w[k] * self.fb.itd(idx[k])).sum();

        let mut out = vec![Complex32::ZERO; NUM_BANDS * NUM_EARS];
        for band in 0..NUM_BANDS {
            let f = self.band_freqs[band];
            for ear in 0..NUM_EARS {
                let mag: f32 = (0..3)
                    .map(|k| w[k] * self.fb.magnitude(band, ear, idx[k]))
                    .sum();
                // Left ear leads for positive ITD
                let tau = if ear == 0 { -itd / 2.0 } else { itd / 2.0 };
                let phase = -2.0 * std::f32::consts::PI * f * tau;
                out[band * NUM_EARS + ear] = Complex32::from_polar(mag, phase);
            }
        }
        out
    }
}
