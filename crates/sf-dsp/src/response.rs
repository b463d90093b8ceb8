//! HRIR to per-band response conversion

use num_complex::Complex32;
use rustfft::FftPlanner;

use crate::stft::{FFT_SIZE, NUM_BANDS};

/// Convert one HRIR to a complex response on the transform's band grid
///
/// The impulse response is zero-padded (or truncated) to the transform FFT
/// size, so the result lines up bin-for-bin with [`crate::TfFrame`] bands.
pub fn hrir_band_response(hrir: &[f32]) -> Vec<Complex32> {
    let mut buf: Vec<Complex32> = hrir
        .iter()
        .take(FFT_SIZE)
        .map(|&s| Complex32::new(s, 0.0))
        .collect();
    buf.resize(FFT_SIZE, Complex32::ZERO);

    let mut planner = FftPlanner::<f32>::new();
    planner.plan_fft_forward(FFT_SIZE).process(&mut buf);
    buf.truncate(NUM_BANDS);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_unit_impulse_is_flat() {
        let mut hrir = vec![0.0f32; 64];
        hrir[0] = 1.0;
        let resp = hrir_band_response(&hrir);
        assert_eq!(resp.len(), NUM_BANDS);
        for r in &resp {
            assert_abs_diff_eq!(r.norm(), 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_delayed_impulse_has_linear_phase() {
        let mut hrir = vec![0.0f32; 64];
        hrir[4] = 1.0;
        let resp = hrir_band_response(&hrir);
        // Magnitude still flat, phase rotates with frequency
        for (k, r) in resp.iter().enumerate() {
            assert_abs_diff_eq!(r.norm(), 1.0, epsilon = 1e-5);
            let expected = -2.0 * std::f32::consts::PI * k as f32 * 4.0 / FFT_SIZE as f32;
            let diff = (r.arg() - expected).rem_euclid(2.0 * std::f32::consts::PI);
            assert!(diff < 1e-3 || diff > 2.0 * std::f32::consts::PI - 1e-3);
        }
    }
}
