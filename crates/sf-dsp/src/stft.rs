//! Overlapping STFT transform
//!
//! Square-root Hann analysis and synthesis windows at 50% overlap, so the
//! forward/inverse pair reconstructs the input exactly (up to float
//! rounding) after a fixed latency of [`StftEngine::latency_samples`]
//! samples. One engine instance owns the streaming state for a fixed
//! channel count and frame size; reconfiguration means building a new
//! engine.

use num_complex::Complex32;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use std::sync::Arc;

use crate::error::{DspError, DspResult};

/// Hop size in samples (one time slot)
pub const HOP_SIZE: usize = 128;
/// FFT size (50% overlap)
pub const FFT_SIZE: usize = 256;
/// Number of frequency bands (FFT_SIZE / 2 + 1)
pub const NUM_BANDS: usize = FFT_SIZE / 2 + 1;

/// Time-frequency frame: bands x channels x slots, contiguous
#[derive(Debug, Clone)]
pub struct TfFrame {
    data: Vec<Complex32>,
    channels: usize,
    slots: usize,
}

impl TfFrame {
    /// Allocate a zeroed frame
    pub fn new(channels: usize, slots: usize) -> Self {
        Self {
            data: vec![Complex32::ZERO; NUM_BANDS * channels * slots],
            channels,
            slots,
        }
    }

    /// Number of channels
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Number of time slots
    pub fn slots(&self) -> usize {
        self.slots
    }

    #[inline]
    fn idx(&self, band: usize, channel: usize, slot: usize) -> usize {
        (band * self.channels + channel) * self.slots + slot
    }

    /// Read one bin
    #[inline]
    pub fn at(&self, band: usize, channel: usize, slot: usize) -> Complex32 {
        self.data[self.idx(band, channel, slot)]
    }

    /// Write one bin
    #[inline]
    pub fn at_mut(&mut self, band: usize, channel: usize, slot: usize) -> &mut Complex32 {
        let i = self.idx(band, channel, slot);
        &mut self.data[i]
    }

    /// Zero all bins
    pub fn clear(&mut self) {
        self.data.fill(Complex32::ZERO);
    }
}

/// Streaming STFT engine for a fixed channel count and frame size
pub struct StftEngine {
    channels: usize,
    frame_size: usize,
    slots: usize,
    window: Vec<f32>,
    fwd: Arc<dyn RealToComplex<f32>>,
    inv: Arc<dyn ComplexToReal<f32>>,
    /// Last hop of the previous input frame, per channel
    analysis_tail: Vec<Vec<f32>>,
    /// Overlap carry of the synthesis accumulator, per channel
    synthesis_tail: Vec<Vec<f32>>,
    // scratch
    time_scratch: Vec<f32>,
    freq_scratch: Vec<Complex32>,
    acc_scratch: Vec<f32>,
}

impl StftEngine {
    /// Create an engine; frame size must be a positive multiple of the hop
    pub fn new(channels: usize, frame_size: usize) -> DspResult<Self> {
        if frame_size == 0 || frame_size % HOP_SIZE != 0 {
            return Err(DspError::InvalidFrameSize(frame_size));
        }
        let mut planner = RealFftPlanner::<f32>::new();
        let fwd = planner.plan_fft_forward(FFT_SIZE);
        let inv = planner.plan_fft_inverse(FFT_SIZE);

        // Periodic sqrt-Hann; the analysis/synthesis product sums to one
        // at 50% overlap.
        let window: Vec<f32> = (0..FFT_SIZE)
            .map(|n| {
                let hann =
                    0.5 * (1.0 - (2.0 * std::f32::consts::PI * n as f32 / FFT_SIZE as f32).cos());
                hann.sqrt()
            })
            .collect();

        Ok(Self {
            channels,
            frame_size,
            slots: frame_size / HOP_SIZE,
            window,
            fwd,
            inv,
            analysis_tail: vec![vec![0.0; HOP_SIZE]; channels],
            synthesis_tail: vec![vec![0.0; FFT_SIZE - HOP_SIZE]; channels],
            time_scratch: vec![0.0; FFT_SIZE],
            freq_scratch: vec![Complex32::ZERO; NUM_BANDS],
            acc_scratch: vec![0.0; frame_size + FFT_SIZE - HOP_SIZE],
        })
    }

    /// Channel count this engine was built for
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Frame size in samples
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Time slots per frame
    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Fixed processing latency of a forward + inverse round trip
    pub fn latency_samples(&self) -> usize {
        FFT_SIZE - HOP_SIZE
    }

    /// Band center frequencies in Hz for a host sample rate
    pub fn band_frequencies(sample_rate: u32) -> Vec<f32> {
        (0..NUM_BANDS)
            .map(|k| k as f32 * sample_rate as f32 / FFT_SIZE as f32)
            .collect()
    }

    /// Forward transform of one multi-channel time frame
    pub fn forward(&mut self, input: &[Vec<f32>], out: &mut TfFrame) -> DspResult<()> {
        if input.len() != self.channels {
            return Err(DspError::ChannelMismatch {
                expected: self.channels,
                got: input.len(),
            });
        }
        if out.channels() != self.channels || out.slots() != self.slots {
            return Err(DspError::ChannelMismatch {
                expected: self.channels,
                got: out.channels(),
            });
        }

        for (ch, samples) in input.iter().enumerate() {
            if samples.len() != self.frame_size {
                return Err(DspError::BufferSizeMismatch {
                    expected: self.frame_size,
                    got: samples.len(),
                });
            }
            for slot in 0..self.slots {
                // Segment start in the [tail | frame] timeline
                let start = slot * HOP_SIZE;
                for n in 0..FFT_SIZE {
                    let i = start + n;
                    let s = if i < HOP_SIZE {
                        self.analysis_tail[ch][i]
                    } else {
                        samples[i - HOP_SIZE]
                    };
                    self.time_scratch[n] = s * self.window[n];
                }
                self.fwd
                    .process(&mut self.time_scratch, &mut self.freq_scratch)
                    .map_err(|_| DspError::BufferSizeMismatch {
                        expected: FFT_SIZE,
                        got: self.time_scratch.len(),
                    })?;
                for band in 0..NUM_BANDS {
                    *out.at_mut(band, ch, slot) = self.freq_scratch[band];
                }
            }
            self.analysis_tail[ch]
                .copy_from_slice(&samples[self.frame_size - HOP_SIZE..]);
        }
        Ok(())
    }

    /// Inverse transform into one multi-channel time frame
    pub fn inverse(&mut self, tf: &TfFrame, output: &mut [Vec<f32>]) -> DspResult<()> {
        if output.len() != self.channels || tf.channels() != self.channels {
            return Err(DspError::ChannelMismatch {
                expected: self.channels,
                got: output.len(),
            });
        }

        let carry = FFT_SIZE - HOP_SIZE;
        let scale = 1.0 / FFT_SIZE as f32;
        for (ch, samples) in output.iter_mut().enumerate() {
            if samples.len() != self.frame_size {
                return Err(DspError::BufferSizeMismatch {
                    expected: self.frame_size,
                    got: samples.len(),
                });
            }
            self.acc_scratch.fill(0.0);
            self.acc_scratch[..carry].copy_from_slice(&self.synthesis_tail[ch]);

            for slot in 0..self.slots {
                for band in 0..NUM_BANDS {
                    self.freq_scratch[band] = tf.at(band, ch, slot);
                }
                // realfft rejects inverse inputs with non-zero imaginary
                // parts at DC/Nyquist, so zero them explicitly.
                self.freq_scratch[0].im = 0.0;
                self.freq_scratch[NUM_BANDS - 1].im = 0.0;
                self.inv
                    .process(&mut self.freq_scratch, &mut self.time_scratch)
                    .map_err(|_| DspError::BufferSizeMismatch {
                        expected: FFT_SIZE,
                        got: self.freq_scratch.len(),
                    })?;
                let start = slot * HOP_SIZE;
                for n in 0..FFT_SIZE {
                    self.acc_scratch[start + n] += self.time_scratch[n] * self.window[n] * scale;
                }
            }

            samples.copy_from_slice(&self.acc_scratch[..self.frame_size]);
            self.synthesis_tail[ch].copy_from_slice(&self.acc_scratch[self.frame_size..]);
        }
        Ok(())
    }

    /// Reset all streaming state
    pub fn reset(&mut self) {
        for tail in &mut self.analysis_tail {
            tail.fill(0.0);
        }
        for tail in &mut self.synthesis_tail {
            tail.fill(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_rejects_bad_frame_size() {
        assert!(StftEngine::new(1, 100).is_err());
        assert!(StftEngine::new(1, 0).is_err());
        assert!(StftEngine::new(1, 512).is_ok());
    }

    #[test]
    fn test_band_frequencies() {
        let freqs = StftEngine::band_frequencies(48000);
        assert_eq!(freqs.len(), NUM_BANDS);
        assert_eq!(freqs[0], 0.0);
        assert_abs_diff_eq!(freqs[NUM_BANDS - 1], 24000.0, epsilon = 1e-3);
    }

    #[test]
    fn test_roundtrip_reconstructs_with_latency() {
        let frame = 512;
        let mut engine = StftEngine::new(1, frame).unwrap();
        let latency = engine.latency_samples();

        // Two frames of a sine so the second frame is past warm-up
        let sig: Vec<f32> = (0..frame * 2)
            .map(|n| (2.0 * std::f32::consts::PI * 440.0 * n as f32 / 48000.0).sin())
            .collect();

        let mut tf = TfFrame::new(1, engine.slots());
        let mut out = vec![vec![0.0f32; frame]];
        let mut rendered = Vec::new();
        for f in 0..2 {
            let input = vec![sig[f * frame..(f + 1) * frame].to_vec()];
            engine.forward(&input, &mut tf).unwrap();
            engine.inverse(&tf, &mut out).unwrap();
            rendered.extend_from_slice(&out[0]);
        }

        // Compare the second frame against the delayed input
        for n in frame..(2 * frame - latency) {
            assert_abs_diff_eq!(rendered[n + latency], sig[n], epsilon = 1e-3);
        }
    }

    #[test]
    fn test_channel_mismatch_is_error() {
        let mut engine = StftEngine::new(2, 256).unwrap();
        let mut tf = TfFrame::new(2, engine.slots());
        let input = vec![vec![0.0f32; 256]];
        assert!(engine.forward(&input, &mut tf).is_err());
    }
}
