//! Real-time decoding path
//!
//! One [`DecoderProcessor::process`] call per audio frame. The hot path is
//! allocation-free after warm-up: transform engines and scratch buffers are
//! created when a snapshot first arrives (or when its channel counts
//! change) and reused for every following frame. Snapshot exchange is a
//! wait-free ring drain; parameter changes staged on the control half
//! become audible at the first frame after the corresponding tick.

use num_complex::Complex32;
use portable_atomic::Ordering;
use std::sync::Arc;

use sf_dsp::{StftEngine, TfFrame, NUM_BANDS};

use crate::codec::{ProcessingState, SharedState, Snapshot};
use crate::error::{DecoderError, DecoderResult};

/// Audio half of the decoder
pub struct DecoderProcessor {
    shared: Arc<SharedState>,
    consumer: rtrb::Consumer<Arc<Snapshot>>,
    current: Option<Arc<Snapshot>>,
    frame_size: usize,

    forward: Option<StftEngine>,
    inverse: Option<StftEngine>,
    in_time: Vec<Vec<f32>>,
    out_time: Vec<Vec<f32>>,
    in_tf: Option<TfFrame>,
    out_tf: Option<TfFrame>,
    /// Per-loudspeaker scratch for one (band, slot) column
    ls_scratch: Vec<Complex32>,
}

impl DecoderProcessor {
    pub(crate) fn new(
        shared: Arc<SharedState>,
        consumer: rtrb::Consumer<Arc<Snapshot>>,
        frame_size: usize,
    ) -> DecoderResult<Self> {
        // Validate up front so process() cannot hit it per frame
        StftEngine::new(1, frame_size)?;
        Ok(Self {
            shared,
            consumer,
            current: None,
            frame_size,
            forward: None,
            inverse: None,
            in_time: Vec::new(),
            out_time: Vec::new(),
            in_tf: None,
            out_tf: None,
            ls_scratch: Vec::new(),
        })
    }

    /// Frame size in samples this processor was created for
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Fixed algorithmic latency in samples
    pub fn latency_samples(&self) -> usize {
        sf_dsp::FFT_SIZE - sf_dsp::HOP_SIZE
    }

    /// Generation of the snapshot currently decoding, if any
    pub fn current_generation(&self) -> Option<u64> {
        self.current.as_ref().map(|s| s.generation())
    }

    /// Decode one frame of spherical harmonic input into output feeds
    ///
    /// `input` holds ACN-ordered channels; missing harmonics are treated
    /// as silent, surplus ones are ignored. `output` channels beyond what
    /// the current snapshot renders are zeroed. Until the first snapshot
    /// arrives the output is silence.
    pub fn process(
        &mut self,
        input: &[Vec<f32>],
        output: &mut [Vec<f32>],
    ) -> DecoderResult<()> {
        self.shared
            .proc_state
            .store(ProcessingState::Ongoing as u8, Ordering::Release);
        let result = self.process_inner(input, output);
        self.shared
            .proc_state
            .store(ProcessingState::Idle as u8, Ordering::Release);
        result
    }

    fn process_inner(
        &mut self,
        input: &[Vec<f32>],
        output: &mut [Vec<f32>],
    ) -> DecoderResult<()> {
        for ch in input {
            if ch.len() != self.frame_size {
                return Err(DecoderError::Dsp(sf_dsp::DspError::BufferSizeMismatch {
                    expected: self.frame_size,
                    got: ch.len(),
                }));
            }
        }
        for ch in output.iter() {
            if ch.len() != self.frame_size {
                return Err(DecoderError::Dsp(sf_dsp::DspError::BufferSizeMismatch {
                    expected: self.frame_size,
                    got: ch.len(),
                }));
            }
        }

        // Newest snapshot wins; intermediate ones were never audible
        while let Ok(snapshot) = self.consumer.pop() {
            self.current = Some(snapshot);
        }

        // A failed or in-flight rebuild never touches the published
        // snapshot, so whatever we hold stays valid
        let Some(snapshot) = self.current.clone() else {
            silence(output);
            return Ok(());
        };

        let n_sh = snapshot.num_input_channels();
        let n_out = snapshot.num_output_channels();
        self.ensure_engines(n_sh, n_out)?;

        // Gather available harmonics, zero the rest
        for (ch, buf) in self.in_time.iter_mut().enumerate() {
            if let Some(src) = input.get(ch) {
                buf.copy_from_slice(src);
            } else {
                buf.fill(0.0);
            }
        }

        let (Some(forward), Some(inverse), Some(in_tf), Some(out_tf)) = (
            self.forward.as_mut(),
            self.inverse.as_mut(),
            self.in_tf.as_mut(),
            self.out_tf.as_mut(),
        ) else {
            return Err(DecoderError::Invariant(
                "transform engines missing after ensure".into(),
            ));
        };

        forward.forward(&self.in_time, in_tf)?;
        out_tf.clear();

        let slots_per_frame = forward.slots();
        for band in 0..NUM_BANDS {
            let order = snapshot.band_order[band];
            let slot = snapshot.band_slot[band];
            let cfg = snapshot.slots[slot.index()];
            let m = snapshot.matrices.complex_matrix(slot, order, cfg.max_re);
            let gain = snapshot.matrices.norm(slot, order)[cfg.diffuse_eq as usize];
            let n_band_sh = sf_core::num_harmonics(order);

            for t in 0..slots_per_frame {
                for (ls, g) in self.ls_scratch.iter_mut().enumerate() {
                    let mut acc = Complex32::ZERO;
                    for ch in 0..n_band_sh {
                        acc += m[[ls, ch]] * in_tf.at(band, ch, t);
                    }
                    *g = acc * gain;
                }

                match &snapshot.binaural {
                    Some(table) => {
                        for ear in 0..sf_core::NUM_EARS {
                            let mut acc = Complex32::ZERO;
                            for (ls, g) in self.ls_scratch.iter().enumerate() {
                                acc += table.at(ls, band, ear) * g;
                            }
                            *out_tf.at_mut(band, ear, t) = acc;
                        }
                    }
                    None => {
                        for (ls, g) in self.ls_scratch.iter().enumerate() {
                            *out_tf.at_mut(band, ls, t) = *g;
                        }
                    }
                }
            }
        }

        inverse.inverse(out_tf, &mut self.out_time)?;

        let rendered = n_out.min(output.len());
        for (ch, dst) in output.iter_mut().enumerate() {
            if ch < rendered {
                dst.copy_from_slice(&self.out_time[ch]);
            } else {
                dst.fill(0.0);
            }
        }
        Ok(())
    }

    /// (Re)build transform engines when snapshot channel counts change
    fn ensure_engines(&mut self, n_sh: usize, n_out: usize) -> DecoderResult<()> {
        let fwd_ok = self.forward.as_ref().is_some_and(|e| e.channels() == n_sh);
        if !fwd_ok {
            let engine = StftEngine::new(n_sh, self.frame_size)?;
            self.in_tf = Some(TfFrame::new(n_sh, engine.slots()));
            self.in_time = vec![vec![0.0; self.frame_size]; n_sh];
            self.forward = Some(engine);
        }
        let inv_ok = self.inverse.as_ref().is_some_and(|e| e.channels() == n_out);
        if !inv_ok {
            let engine = StftEngine::new(n_out, self.frame_size)?;
            self.out_tf = Some(TfFrame::new(n_out, engine.slots()));
            self.out_time = vec![vec![0.0; self.frame_size]; n_out];
            self.inverse = Some(engine);
        }
        if let Some(snapshot) = &self.current {
            if self.ls_scratch.len() != snapshot.num_loudspeakers() {
                self.ls_scratch = vec![Complex32::ZERO; snapshot.num_loudspeakers()];
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn drain_for_test(&mut self) -> Option<Arc<Snapshot>> {
        while let Ok(snapshot) = self.consumer.pop() {
            self.current = Some(snapshot);
        }
        self.current.clone()
    }
}

fn silence(output: &mut [Vec<f32>]) {
    for ch in output {
        ch.fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use crate::codec::create;

    fn frame(channels: usize, size: usize) -> Vec<Vec<f32>> {
        vec![vec![0.0f32; size]; channels]
    }

    #[test]
    fn test_silence_before_first_snapshot() {
        let (_control, mut proc) = create(48000, 512).unwrap();
        let input = frame(4, 512);
        let mut output = vec![vec![1.0f32; 512]; 4];
        proc.process(&input, &mut output).unwrap();
        assert!(output.iter().all(|ch| ch.iter().all(|&s| s == 0.0)));
    }

    #[test]
    fn test_rejects_wrong_frame_size() {
        let (_control, mut proc) = create(48000, 512).unwrap();
        let input = frame(4, 100);
        let mut output = frame(4, 512);
        assert!(proc.process(&input, &mut output).is_err());
    }

    #[test]
    fn test_decodes_after_tick() {
        let (mut control, mut proc) = create(48000, 512).unwrap();
        assert!(control.tick());

        // Unit omni input; after transform latency the quad outputs carry
        // equal nonzero energy
        let mut input = frame(4, 512);
        for s in &mut input[0] {
            *s = 1.0;
        }
        let mut output = frame(4, 512);
        proc.process(&input, &mut output).unwrap();
        proc.process(&input, &mut output).unwrap();

        let energies: Vec<f32> = output
            .iter()
            .map(|ch| ch.iter().map(|s| s * s).sum::<f32>())
            .collect();
        assert!(energies.iter().all(|&e| e > 0.0));
        for e in &energies[1..] {
            let ratio = e / energies[0];
            assert!((0.9..1.1).contains(&ratio), "uneven quad energy: {energies:?}");
        }
    }

    #[test]
    fn test_snapshot_generation_tracked() {
        let (mut control, mut proc) = create(48000, 512).unwrap();
        assert!(control.tick());
        let input = frame(4, 512);
        let mut output = frame(4, 512);
        proc.process(&input, &mut output).unwrap();
        assert_eq!(proc.current_generation(), Some(1));

        control.request_reinit();
        assert!(control.tick());
        proc.process(&input, &mut output).unwrap();
        assert_eq!(proc.current_generation(), Some(2));
    }

    #[test]
    fn test_extra_output_channels_are_zeroed() {
        let (mut control, mut proc) = create(48000, 512).unwrap();
        control.set_binaural(true);
        assert!(control.tick());

        let mut input = frame(4, 512);
        for s in &mut input[0] {
            *s = 0.5;
        }
        let mut output = frame(4, 512);
        proc.process(&input, &mut output).unwrap();
        proc.process(&input, &mut output).unwrap();
        // Binaural renders two ears; the remaining channels stay silent
        assert!(output[2].iter().all(|&s| s == 0.0));
        assert!(output[3].iter().all(|&s| s == 0.0));
        assert!(output[0].iter().any(|&s| s != 0.0));
    }
}
