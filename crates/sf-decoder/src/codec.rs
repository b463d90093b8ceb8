//! Decoder lifecycle management
//!
//! [`create`] returns a control half and a processing half. The control
//! half owns the user parameters, rebuilds decoding state at safe points,
//! and publishes immutable [`Snapshot`]s to the audio thread over a
//! wait-free SPSC ring. The audio half never allocates, locks, or touches
//! the filesystem; it drains the ring to the newest snapshot at the start
//! of each frame and decodes with whatever it holds.
//!
//! Rebuilds are skipped while a frame is in flight, so a snapshot can
//! never change underneath the processor mid-frame. A failed rebuild
//! leaves the last published snapshot live.

use parking_lot::Mutex;
use portable_atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use sf_core::{LoudspeakerLayout, ShNormalization, MIN_LOUDSPEAKERS};
use sf_dsp::{StftEngine, NUM_BANDS};

use crate::error::{DecoderError, DecoderResult};
use crate::hrtf::{BinauralTable, HrirSet, HrtfEngine};
use crate::matrix::DecodingMatrixSet;
use crate::params::{
    DecoderSlot, HrtfSource, SlotConfig, UserParameters, NUM_DECODERS,
};
use crate::processor::DecoderProcessor;

/// Snapshot ring depth; rebuilds are rare and the consumer drains to the
/// newest entry every frame
const SNAPSHOT_RING_CAPACITY: usize = 8;

/// Codec lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CodecStatus {
    /// No snapshot has been published yet
    NotInitialized = 0,
    /// A rebuild is running on the control thread
    Initializing = 1,
    /// A snapshot is live and matches the applied parameters
    Initialized = 2,
    /// The last rebuild failed; the previous snapshot (if any) stays live
    Failed = 3,
}

impl CodecStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => CodecStatus::Initializing,
            2 => CodecStatus::Initialized,
            3 => CodecStatus::Failed,
            _ => CodecStatus::NotInitialized,
        }
    }
}

/// Whether the audio thread is inside a process() call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProcessingState {
    /// Between frames
    Idle = 0,
    /// A frame is being decoded right now
    Ongoing = 1,
}

/// Rebuild progress, for UIs polling the control half
#[derive(Debug, Clone)]
pub struct ProgressReport {
    /// 0.0 to 1.0
    pub fraction: f32,
    /// Human-readable stage description
    pub text: String,
}

/// State shared between the two halves
pub(crate) struct SharedState {
    pub(crate) codec_state: AtomicU8,
    pub(crate) proc_state: AtomicU8,
    progress: Mutex<ProgressReport>,
}

/// Immutable decoding state published to the audio thread
pub struct Snapshot {
    /// Monotonic rebuild counter
    pub(crate) generation: u64,
    pub(crate) matrices: DecodingMatrixSet,
    /// Effective decoding order per frequency band
    pub(crate) band_order: Vec<usize>,
    /// Which decoder slot serves each band
    pub(crate) band_slot: Vec<DecoderSlot>,
    pub(crate) slots: [SlotConfig; NUM_DECODERS],
    /// Present when binaural output is enabled
    pub(crate) binaural: Option<BinauralTable>,
    pub(crate) n_ls: usize,
}

impl Snapshot {
    /// Rebuild counter, increases with every published snapshot
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of loudspeaker feeds this snapshot decodes to
    pub fn num_loudspeakers(&self) -> usize {
        self.n_ls
    }

    /// Spherical harmonic channels this snapshot consumes
    pub fn num_input_channels(&self) -> usize {
        sf_core::num_harmonics(self.matrices.master_order())
    }

    /// Channels the processor renders: two ears or the loudspeaker count
    pub fn num_output_channels(&self) -> usize {
        if self.binaural.is_some() {
            sf_core::NUM_EARS
        } else {
            self.n_ls
        }
    }
}

/// Control half: parameter staging, rebuilds, status
pub struct DecoderControl {
    shared: Arc<SharedState>,
    producer: rtrb::Producer<Arc<Snapshot>>,
    sample_rate: u32,
    /// Parameters staged by setters, applied at the next tick
    pending: UserParameters,
    /// Parameters behind the last published snapshot
    applied: UserParameters,
    /// HRTF engine cache, keyed by the source it was built from
    hrtf_cache: Option<(HrtfSource, HrtfEngine)>,
    generation: u64,
    reinit_requested: bool,
    notices: Vec<String>,
    last_error: Option<String>,
}

/// Create a connected control/processor pair
pub fn create(
    sample_rate: u32,
    frame_size: usize,
) -> DecoderResult<(DecoderControl, DecoderProcessor)> {
    if sample_rate == 0 {
        return Err(DecoderError::Config("sample rate must be positive".into()));
    }
    let shared = Arc::new(SharedState {
        codec_state: AtomicU8::new(CodecStatus::NotInitialized as u8),
        proc_state: AtomicU8::new(ProcessingState::Idle as u8),
        progress: Mutex::new(ProgressReport {
            fraction: 0.0,
            text: String::new(),
        }),
    });
    let (producer, consumer) = rtrb::RingBuffer::new(SNAPSHOT_RING_CAPACITY);

    let control = DecoderControl {
        shared: Arc::clone(&shared),
        producer,
        sample_rate,
        pending: UserParameters::default(),
        applied: UserParameters::default(),
        hrtf_cache: None,
        generation: 0,
        reinit_requested: true,
        notices: Vec::new(),
        last_error: None,
    };
    let processor = DecoderProcessor::new(shared, consumer, frame_size)?;
    Ok((control, processor))
}

impl DecoderControl {
    /// Current lifecycle status
    pub fn status(&self) -> CodecStatus {
        CodecStatus::from_u8(self.shared.codec_state.load(Ordering::Acquire))
    }

    /// Rebuild progress, for polling while [`Self::status`] is Initializing
    pub fn progress(&self) -> ProgressReport {
        self.shared.progress.lock().clone()
    }

    /// Parameters behind the last published snapshot
    pub fn applied_parameters(&self) -> &UserParameters {
        &self.applied
    }

    /// Staged parameters, including changes not yet applied
    pub fn pending_parameters(&self) -> &UserParameters {
        &self.pending
    }

    /// Message from the last failed rebuild, if any
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Drain accumulated non-fatal notices (order clamps, HRTF fallbacks)
    pub fn take_notices(&mut self) -> Vec<String> {
        std::mem::take(&mut self.notices)
    }

    /// Stage a master decoding order
    pub fn set_master_order(&mut self, order: usize) {
        let order = UserParameters::clamp_master_order(order);
        if self.pending.master_order != order {
            self.pending.master_order = order;
            // New master order also lifts the per-band ceiling
            for o in &mut self.pending.order_per_band {
                *o = order;
            }
            self.reinit_requested = true;
        }
    }

    /// Stage a decoding order for one frequency band
    pub fn set_band_order(&mut self, band: usize, order: usize) -> DecoderResult<()> {
        if band >= NUM_BANDS {
            return Err(DecoderError::Config(format!(
                "band index {band} out of range (0..{NUM_BANDS})"
            )));
        }
        let order = order.min(self.pending.master_order);
        if self.pending.order_per_band[band] != order {
            self.pending.order_per_band[band] = order;
            self.reinit_requested = true;
        }
        Ok(())
    }

    /// Stage the transition frequency between the two decoder slots
    pub fn set_transition_frequency(&mut self, hz: f32) {
        let hz = hz.clamp(0.0, self.sample_rate as f32 / 2.0);
        if self.pending.transition_hz != hz {
            self.pending.transition_hz = hz;
            self.reinit_requested = true;
        }
    }

    /// Stage a loudspeaker layout
    pub fn set_layout(&mut self, layout: LoudspeakerLayout) {
        if self.pending.layout != layout {
            self.pending.layout = layout;
            self.reinit_requested = true;
        }
    }

    /// Stage binaural rendering on or off
    pub fn set_binaural(&mut self, enabled: bool) {
        if self.pending.binaural != enabled {
            self.pending.binaural = enabled;
            self.reinit_requested = true;
        }
    }

    /// Stage the configuration of one decoder slot
    pub fn set_slot_config(&mut self, slot: DecoderSlot, cfg: SlotConfig) {
        if self.pending.slots[slot.index()] != cfg {
            self.pending.slots[slot.index()] = cfg;
            self.reinit_requested = true;
        }
    }

    /// Stage an HRIR measurement source
    pub fn set_hrtf_source(&mut self, source: HrtfSource) {
        if self.pending.hrtf_source != source {
            self.pending.hrtf_source = source;
            self.reinit_requested = true;
        }
    }

    /// Stage the input normalization convention
    pub fn set_normalization(&mut self, norm: ShNormalization) {
        if self.pending.normalization != norm {
            self.pending.normalization = norm;
            self.reinit_requested = true;
        }
    }

    /// Force a rebuild at the next tick even without parameter changes
    pub fn request_reinit(&mut self) {
        self.reinit_requested = true;
    }

    /// Run one control-plane step
    ///
    /// Returns true when a new snapshot was published. Rebuilds are
    /// deferred while the audio thread is mid-frame; call again from the
    /// control loop until the pending change goes through.
    pub fn tick(&mut self) -> bool {
        if !self.reinit_requested {
            return false;
        }
        if self.shared.proc_state.load(Ordering::Acquire) == ProcessingState::Ongoing as u8 {
            return false;
        }
        if self.producer.is_full() {
            // Consumer has not drained yet; retry on a later tick
            return false;
        }

        self.shared
            .codec_state
            .store(CodecStatus::Initializing as u8, Ordering::Release);

        match self.rebuild() {
            Ok(snapshot) => {
                let generation = snapshot.generation;
                // Capacity was checked above; a full ring here is a bug
                if self.producer.push(Arc::new(snapshot)).is_err() {
                    self.fail("snapshot ring overflow".into());
                    return false;
                }
                self.generation = generation;
                self.applied = self.pending.clone();
                self.reinit_requested = false;
                self.last_error = None;
                self.set_progress(1.0, "ready");
                self.shared
                    .codec_state
                    .store(CodecStatus::Initialized as u8, Ordering::Release);
                log::info!("decoder snapshot {generation} published");
                true
            }
            Err(e) => {
                log::warn!("decoder rebuild failed: {e}");
                // Drop the staged change so the next tick does not loop on
                // the same failure
                self.pending = self.applied.clone();
                self.reinit_requested = false;
                self.fail(e.to_string());
                false
            }
        }
    }

    fn fail(&mut self, message: String) {
        self.last_error = Some(message);
        self.shared
            .codec_state
            .store(CodecStatus::Failed as u8, Ordering::Release);
    }

    fn set_progress(&self, fraction: f32, text: &str) {
        let mut p = self.shared.progress.lock();
        p.fraction = fraction;
        p.text.clear();
        p.text.push_str(text);
    }

    /// Build a snapshot from the pending parameters
    fn rebuild(&mut self) -> DecoderResult<Snapshot> {
        self.set_progress(0.0, "validating configuration");

        let params = self.pending.clone();
        let n_ls = params.layout.len();
        if n_ls < MIN_LOUDSPEAKERS {
            return Err(DecoderError::Config(format!(
                "layout '{}' has {} loudspeakers, at least {} required",
                params.layout.name, n_ls, MIN_LOUDSPEAKERS
            )));
        }

        // A layout can only resolve orders up to roughly sqrt(n_ls) - 1;
        // clamp and report rather than fail.
        let geometric_limit = ((n_ls as f32).sqrt() as usize).saturating_sub(1).max(1);
        let master = UserParameters::clamp_master_order(params.master_order);
        let effective = master.min(geometric_limit);
        if effective < master {
            self.notices.push(format!(
                "decoding order reduced from {master} to {effective} for the \
                 {n_ls}-loudspeaker layout"
            ));
        }

        self.set_progress(0.2, "building decoding matrices");
        let matrices = DecodingMatrixSet::build(
            &params.layout,
            &params.slots,
            effective,
            params.normalization,
        )?;

        let band_freqs = StftEngine::band_frequencies(self.sample_rate);
        let band_order: Vec<usize> = (0..NUM_BANDS)
            .map(|b| params.order_per_band[b].min(effective))
            .collect();
        let band_slot: Vec<DecoderSlot> = band_freqs
            .iter()
            .map(|&f| {
                if f < params.transition_hz {
                    DecoderSlot::Low
                } else {
                    DecoderSlot::High
                }
            })
            .collect();

        let binaural = if params.binaural {
            self.set_progress(0.6, "interpolating HRTFs");
            let dirs = params.layout.directions();
            let engine = self.ensure_hrtf(&params.hrtf_source)?;
            engine.set_loudspeakers(&dirs);
            engine.recompute_dirty();
            Some(engine.table())
        } else {
            None
        };

        self.set_progress(0.9, "publishing");
        Ok(Snapshot {
            generation: self.generation + 1,
            matrices,
            band_order,
            band_slot,
            slots: params.slots,
            binaural,
            n_ls,
        })
    }

    /// Get or build the HRTF engine for a source
    ///
    /// A broken WAV directory degrades to the bundled set with a notice
    /// instead of failing the whole rebuild. The fallback engine is cached
    /// under the Default key, never the failing one, so a repaired
    /// directory is actually re-read at the next rebuild.
    fn ensure_hrtf(&mut self, source: &HrtfSource) -> DecoderResult<&mut HrtfEngine> {
        let cached = matches!(&self.hrtf_cache, Some((key, _)) if key == source);
        if !cached {
            let (key, set) = match source {
                HrtfSource::Default => (HrtfSource::Default, None),
                HrtfSource::WavDirectory(dir) => match HrirSet::load_wav_dir(dir) {
                    Ok(set) => (source.clone(), Some(set)),
                    Err(e) => {
                        log::warn!("HRIR load failed, using bundled set: {e}");
                        self.notices
                            .push(format!("HRIR set unavailable ({e}), using bundled set"));
                        (HrtfSource::Default, None)
                    }
                },
            };
            let have_key = matches!(&self.hrtf_cache, Some((k, _)) if *k == key);
            if !have_key {
                let set = match set {
                    Some(set) => set,
                    None => HrirSet::default_set(self.sample_rate),
                };
                let engine =
                    HrtfEngine::new(&set, StftEngine::band_frequencies(self.sample_rate))?;
                self.hrtf_cache = Some((key, engine));
            }
        }
        // The cache was just populated on the miss path
        match &mut self.hrtf_cache {
            Some((_, engine)) => Ok(engine),
            None => Err(DecoderError::Invariant("HRTF cache empty after load".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sf_core::LayoutPreset;

    #[test]
    fn test_create_starts_uninitialized() {
        let (control, _proc) = create(48000, 512).unwrap();
        assert_eq!(control.status(), CodecStatus::NotInitialized);
    }

    #[test]
    fn test_first_tick_publishes() {
        let (mut control, _proc) = create(48000, 512).unwrap();
        assert!(control.tick());
        assert_eq!(control.status(), CodecStatus::Initialized);
        // Nothing staged, nothing to do
        assert!(!control.tick());
    }

    #[test]
    fn test_too_few_loudspeakers_fails_and_reverts() {
        let (mut control, _proc) = create(48000, 512).unwrap();
        assert!(control.tick());

        let mut layout = LoudspeakerLayout::preset(LayoutPreset::Quad);
        layout.speakers.truncate(2);
        control.set_layout(layout);
        assert!(!control.tick());
        assert_eq!(control.status(), CodecStatus::Failed);
        assert!(control.last_error().is_some());
        // Pending reverted to the applied quad
        assert_eq!(control.pending_parameters().layout.len(), 4);
    }

    #[test]
    fn test_order_clamp_reports_notice_but_succeeds() {
        let (mut control, _proc) = create(48000, 512).unwrap();
        control.set_master_order(5); // quad cannot resolve order 5
        assert!(control.tick());
        assert_eq!(control.status(), CodecStatus::Initialized);
        let notices = control.take_notices();
        assert!(notices.iter().any(|n| n.contains("reduced")));
        assert!(control.take_notices().is_empty());
    }

    #[test]
    fn test_tick_deferred_while_frame_in_flight() {
        let (mut control, _proc) = create(48000, 512).unwrap();
        control
            .shared
            .proc_state
            .store(ProcessingState::Ongoing as u8, Ordering::Release);
        assert!(!control.tick());
        assert_eq!(control.status(), CodecStatus::NotInitialized);

        control
            .shared
            .proc_state
            .store(ProcessingState::Idle as u8, Ordering::Release);
        assert!(control.tick());
    }

    #[test]
    fn test_rebuild_idempotent_generation() {
        let (mut control, _proc) = create(48000, 512).unwrap();
        assert!(control.tick());
        let g1 = control.generation;
        control.request_reinit();
        assert!(control.tick());
        assert_eq!(control.generation, g1 + 1);
    }

    #[test]
    fn test_binaural_snapshot_has_table() {
        let (mut control, mut proc) = create(48000, 512).unwrap();
        control.set_binaural(true);
        assert!(control.tick());
        let snap = proc.drain_for_test().unwrap();
        assert!(snap.binaural.is_some());
        assert_eq!(snap.num_output_channels(), 2);
    }

    #[test]
    fn test_setters_stage_without_applying() {
        let (mut control, _proc) = create(48000, 512).unwrap();
        assert!(control.tick());
        control.set_transition_frequency(2000.0);
        assert_eq!(control.applied_parameters().transition_hz, 800.0);
        assert_eq!(control.pending_parameters().transition_hz, 2000.0);
        assert!(control.tick());
        assert_eq!(control.applied_parameters().transition_hz, 2000.0);
    }

    fn write_left_only_hrir(path: &std::path::Path) {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 48000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for n in 0..64 {
            writer
                .write_sample(if n == 8 { 1.0f32 } else { 0.0 })
                .unwrap();
            writer.write_sample(0.0f32).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_repaired_hrir_directory_is_reloaded() {
        let dir = std::env::temp_dir().join(format!("sf-hrir-reload-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();

        // Empty directory: rebuild succeeds on the bundled fallback set
        let (mut control, mut proc) = create(48000, 512).unwrap();
        control.set_binaural(true);
        control.set_hrtf_source(HrtfSource::WavDirectory(dir.clone()));
        assert!(control.tick());
        assert!(control
            .take_notices()
            .iter()
            .any(|n| n.contains("bundled")));

        // Repair the directory with a left-ear-only octahedron set
        let grid = [
            (0.0f32, 0.0f32),
            (90.0, 0.0),
            (180.0, 0.0),
            (-90.0, 0.0),
            (0.0, 90.0),
            (0.0, -90.0),
        ];
        for (az, el) in grid {
            write_left_only_hrir(&dir.join(format!("azi{az:.0}_elev{el:.0}.wav")));
        }
        control.request_reinit();
        assert!(control.tick());
        assert!(control.last_error().is_none());

        // The new snapshot must reflect the repaired files, not the cached
        // fallback: a left-ear-only set leaves the right ear silent
        let snap = proc.drain_for_test().unwrap();
        let table = snap.binaural.as_ref().unwrap();
        let right_sum: f32 = (0..table.num_loudspeakers())
            .flat_map(|ls| (0..NUM_BANDS).map(move |b| table.at(ls, b, 1).norm()))
            .sum();
        assert!(
            right_sum < 1e-6,
            "fallback HRTF set still in use after repair, right-ear sum {right_sum}"
        );

        let _ = std::fs::remove_dir_all(&dir);
    }
}
