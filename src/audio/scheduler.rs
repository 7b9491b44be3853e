use anyhow::Result;
use log::{debug, warn};
use std::time::Instant;

use super::bands::{BandLayout, BandMapper};
use super::energy::{wave_energy, ENERGY_BANDS};
use super::pcm::PcmProvider;
use super::playback::PlaybackClock;
use super::smoothing::{decay_in_place, smooth_spectrum, PeakHold};
use super::{FrameKind, SpectrumFrame};
use crate::config::{AnalysisMode, VisualizerConfig};

/// Why a tick did no work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Visualization switched off
    Disabled,
    /// A transform is still in flight
    Busy,
    /// No prepared decode source
    NotReady,
    /// Playback position is still zero
    NotStarted,
    Paused,
    /// Inside the safe-start delay after playback began
    SafeStart,
    /// The windowed read came back empty
    InsufficientData,
}

/// Sample window handed to the transform worker.
#[derive(Debug, Clone)]
pub struct RecomputeJob {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub position_ms: u64,
}

/// What the control loop must do after a tick.
#[derive(Debug)]
pub enum TickAction {
    Skipped(SkipReason),
    /// Run the job off the control loop and pass the result to
    /// [`Scheduler::finish_transform`]. The scheduler stays busy until then.
    Transform(RecomputeJob),
    /// Displayed output changed (inline recompute or decay)
    Updated(SpectrumFrame),
    Unchanged,
}

#[derive(Debug, Default)]
struct ScheduleState {
    last_recompute: Option<Instant>,
    busy: bool,
    playback_started: Option<Instant>,
}

#[derive(Debug)]
struct VisualState {
    display: Option<(FrameKind, Vec<f32>)>,
    /// Last smoothed unbanded output, tagged so spectrum and energy never blend
    previous_spectrum: Option<(FrameKind, Vec<f32>)>,
    previous_bands: Option<Vec<f32>>,
    peaks: PeakHold,
}

/// Two-speed update scheduler.
///
/// Owns every piece of mutable visualization state; the transform worker
/// only ever sees a [`RecomputeJob`] and returns a plain spectrum.
pub struct Scheduler {
    config: VisualizerConfig,
    mapper: Option<BandMapper>,
    schedule: ScheduleState,
    visual: VisualState,
}

impl Scheduler {
    pub fn new(config: VisualizerConfig) -> Self {
        let mapper = BandMapper::from_config(&config);
        let peaks = PeakHold::new(config.peak_step);
        Self {
            config,
            mapper,
            schedule: ScheduleState::default(),
            visual: VisualState {
                display: None,
                previous_spectrum: None,
                previous_bands: None,
                peaks,
            },
        }
    }

    pub fn config(&self) -> &VisualizerConfig {
        &self.config
    }

    /// Swap in a new configuration. Smoothing state whose shape no longer
    /// matches is dropped lazily by the length checks.
    pub fn set_config(&mut self, config: VisualizerConfig) {
        if config.banding != self.config.banding {
            debug!("banding changed to {:?}, resetting band state", config.banding);
            self.visual.previous_bands = None;
            self.visual.peaks.clear();
        }
        self.mapper = BandMapper::from_config(&config);
        self.visual.peaks.set_step(config.peak_step);
        self.config = config;
    }

    pub fn is_busy(&self) -> bool {
        self.schedule.busy
    }

    /// Forget playback timing, e.g. after a track change.
    pub fn reset(&mut self) {
        self.schedule = ScheduleState::default();
        self.visual.display = None;
        self.visual.previous_spectrum = None;
        self.visual.previous_bands = None;
        self.visual.peaks.clear();
    }

    pub fn tick<P, C>(&mut self, now: Instant, clock: &C, pcm: &P) -> TickAction
    where
        P: PcmProvider + ?Sized,
        C: PlaybackClock + ?Sized,
    {
        if self.schedule.busy {
            return TickAction::Skipped(SkipReason::Busy);
        }
        if !self.config.enabled {
            return TickAction::Skipped(SkipReason::Disabled);
        }
        let format = match pcm.format() {
            Some(format) => format,
            None => return TickAction::Skipped(SkipReason::NotReady),
        };

        let position_ms = clock.position_millis();
        if position_ms == 0 {
            self.schedule.playback_started = None;
            return TickAction::Skipped(SkipReason::NotStarted);
        }
        if !clock.is_playing() {
            return TickAction::Skipped(SkipReason::Paused);
        }

        let started = *self.schedule.playback_started.get_or_insert(now);
        if now.saturating_duration_since(started) < self.config.safe_start() {
            return TickAction::Skipped(SkipReason::SafeStart);
        }

        let must_recompute = self
            .schedule
            .last_recompute
            .map_or(true, |last| now.saturating_duration_since(last) >= self.config.full_compute_interval());

        if must_recompute {
            let end_frame = format.frame_at_millis(position_ms);
            let samples = pcm.read_window(end_frame, self.config.window_size);
            if samples.is_empty() {
                return TickAction::Skipped(SkipReason::InsufficientData);
            }
            self.schedule.last_recompute = Some(now);

            return match self.config.analysis {
                AnalysisMode::WaveEnergy => TickAction::Updated(self.apply_energy(&samples, position_ms)),
                AnalysisMode::Transform => {
                    self.schedule.busy = true;
                    TickAction::Transform(RecomputeJob {
                        samples,
                        sample_rate: format.sample_rate,
                        position_ms,
                    })
                }
            };
        }

        if self.config.decay_enabled {
            if let Some(frame) = self.apply_decay(position_ms) {
                return TickAction::Updated(frame);
            }
        }
        TickAction::Unchanged
    }

    /// Consume the worker's result for `job`. A failed transform falls back
    /// to wave energy for this frame. Returns `None` when the result is
    /// discarded because visualization was disabled meanwhile.
    pub fn finish_transform(&mut self, job: RecomputeJob, result: Result<Vec<f32>>) -> Option<SpectrumFrame> {
        self.schedule.busy = false;
        if !self.config.enabled {
            debug!("discarding transform result at {} ms, visualization disabled", job.position_ms);
            return None;
        }

        match result {
            Ok(spectrum) => Some(self.apply_spectrum(spectrum, job.sample_rate, job.position_ms)),
            Err(e) => {
                warn!("spectral transform failed at {} ms, using wave energy: {:#}", job.position_ms, e);
                Some(self.apply_energy(&job.samples, job.position_ms))
            }
        }
    }

    fn apply_spectrum(&mut self, spectrum: Vec<f32>, sample_rate: u32, position_ms: u64) -> SpectrumFrame {
        match self.mapper {
            Some(mapper) => {
                // Raw spectrum smoothing precedes ISO mapping
                let spectrum = match mapper.layout() {
                    BandLayout::Iso => smooth_spectrum(
                        self.previous_of_kind(FrameKind::Spectrum),
                        spectrum,
                        self.config.spectrum_smoothing,
                    ),
                    BandLayout::Log { .. } => spectrum,
                };
                let bands = mapper.map(&spectrum, sample_rate, self.visual.previous_bands.as_deref());
                self.visual.previous_spectrum = Some((FrameKind::Spectrum, spectrum));
                self.show_bands(bands, position_ms)
            }
            None => {
                let previous = self.previous_of_kind(FrameKind::Spectrum);
                let mut smoothed = smooth_spectrum(previous, spectrum, self.config.spectrum_smoothing);
                for value in smoothed.iter_mut() {
                    *value = value.clamp(0.0, 1.0);
                }
                self.show_unbanded(FrameKind::Spectrum, smoothed, position_ms)
            }
        }
    }

    fn apply_energy(&mut self, samples: &[f32], position_ms: u64) -> SpectrumFrame {
        let energy = wave_energy(samples, ENERGY_BANDS);
        let previous = self.previous_of_kind(FrameKind::Energy);
        let smoothed = smooth_spectrum(previous, energy, self.config.spectrum_smoothing);
        self.show_unbanded(FrameKind::Energy, smoothed, position_ms)
    }

    /// Decay the displayed values. `None` once nothing moves any more.
    fn apply_decay(&mut self, position_ms: u64) -> Option<SpectrumFrame> {
        let (kind, values) = self.visual.display.as_mut()?;
        let before = values.clone();
        decay_in_place(values, self.config.decay_factor);
        let (kind, values) = (*kind, values.clone());

        match kind {
            FrameKind::Bands => {
                let peaks_before = self.visual.peaks.values().to_vec();
                self.visual.peaks.update(&values);
                if values == before && self.visual.peaks.values() == peaks_before.as_slice() {
                    return None;
                }
                self.visual.previous_bands = Some(values.clone());
                Some(SpectrumFrame::new(
                    kind,
                    values,
                    Some(self.visual.peaks.values().to_vec()),
                    position_ms,
                ))
            }
            _ => {
                if values == before {
                    return None;
                }
                self.visual.previous_spectrum = Some((kind, values.clone()));
                Some(SpectrumFrame::new(kind, values, None, position_ms))
            }
        }
    }

    fn previous_of_kind(&self, kind: FrameKind) -> Option<&[f32]> {
        match &self.visual.previous_spectrum {
            Some((k, values)) if *k == kind => Some(values.as_slice()),
            _ => None,
        }
    }

    fn show_bands(&mut self, bands: Vec<f32>, position_ms: u64) -> SpectrumFrame {
        self.visual.peaks.update(&bands);
        self.visual.previous_bands = Some(bands.clone());
        self.visual.display = Some((FrameKind::Bands, bands.clone()));
        SpectrumFrame::new(
            FrameKind::Bands,
            bands,
            Some(self.visual.peaks.values().to_vec()),
            position_ms,
        )
    }

    fn show_unbanded(&mut self, kind: FrameKind, values: Vec<f32>, position_ms: u64) -> SpectrumFrame {
        self.visual.previous_spectrum = Some((kind, values.clone()));
        self.visual.display = Some((kind, values.clone()));
        SpectrumFrame::new(kind, values, None, position_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::fft::{Radix2Engine, SpectralEngine};
    use crate::audio::pcm::{AudioFormat, MemoryPcm};
    use crate::config::BandingMode;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::cell::Cell;
    use std::time::Duration;

    struct FixedClock {
        position_ms: Cell<u64>,
        playing: Cell<bool>,
    }

    impl FixedClock {
        fn at(position_ms: u64) -> Self {
            Self {
                position_ms: Cell::new(position_ms),
                playing: Cell::new(true),
            }
        }
    }

    impl PlaybackClock for FixedClock {
        fn position_millis(&self) -> u64 {
            self.position_ms.get()
        }

        fn is_playing(&self) -> bool {
            self.playing.get()
        }
    }

    /// Counts window reads so decay ticks can be shown not to touch PCM.
    struct CountingPcm {
        inner: MemoryPcm,
        reads: Cell<usize>,
    }

    #[async_trait]
    impl PcmProvider for CountingPcm {
        async fn prepare(&mut self) -> Result<AudioFormat> {
            self.inner.prepare().await
        }

        fn format(&self) -> Option<AudioFormat> {
            self.inner.format()
        }

        fn read_window(&self, end_frame: usize, window_frames: usize) -> Vec<f32> {
            self.reads.set(self.reads.get() + 1);
            self.inner.read_window(end_frame, window_frames)
        }

        fn dispose(&mut self) {
            self.inner.dispose();
        }
    }

    async fn tone_pcm() -> CountingPcm {
        let mut pcm = CountingPcm {
            inner: MemoryPcm::sine(440.0, 44100, 1.0, 2, 0.8).unwrap(),
            reads: Cell::new(0),
        };
        pcm.prepare().await.unwrap();
        pcm
    }

    fn config(banding: BandingMode) -> VisualizerConfig {
        VisualizerConfig {
            banding,
            safe_start_ms: 0,
            ..Default::default()
        }
    }

    fn run_job(scheduler: &mut Scheduler, action: TickAction) -> SpectrumFrame {
        match action {
            TickAction::Transform(job) => {
                let result = Radix2Engine.magnitude_spectrum(&job.samples);
                scheduler.finish_transform(job, result).expect("frame")
            }
            other => panic!("expected transform, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_end_to_end_tone_peak_bin() {
        let pcm = tone_pcm().await;
        let mut scheduler = Scheduler::new(config(BandingMode::Off));
        let clock = FixedClock::at(500);

        let action = scheduler.tick(Instant::now(), &clock, &pcm);
        let frame = run_job(&mut scheduler, action);
        assert_eq!(frame.kind, FrameKind::Spectrum);
        assert_eq!(frame.values.len(), 256);
        let peak_bin = frame
            .values
            .iter()
            .enumerate()
            .fold((0, f32::MIN), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
            .0;
        assert_eq!(peak_bin, 5);
        assert_eq!(frame.peak, frame.values[5]);
    }

    #[tokio::test]
    async fn test_never_overlaps_transforms() {
        let pcm = tone_pcm().await;
        let mut scheduler = Scheduler::new(config(BandingMode::default()));
        let clock = FixedClock::at(500);
        let t0 = Instant::now();

        let job = match scheduler.tick(t0, &clock, &pcm) {
            TickAction::Transform(job) => job,
            other => panic!("expected transform, got {:?}", other),
        };
        assert!(scheduler.is_busy());

        let later = t0 + Duration::from_secs(5);
        assert!(matches!(scheduler.tick(later, &clock, &pcm), TickAction::Skipped(SkipReason::Busy)));
        assert_eq!(pcm.reads.get(), 1);

        let result = Radix2Engine.magnitude_spectrum(&job.samples);
        assert!(scheduler.finish_transform(job, result).is_some());
        assert!(!scheduler.is_busy());
        assert!(matches!(scheduler.tick(later, &clock, &pcm), TickAction::Transform(_)));
    }

    #[tokio::test]
    async fn test_decay_tick_does_not_read_pcm() {
        let pcm = tone_pcm().await;
        let mut scheduler = Scheduler::new(config(BandingMode::Off));
        let clock = FixedClock::at(500);
        let t0 = Instant::now();

        let action = scheduler.tick(t0, &clock, &pcm);
        let frame = run_job(&mut scheduler, action);
        assert_eq!(pcm.reads.get(), 1);

        let action = scheduler.tick(t0 + Duration::from_millis(60), &clock, &pcm);
        let decayed = match action {
            TickAction::Updated(frame) => frame,
            other => panic!("expected decay, got {:?}", other),
        };
        assert_eq!(pcm.reads.get(), 1);
        let factor = scheduler.config().decay_factor;
        for (before, after) in frame.values.iter().zip(decayed.values.iter()) {
            assert!((before * factor - after).abs() < 1e-6);
        }
    }

    #[tokio::test]
    async fn test_decay_disabled_leaves_output_unchanged() {
        let pcm = tone_pcm().await;
        let mut scheduler = Scheduler::new(VisualizerConfig {
            decay_enabled: false,
            ..config(BandingMode::Off)
        });
        let clock = FixedClock::at(500);
        let t0 = Instant::now();

        let action = scheduler.tick(t0, &clock, &pcm);
        run_job(&mut scheduler, action);
        assert!(matches!(
            scheduler.tick(t0 + Duration::from_millis(60), &clock, &pcm),
            TickAction::Unchanged
        ));
    }

    #[tokio::test]
    async fn test_recompute_after_interval() {
        let pcm = tone_pcm().await;
        let mut scheduler = Scheduler::new(config(BandingMode::default()));
        let clock = FixedClock::at(500);
        let t0 = Instant::now();

        let action = scheduler.tick(t0, &clock, &pcm);
        run_job(&mut scheduler, action);
        assert!(matches!(
            scheduler.tick(t0 + Duration::from_millis(249), &clock, &pcm),
            TickAction::Updated(_)
        ));
        assert!(matches!(
            scheduler.tick(t0 + Duration::from_millis(250), &clock, &pcm),
            TickAction::Transform(_)
        ));
    }

    #[tokio::test]
    async fn test_safe_start_delay() {
        let pcm = tone_pcm().await;
        let mut scheduler = Scheduler::new(VisualizerConfig::default());
        let clock = FixedClock::at(40);
        let t0 = Instant::now();

        assert!(matches!(scheduler.tick(t0, &clock, &pcm), TickAction::Skipped(SkipReason::SafeStart)));
        assert!(matches!(
            scheduler.tick(t0 + Duration::from_millis(1199), &clock, &pcm),
            TickAction::Skipped(SkipReason::SafeStart)
        ));
        assert!(matches!(
            scheduler.tick(t0 + Duration::from_millis(1200), &clock, &pcm),
            TickAction::Transform(_)
        ));
        assert_eq!(pcm.reads.get(), 1);
    }

    #[tokio::test]
    async fn test_not_ready_and_not_started() {
        let mut pcm = CountingPcm {
            inner: MemoryPcm::sine(440.0, 44100, 0.1, 1, 0.5).unwrap(),
            reads: Cell::new(0),
        };
        let mut scheduler = Scheduler::new(config(BandingMode::default()));
        let clock = FixedClock::at(50);
        let now = Instant::now();

        assert!(matches!(scheduler.tick(now, &clock, &pcm), TickAction::Skipped(SkipReason::NotReady)));

        pcm.prepare().await.unwrap();
        clock.position_ms.set(0);
        assert!(matches!(scheduler.tick(now, &clock, &pcm), TickAction::Skipped(SkipReason::NotStarted)));

        clock.position_ms.set(50);
        clock.playing.set(false);
        assert!(matches!(scheduler.tick(now, &clock, &pcm), TickAction::Skipped(SkipReason::Paused)));

        scheduler.set_config(VisualizerConfig {
            enabled: false,
            ..config(BandingMode::default())
        });
        assert!(matches!(scheduler.tick(now, &clock, &pcm), TickAction::Skipped(SkipReason::Disabled)));
        assert_eq!(pcm.reads.get(), 0);
    }

    #[tokio::test]
    async fn test_transform_failure_falls_back_to_energy() {
        let pcm = tone_pcm().await;
        let mut scheduler = Scheduler::new(config(BandingMode::default()));
        let clock = FixedClock::at(500);

        let job = match scheduler.tick(Instant::now(), &clock, &pcm) {
            TickAction::Transform(job) => job,
            other => panic!("expected transform, got {:?}", other),
        };
        let frame = scheduler.finish_transform(job, Err(anyhow!("boom"))).unwrap();
        assert_eq!(frame.kind, FrameKind::Energy);
        assert_eq!(frame.values.len(), ENERGY_BANDS);
        assert!(frame.peak > 0.0);
        assert!(!scheduler.is_busy());
    }

    #[tokio::test]
    async fn test_result_discarded_when_disabled_in_flight() {
        let pcm = tone_pcm().await;
        let mut scheduler = Scheduler::new(config(BandingMode::default()));
        let clock = FixedClock::at(500);

        let job = match scheduler.tick(Instant::now(), &clock, &pcm) {
            TickAction::Transform(job) => job,
            other => panic!("expected transform, got {:?}", other),
        };
        scheduler.set_config(VisualizerConfig {
            enabled: false,
            ..config(BandingMode::default())
        });
        let result = Radix2Engine.magnitude_spectrum(&job.samples);
        assert!(scheduler.finish_transform(job, result).is_none());
        assert!(!scheduler.is_busy());
    }

    #[tokio::test]
    async fn test_banded_frames_carry_peak_holds() {
        let pcm = tone_pcm().await;
        let mut scheduler = Scheduler::new(config(BandingMode::Log { bands: 32 }));
        let clock = FixedClock::at(500);
        let t0 = Instant::now();

        let action = scheduler.tick(t0, &clock, &pcm);
        let frame = run_job(&mut scheduler, action);
        assert_eq!(frame.kind, FrameKind::Bands);
        assert_eq!(frame.values.len(), 32);
        let holds = frame.peak_holds.clone().unwrap();
        assert_eq!(holds, frame.values);

        let decayed = match scheduler.tick(t0 + Duration::from_millis(60), &clock, &pcm) {
            TickAction::Updated(frame) => frame,
            other => panic!("expected decay, got {:?}", other),
        };
        let step = scheduler.config().peak_step;
        for (held, now) in holds.iter().zip(decayed.peak_holds.unwrap().iter()) {
            assert!(((held - step).max(0.0) - now).abs() < 1e-6);
        }
    }

    #[tokio::test]
    async fn test_mode_switch_resets_band_state() {
        let pcm = tone_pcm().await;
        let mut scheduler = Scheduler::new(config(BandingMode::Log { bands: 32 }));
        let clock = FixedClock::at(500);
        let t0 = Instant::now();

        let action = scheduler.tick(t0, &clock, &pcm);
        run_job(&mut scheduler, action);
        scheduler.set_config(config(BandingMode::Iso));
        let action = scheduler.tick(t0 + Duration::from_secs(1), &clock, &pcm);
        let frame = run_job(&mut scheduler, action);
        assert_eq!(frame.values.len(), 31);
        assert_eq!(frame.peak_holds.unwrap(), frame.values);
    }

    #[tokio::test]
    async fn test_wave_energy_mode_runs_inline() {
        let pcm = tone_pcm().await;
        let mut scheduler = Scheduler::new(VisualizerConfig {
            analysis: AnalysisMode::WaveEnergy,
            ..config(BandingMode::default())
        });
        let clock = FixedClock::at(500);

        match scheduler.tick(Instant::now(), &clock, &pcm) {
            TickAction::Updated(frame) => {
                assert_eq!(frame.kind, FrameKind::Energy);
                assert_eq!(frame.values.len(), ENERGY_BANDS);
            }
            other => panic!("expected inline update, got {:?}", other),
        }
        assert!(!scheduler.is_busy());
    }

    #[test]
    fn test_iso_mode_smooths_spectrum_before_band_ema() {
        let mut scheduler = Scheduler::new(VisualizerConfig {
            ema_alpha: 0.1,
            ..config(BandingMode::Iso)
        });
        let job = || RecomputeJob {
            samples: vec![0.0; 512],
            sample_rate: 44100,
            position_ms: 500,
        };

        let silent = scheduler.finish_transform(job(), Ok(vec![0.0; 256])).unwrap();
        assert!(silent.values.iter().all(|&v| v == 0.0));

        let frame = scheduler.finish_transform(job(), Ok(vec![1.0; 256])).unwrap();
        // Spectrum blend 0.6 * 0 + 0.4 * 1, then band EMA 0.1 * 0 + 0.9 * norm
        let norm = ((10.0 * (0.4f32 * 0.4 + 1e-12).log10() + 60.0) / 60.0).clamp(0.0, 1.0);
        let expected = 0.9 * norm;
        assert_eq!(frame.values.len(), 31);
        for &value in &frame.values {
            assert!((value - expected).abs() < 1e-4, "{} vs {}", value, expected);
        }
    }

    #[tokio::test]
    async fn test_settled_display_emits_nothing() {
        let pcm = tone_pcm().await;
        let clock = FixedClock::at(500);

        for banding in [BandingMode::Off, BandingMode::Log { bands: 32 }] {
            let mut scheduler = Scheduler::new(config(banding));
            let t0 = Instant::now();
            let job = match scheduler.tick(t0, &clock, &pcm) {
                TickAction::Transform(job) => job,
                other => panic!("expected transform, got {:?}", other),
            };
            let frame = scheduler.finish_transform(job, Ok(vec![0.0; 256])).unwrap();
            assert_eq!(frame.peak, 0.0);

            for ms in [60, 120] {
                assert!(
                    matches!(scheduler.tick(t0 + Duration::from_millis(ms), &clock, &pcm), TickAction::Unchanged),
                    "{:?} at {} ms",
                    banding,
                    ms
                );
            }
        }
    }
}
