pub mod bands;
pub mod decoder;
pub mod energy;
pub mod fft;
pub mod pcm;
pub mod playback;
pub mod runner;
pub mod scheduler;
pub mod smoothing;

pub use bands::BandMapper;
pub use decoder::FilePcm;
pub use fft::{Radix2Engine, RustFftEngine, SpectralEngine};
pub use pcm::{AudioFormat, MemoryPcm, PcmProvider};
pub use playback::{AudioPlayback, PlaybackClock, WallClock};
pub use runner::{run_visualizer, FrameSink};
pub use scheduler::{Scheduler, SkipReason, TickAction};
pub use smoothing::PeakHold;

/// What the values of a [`SpectrumFrame`] represent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Smoothed magnitude spectrum, one value per bin
    Spectrum,
    /// Perceptual bands, paired with peak-hold values
    Bands,
    /// Wave-energy fallback chunks
    Energy,
}

/// Immutable per-tick snapshot handed to the rendering side.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumFrame {
    pub kind: FrameKind,
    /// Normalized display values in [0, 1]
    pub values: Vec<f32>,
    /// Largest entry of `values`
    pub peak: f32,
    pub peak_holds: Option<Vec<f32>>,
    pub position_ms: u64,
}

impl SpectrumFrame {
    pub fn new(kind: FrameKind, values: Vec<f32>, peak_holds: Option<Vec<f32>>, position_ms: u64) -> Self {
        let peak = values.iter().fold(0.0f32, |a, &b| a.max(b));
        Self {
            kind,
            values,
            peak,
            peak_holds,
            position_ms,
        }
    }
}

impl Default for SpectrumFrame {
    fn default() -> Self {
        Self {
            kind: FrameKind::Spectrum,
            values: Vec::new(),
            peak: 0.0,
            peak_holds: None,
            position_ms: 0,
        }
    }
}
