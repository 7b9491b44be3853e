use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Shape of a prepared decoded-audio source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub total_frames: usize,
}

impl AudioFormat {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.total_frames as f64 / self.sample_rate as f64)
    }

    /// Frame index reached after `millis` of playback.
    pub fn frame_at_millis(&self, millis: u64) -> usize {
        (millis as u128 * self.sample_rate as u128 / 1000) as usize
    }

    pub fn nyquist(&self) -> f32 {
        self.sample_rate as f32 / 2.0
    }
}

/// Decoded-audio provider the scheduler reads sample windows from.
///
/// `prepare` may be slow (it decodes the whole track), so it is async.
/// `read_window` is a cheap random-access copy and runs on the control loop.
#[async_trait]
pub trait PcmProvider: Send {
    async fn prepare(&mut self) -> Result<AudioFormat>;

    /// Format of the prepared source, `None` until `prepare` succeeds or after `dispose`.
    fn format(&self) -> Option<AudioFormat>;

    /// Exactly `window_frames` mono samples ending (exclusive) at `end_frame`,
    /// left-padded with zeros near the start of the stream. Empty when nothing
    /// can be read.
    fn read_window(&self, end_frame: usize, window_frames: usize) -> Vec<f32>;

    fn dispose(&mut self);
}

/// Interleaved `f32` PCM held in memory.
#[derive(Debug, Clone)]
pub struct InterleavedPcm {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl InterleavedPcm {
    pub fn new(samples: Vec<f32>, channels: u16, sample_rate: u32) -> Result<Self> {
        if channels == 0 {
            bail!("PCM must have at least one channel");
        }
        if sample_rate == 0 {
            bail!("PCM sample rate must be non-zero");
        }
        Ok(Self {
            samples,
            channels,
            sample_rate,
        })
    }

    pub fn total_frames(&self) -> usize {
        let channels = self.channels as usize;
        (self.samples.len() + channels - 1) / channels
    }

    pub fn format(&self) -> AudioFormat {
        AudioFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
            total_frames: self.total_frames(),
        }
    }

    /// Mono window ending at `end_frame`; see [`PcmProvider::read_window`].
    ///
    /// `end_frame` past the end of the track is clamped to the last frame.
    pub fn read_mono_window(&self, end_frame: usize, window_frames: usize) -> Vec<f32> {
        let end_frame = end_frame.min(self.total_frames());
        let start_frame = end_frame.saturating_sub(window_frames);
        let frames_available = window_frames.min(end_frame - start_frame);
        if frames_available == 0 {
            return Vec::new();
        }

        let channels = self.channels as usize;
        let mut window = Vec::with_capacity(window_frames);
        window.resize(window_frames - frames_available, 0.0);

        let first = start_frame * channels;
        let last = ((start_frame + frames_available) * channels).min(self.samples.len());
        for frame in self.samples[first..last].chunks(channels) {
            // A truncated trailing frame counts its missing channels as silence
            let sum: f32 = frame.iter().sum();
            window.push(sum / channels as f32);
        }

        window
    }
}

/// In-memory provider, ready as soon as it is prepared.
pub struct MemoryPcm {
    pcm: Option<InterleavedPcm>,
    prepared: bool,
}

impl MemoryPcm {
    pub fn new(pcm: InterleavedPcm) -> Self {
        Self {
            pcm: Some(pcm),
            prepared: false,
        }
    }

    /// Mono or stereo sine tone, identical on every channel.
    pub fn sine(frequency: f32, sample_rate: u32, seconds: f32, channels: u16, amplitude: f32) -> Result<Self> {
        let frames = (sample_rate as f32 * seconds) as usize;
        let mut samples = Vec::with_capacity(frames * channels as usize);
        for n in 0..frames {
            let t = n as f32 / sample_rate as f32;
            let value = amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin();
            for _ in 0..channels {
                samples.push(value);
            }
        }
        Ok(Self::new(InterleavedPcm::new(samples, channels, sample_rate)?))
    }
}

#[async_trait]
impl PcmProvider for MemoryPcm {
    async fn prepare(&mut self) -> Result<AudioFormat> {
        match &self.pcm {
            Some(pcm) => {
                self.prepared = true;
                Ok(pcm.format())
            }
            None => bail!("PCM source has been disposed"),
        }
    }

    fn format(&self) -> Option<AudioFormat> {
        match (&self.pcm, self.prepared) {
            (Some(pcm), true) => Some(pcm.format()),
            _ => None,
        }
    }

    fn read_window(&self, end_frame: usize, window_frames: usize) -> Vec<f32> {
        match (&self.pcm, self.prepared) {
            (Some(pcm), true) => pcm.read_mono_window(end_frame, window_frames),
            _ => Vec::new(),
        }
    }

    fn dispose(&mut self) {
        self.pcm = None;
        self.prepared = false;
    }
}
