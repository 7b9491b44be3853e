use anyhow::{Context, Result};
use async_trait::async_trait;
use log::info;
use std::path::{Path, PathBuf};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::pcm::{AudioFormat, InterleavedPcm, PcmProvider};

/// Decode a whole file to interleaved `f32`. WAV goes through `hound`,
/// everything else through `symphonia`.
pub fn decode_file(path: &Path) -> Result<InterleavedPcm> {
    let is_wav = path
        .extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("wav"));

    let pcm = if is_wav {
        decode_wav(path)?
    } else {
        decode_with_symphonia(path)?
    };

    let format = pcm.format();
    info!(
        "Decoded {:?}: {}Hz, {} channel(s), {} frames, {:.1}s",
        path,
        format.sample_rate,
        format.channels,
        format.total_frames,
        format.duration().as_secs_f32()
    );
    Ok(pcm)
}

pub fn decode_wav(path: &Path) -> Result<InterleavedPcm> {
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("Failed to open WAV file: {}", path.display()))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .context("Failed to read WAV samples")?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<_, _>>()
                .context("Failed to read WAV samples")?
        }
    };

    InterleavedPcm::new(samples, spec.channels, spec.sample_rate)
}

pub fn decode_with_symphonia(path: &Path) -> Result<InterleavedPcm> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open audio file: {}", path.display()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .context("Failed to probe audio format")?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .context("No audio tracks found")?;
    let track_id = track.id;
    let mut channels = track.codec_params.channels.map_or(0, |c| c.count()) as u16;
    let sample_rate = track.codec_params.sample_rate.context("Unknown sample rate")?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("Failed to create audio decoder")?;

    let mut samples: Vec<f32> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(e.into()),
        };

        let spec = *decoded.spec();
        if channels == 0 {
            channels = spec.channels.count() as u16;
        }
        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buffer.samples());
    }

    InterleavedPcm::new(samples, channels, sample_rate)
}

/// Provider backed by an audio file, decoded in full on `prepare`.
pub struct FilePcm {
    path: PathBuf,
    pcm: Option<InterleavedPcm>,
}

impl FilePcm {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            pcm: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PcmProvider for FilePcm {
    async fn prepare(&mut self) -> Result<AudioFormat> {
        if let Some(pcm) = &self.pcm {
            return Ok(pcm.format());
        }

        let path = self.path.clone();
        let pcm = tokio::task::spawn_blocking(move || decode_file(&path))
            .await
            .context("Decoder task failed")??;
        let format = pcm.format();
        self.pcm = Some(pcm);
        Ok(format)
    }

    fn format(&self) -> Option<AudioFormat> {
        self.pcm.as_ref().map(InterleavedPcm::format)
    }

    fn read_window(&self, end_frame: usize, window_frames: usize) -> Vec<f32> {
        self.pcm
            .as_ref()
            .map_or_else(Vec::new, |pcm| pcm.read_mono_window(end_frame, window_frames))
    }

    fn dispose(&mut self) {
        self.pcm = None;
    }
}
