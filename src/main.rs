use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use crossbeam_channel::Receiver;
use log::{info, warn};
use std::path::PathBuf;
use std::thread;

use arrvee_spectrum::audio::{
    run_visualizer, AudioPlayback, FilePcm, FrameKind, PcmProvider, PlaybackClock, SpectrumFrame, WallClock,
};
use arrvee_spectrum::config::DEFAULT_LOG_BANDS;
use arrvee_spectrum::{AnalysisMode, BandingMode, EngineKind, VisualizerConfig};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BandArg {
    Off,
    Log,
    Iso,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EngineArg {
    Radix2,
    Rustfft,
}

#[derive(Parser)]
#[command(name = "arrvee-spectrum")]
#[command(about = "Playback-synchronized spectrum visualizer")]
struct Args {
    /// Audio file to visualize (WAV, MP3, M4A, OGG, FLAC)
    #[arg()]
    audio_file: PathBuf,

    /// JSON settings file; command line flags override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the effective settings to this file and continue
    #[arg(long)]
    save_config: Option<PathBuf>,

    /// Analysis window in samples (256, 512 or 1024)
    #[arg(long)]
    window_size: Option<usize>,

    /// Control tick period in milliseconds
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Minimum time between full transforms in milliseconds
    #[arg(long)]
    compute_ms: Option<u64>,

    /// Band layout for the transform output
    #[arg(long, value_enum)]
    bands: Option<BandArg>,

    /// Number of bands for the logarithmic layout
    #[arg(long)]
    band_count: Option<usize>,

    /// Use time-domain wave energy instead of the transform
    #[arg(long)]
    wave_energy: bool,

    /// Transform backend
    #[arg(long, value_enum)]
    engine: Option<EngineArg>,

    /// Disable decay between transforms
    #[arg(long)]
    no_decay: bool,

    /// Weight of the previous bands in the EMA (0.1 - 0.9)
    #[arg(long)]
    alpha: Option<f32>,

    /// Delay after playback start before the first transform
    #[arg(long)]
    safe_start_ms: Option<u64>,

    /// Run against a wall clock instead of the audio device
    #[arg(long)]
    headless: bool,

    /// Playback volume (0.0 - 1.0)
    #[arg(long, default_value = "0.5")]
    volume: f32,
}

impl Args {
    fn build_config(&self) -> Result<VisualizerConfig> {
        let mut config = match &self.config {
            Some(path) => VisualizerConfig::load(path)?,
            None => VisualizerConfig::default(),
        };

        if let Some(size) = self.window_size {
            config.window_size = size;
        }
        if let Some(ms) = self.tick_ms {
            config.tick_interval_ms = ms;
        }
        if let Some(ms) = self.compute_ms {
            config.full_compute_interval_ms = ms;
        }
        if self.wave_energy {
            config.analysis = AnalysisMode::WaveEnergy;
        }
        if let Some(engine) = self.engine {
            config.engine = match engine {
                EngineArg::Radix2 => EngineKind::Radix2,
                EngineArg::Rustfft => EngineKind::RustFft,
            };
        }
        if self.no_decay {
            config.decay_enabled = false;
        }
        if let Some(alpha) = self.alpha {
            config.ema_alpha = alpha;
        }
        if let Some(ms) = self.safe_start_ms {
            config.safe_start_ms = ms;
        }

        let band_count = self.band_count.or(match config.banding {
            BandingMode::Log { bands } => Some(bands),
            _ => None,
        });
        config.banding = match (self.bands, config.banding) {
            (Some(BandArg::Off), _) => BandingMode::Off,
            (Some(BandArg::Iso), _) => BandingMode::Iso,
            (Some(BandArg::Log), _) | (None, BandingMode::Log { .. }) => BandingMode::Log {
                bands: band_count.unwrap_or(DEFAULT_LOG_BANDS),
            },
            (None, other) => other,
        };

        Ok(config.validated())
    }
}

/// Text rendering of frames, redrawn at a throttled rate.
struct TextOverlay {
    frame_count: u32,
    redraw_every: u32,
    rows: usize,
}

impl TextOverlay {
    fn new(tick_interval_ms: u64) -> Self {
        // Roughly ten redraws per second
        let redraw_every = (100 / tick_interval_ms.max(1)).max(1) as u32;
        Self {
            frame_count: 0,
            redraw_every,
            rows: 32,
        }
    }

    fn run(mut self, frames: Receiver<SpectrumFrame>) {
        for frame in frames.iter() {
            self.frame_count += 1;
            if self.frame_count % self.redraw_every == 0 {
                self.render(&frame);
            }
        }
    }

    fn render(&self, frame: &SpectrumFrame) {
        let title = match frame.kind {
            FrameKind::Bands => "BANDS",
            FrameKind::Spectrum => "SPECTRUM",
            FrameKind::Energy => "WAVE ENERGY",
        };

        print!("\x1B[2J\x1B[1;1H");
        println!("╔════════════════════════════════════════════════╗");
        println!("║ {:<12} {:>8.2}s   peak {:>5.3}              ║", title, frame.position_ms as f32 / 1000.0, frame.peak);
        println!("╠════════════════════════════════════════════════╣");

        let values = collapse(&frame.values, self.rows);
        let holds = frame.peak_holds.as_deref().map(|h| collapse(h, self.rows));
        for (i, value) in values.iter().enumerate() {
            let width = (value * 40.0) as usize;
            let mut bar = "█".repeat(width);
            if let Some(hold) = holds.as_ref().and_then(|h| h.get(i)) {
                let marker = ((hold * 40.0) as usize).min(40);
                if marker > width {
                    bar.push_str(&" ".repeat(marker - width - 1));
                    bar.push('▏');
                }
            }
            println!("║ {:>2} {:<40} {:>4.2} ║", i, bar, value);
        }
        println!("╚════════════════════════════════════════════════╝");
    }
}

/// Reduce `values` to at most `rows` entries, keeping the maximum of each group.
fn collapse(values: &[f32], rows: usize) -> Vec<f32> {
    if values.len() <= rows {
        return values.to_vec();
    }
    let group = (values.len() + rows - 1) / rows;
    values
        .chunks(group)
        .map(|chunk| chunk.iter().cloned().fold(0.0, f32::max).clamp(0.0, 1.0))
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = args.build_config()?;
    info!("Starting Arrvee spectrum visualizer");
    info!("Audio file: {}", args.audio_file.display());
    info!(
        "Window {} | tick {}ms | full compute {}ms | {:?} | {:?} | {:?}",
        config.window_size,
        config.tick_interval_ms,
        config.full_compute_interval_ms,
        config.analysis,
        config.engine,
        config.banding
    );
    if let Some(path) = &args.save_config {
        config.save(path)?;
        info!("Saved settings to {}", path.display());
    }

    let mut pcm = FilePcm::new(&args.audio_file);
    let format = pcm
        .prepare()
        .await
        .with_context(|| format!("Failed to decode {}", args.audio_file.display()))?;
    let duration = format.duration();

    let clock: Box<dyn PlaybackClock> = if args.headless {
        info!("Headless mode, following a wall clock for {:.1}s", duration.as_secs_f32());
        Box::new(WallClock::start(duration))
    } else {
        let mut playback = AudioPlayback::new()?;
        playback.load_file(&args.audio_file, Some(duration))?;
        playback.set_volume(args.volume);
        playback.play();
        Box::new(playback)
    };

    let (frame_tx, frame_rx) = crossbeam_channel::unbounded::<SpectrumFrame>();
    let overlay = TextOverlay::new(config.tick_interval_ms);
    let renderer = thread::spawn(move || overlay.run(frame_rx));

    let (config_tx, config_rx) = tokio::sync::watch::channel(config);
    let mut sink = frame_tx;

    tokio::select! {
        result = run_visualizer(&mut pcm, &*clock, config_rx, &mut sink) => result?,
        _ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down"),
    }

    drop(config_tx);
    drop(sink);
    if renderer.join().is_err() {
        warn!("Render thread panicked");
    }
    info!("Visualizer stopped");
    Ok(())
}
