use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Window sizes the PCM source and transform accept.
pub const WINDOW_SIZES: [usize; 3] = [256, 512, 1024];

pub const DEFAULT_LOG_BANDS: usize = 32;

/// How the sample window is turned into display values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    /// Windowed FFT magnitude spectrum
    Transform,
    /// Transform-free mean absolute amplitude per chunk
    WaveEnergy,
}

/// FFT implementation used by the transform worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Radix2,
    RustFft,
}

/// Perceptual grouping applied to the magnitude spectrum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum BandingMode {
    Off,
    Log { bands: usize },
    Iso,
}

impl Default for BandingMode {
    fn default() -> Self {
        BandingMode::Log { bands: DEFAULT_LOG_BANDS }
    }
}

/// Runtime options for the visualizer.
///
/// Every field has a serde default so partial JSON files load cleanly.
/// Values are not trusted until they pass through [`VisualizerConfig::validated`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualizerConfig {
    pub enabled: bool,
    pub window_size: usize,
    pub tick_interval_ms: u64,
    pub full_compute_interval_ms: u64,
    pub analysis: AnalysisMode,
    pub engine: EngineKind,
    pub decay_enabled: bool,
    pub decay_factor: f32,
    pub banding: BandingMode,
    pub ema_alpha: f32,
    /// Cross-frame smoothing for the unbanded spectrum
    pub spectrum_smoothing: f32,
    /// Per-update peak-hold fall
    pub peak_step: f32,
    pub safe_start_ms: u64,
}

impl Default for VisualizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_size: 512,
            tick_interval_ms: 60,
            full_compute_interval_ms: 250,
            analysis: AnalysisMode::Transform,
            engine: EngineKind::Radix2,
            decay_enabled: true,
            decay_factor: 0.97,
            banding: BandingMode::default(),
            ema_alpha: 0.6,
            spectrum_smoothing: 0.6,
            peak_step: 0.01,
            safe_start_ms: 1200,
        }
    }
}

impl VisualizerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&json)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;
        Ok(())
    }

    /// Clamp every option into its supported range, warning about each change.
    pub fn validated(mut self) -> Self {
        let window_size = nearest_window_size(self.window_size);
        if window_size != self.window_size {
            warn!("window_size {} unsupported, using {}", self.window_size, window_size);
            self.window_size = window_size;
        }

        self.tick_interval_ms = clamp_logged("tick_interval_ms", self.tick_interval_ms, 20, 150);
        self.full_compute_interval_ms =
            clamp_logged("full_compute_interval_ms", self.full_compute_interval_ms, 150, 1000);
        self.decay_factor = clamp_logged("decay_factor", self.decay_factor, 0.90, 0.995);
        self.ema_alpha = clamp_logged("ema_alpha", self.ema_alpha, 0.1, 0.9);
        self.spectrum_smoothing = clamp_logged("spectrum_smoothing", self.spectrum_smoothing, 0.0, 0.95);
        self.peak_step = clamp_logged("peak_step", self.peak_step, 0.001, 0.5);

        if let BandingMode::Log { bands } = self.banding {
            self.banding = BandingMode::Log {
                bands: clamp_logged("bands", bands, 1, 256),
            };
        }

        self
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn full_compute_interval(&self) -> Duration {
        Duration::from_millis(self.full_compute_interval_ms)
    }

    pub fn safe_start(&self) -> Duration {
        Duration::from_millis(self.safe_start_ms)
    }
}

fn nearest_window_size(requested: usize) -> usize {
    WINDOW_SIZES
        .iter()
        .copied()
        .min_by_key(|&size| size.abs_diff(requested))
        .unwrap_or(512)
}

fn clamp_logged<T>(name: &str, value: T, min: T, max: T) -> T
where
    T: PartialOrd + Copy + std::fmt::Display,
{
    let clamped = if value < min {
        min
    } else if value > max {
        max
    } else {
        value
    };
    if clamped != value {
        warn!("{} {} out of range [{}, {}], using {}", name, value, min, max, clamped);
    }
    clamped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_survive_validation() {
        let config = VisualizerConfig::default();
        assert_eq!(config.clone().validated(), config);
    }

    #[test]
    fn test_validation_clamps_ranges() {
        let config = VisualizerConfig {
            window_size: 700,
            tick_interval_ms: 5,
            full_compute_interval_ms: 5000,
            decay_factor: 0.5,
            ema_alpha: 0.99,
            banding: BandingMode::Log { bands: 0 },
            ..Default::default()
        }
        .validated();

        assert_eq!(config.window_size, 512);
        assert_eq!(config.tick_interval_ms, 20);
        assert_eq!(config.full_compute_interval_ms, 1000);
        assert_eq!(config.decay_factor, 0.90);
        assert_eq!(config.ema_alpha, 0.9);
        assert_eq!(config.banding, BandingMode::Log { bands: 1 });
    }

    #[test]
    fn test_window_size_snaps_to_nearest() {
        assert_eq!(nearest_window_size(1), 256);
        assert_eq!(nearest_window_size(900), 1024);
        assert_eq!(nearest_window_size(4096), 1024);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: VisualizerConfig =
            serde_json::from_str(r#"{ "window_size": 1024, "banding": { "mode": "iso" } }"#).unwrap();
        assert_eq!(config.window_size, 1024);
        assert_eq!(config.banding, BandingMode::Iso);
        assert_eq!(config.safe_start_ms, 1200);
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("arrvee-config-{}.json", std::process::id()));
        let config = VisualizerConfig {
            analysis: AnalysisMode::WaveEnergy,
            banding: BandingMode::Off,
            ..Default::default()
        };
        config.save(&path).unwrap();
        let loaded = VisualizerConfig::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, config);
    }
}
