//! Perceptual band mapping: log-spaced or ISO 1/3-octave bands over a
//! magnitude spectrum, dB-compressed and EMA-smoothed against the previous
//! frame's bands.

use crate::config::{BandingMode, VisualizerConfig};

pub const MIN_FREQUENCY: f32 = 20.0;
pub const MAX_FREQUENCY: f32 = 20000.0;

/// Standard 1/3-octave centre frequencies in Hz.
pub const ISO_CENTERS: [f32; 31] = [
    20.0, 25.0, 31.5, 40.0, 50.0, 63.0, 80.0, 100.0, 125.0, 160.0, 200.0, 250.0, 315.0, 400.0, 500.0,
    630.0, 800.0, 1000.0, 1250.0, 1600.0, 2000.0, 2500.0, 3150.0, 4000.0, 5000.0, 6300.0, 8000.0,
    10000.0, 12500.0, 16000.0, 20000.0,
];

const POWER_EPSILON: f32 = 1e-12;
const DB_FLOOR: f32 = -60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandLayout {
    Log { bands: usize },
    Iso,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandMapper {
    layout: BandLayout,
    alpha: f32,
}

impl BandMapper {
    pub fn new(layout: BandLayout, alpha: f32) -> Self {
        Self { layout, alpha }
    }

    /// Mapper for the configured banding, `None` when banding is off.
    pub fn from_config(config: &VisualizerConfig) -> Option<Self> {
        let layout = match config.banding {
            BandingMode::Off => return None,
            BandingMode::Log { bands } => BandLayout::Log { bands },
            BandingMode::Iso => BandLayout::Iso,
        };
        Some(Self::new(layout, config.ema_alpha))
    }

    pub fn layout(&self) -> BandLayout {
        self.layout
    }

    /// `(low, high)` edge frequencies of every band at this sample rate.
    pub fn band_edges(&self, sample_rate: u32) -> Vec<(f32, f32)> {
        let nyquist = sample_rate as f32 / 2.0;
        match self.layout {
            BandLayout::Log { bands } => log_band_edges(bands, nyquist),
            BandLayout::Iso => iso_band_edges(nyquist),
        }
    }

    /// Mean power per band, `None` where the band covers no bins.
    pub fn band_powers(&self, spectrum: &[f32], sample_rate: u32) -> Vec<Option<f32>> {
        let nyquist = sample_rate as f32 / 2.0;
        self.band_edges(sample_rate)
            .into_iter()
            .map(|(low, high)| average_power(spectrum, low, high, nyquist))
            .collect()
    }

    /// Normalized [0, 1] band values, blended with `previous` when its length matches.
    pub fn map(&self, spectrum: &[f32], sample_rate: u32, previous: Option<&[f32]>) -> Vec<f32> {
        compress_and_smooth(&self.band_powers(spectrum, sample_rate), previous, self.alpha)
    }
}

fn log_band_edges(bands: usize, nyquist: f32) -> Vec<(f32, f32)> {
    let max_frequency = MAX_FREQUENCY.min(nyquist);
    if max_frequency <= MIN_FREQUENCY {
        // Nothing audible below Nyquist; every band is empty
        return vec![(0.0, 0.0); bands];
    }

    let log_min = MIN_FREQUENCY.ln();
    let log_max = max_frequency.ln();
    (0..bands)
        .map(|b| {
            let f0 = (log_min + (log_max - log_min) * b as f32 / bands as f32).exp();
            let f1 = (log_min + (log_max - log_min) * (b + 1) as f32 / bands as f32).exp();
            (f0, f1)
        })
        .collect()
}

fn iso_band_edges(nyquist: f32) -> Vec<(f32, f32)> {
    let centers: Vec<f32> = ISO_CENTERS.iter().copied().filter(|&c| c < nyquist).collect();
    let third_octave_half = 2f32.powf(1.0 / 6.0);
    let last = centers.len().saturating_sub(1);

    (0..centers.len())
        .map(|i| {
            let low = if i == 0 {
                (centers[0] / third_octave_half).max(MIN_FREQUENCY)
            } else {
                (centers[i - 1] * centers[i]).sqrt()
            };
            let high = if i == last {
                (centers[last] * third_octave_half).min(MAX_FREQUENCY)
            } else {
                (centers[i] * centers[i + 1]).sqrt()
            };
            (low, high)
        })
        .collect()
}

/// Mean of `magnitude^2` over the inclusive bin range covering `[low, high]`.
///
/// The low edge maps with floor and the high edge with ceil.
fn average_power(spectrum: &[f32], low: f32, high: f32, nyquist: f32) -> Option<f32> {
    if spectrum.is_empty() || high <= 0.0 || nyquist <= 0.0 {
        return None;
    }
    let last_bin = (spectrum.len() - 1) as f32;
    let bin0 = ((low / nyquist) * last_bin).floor().max(0.0) as usize;
    let bin1 = (((high / nyquist) * last_bin).ceil().max(0.0) as usize).min(spectrum.len() - 1);
    if bin0 > bin1 {
        return None;
    }

    let sum: f32 = spectrum[bin0..=bin1].iter().map(|&m| m * m).sum();
    Some(sum / (bin1 - bin0 + 1) as f32)
}

/// dB-compress each band power to [0, 1] (-60 dBFS..0 dBFS) and apply the EMA.
///
/// Empty bands read 0 for this frame with no blending against stale values.
pub fn compress_and_smooth(powers: &[Option<f32>], previous: Option<&[f32]>, alpha: f32) -> Vec<f32> {
    let previous = previous.filter(|p| p.len() == powers.len());
    powers
        .iter()
        .enumerate()
        .map(|(i, power)| match power {
            None => 0.0,
            Some(power) => {
                let db = 10.0 * (power + POWER_EPSILON).log10();
                let norm = ((db - DB_FLOOR) / -DB_FLOOR).clamp(0.0, 1.0);
                match previous {
                    Some(prev) => (prev[i] * alpha + norm * (1.0 - alpha)).clamp(0.0, 1.0),
                    None => norm,
                }
            }
        })
        .collect()
}
