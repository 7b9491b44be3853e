use anyhow::{anyhow, bail, Result};
use rustfft::{num_complex::Complex, FftPlanner};
use std::f64::consts::PI;
use std::sync::{Arc, Mutex};

use crate::config::EngineKind;

/// Turns a real sample window into a normalized magnitude spectrum.
///
/// Implementations run on the transform worker, never on the control loop.
/// Output length is `n.next_power_of_two() / 2` for an input of length `n`,
/// each bin scaled by `2 / M` so a full-scale sinusoid lands near unity.
pub trait SpectralEngine: Send + Sync {
    fn magnitude_spectrum(&self, samples: &[f32]) -> Result<Vec<f32>>;

    /// Identification string for logging
    fn engine_type(&self) -> &'static str;
}

pub fn engine_for(kind: EngineKind) -> Arc<dyn SpectralEngine> {
    match kind {
        EngineKind::Radix2 => Arc::new(Radix2Engine),
        EngineKind::RustFft => Arc::new(RustFftEngine::new()),
    }
}

/// Hann coefficients `0.5 * (1 - cos(2πi / (n - 1)))`; a single-sample window is 1.0.
pub fn hann_window(size: usize) -> Vec<f32> {
    if size == 1 {
        return vec![1.0];
    }
    (0..size)
        .map(|i| {
            let phase = 2.0 * PI * i as f64 / (size - 1) as f64;
            (0.5 * (1.0 - phase.cos())) as f32
        })
        .collect()
}

/// Windowed, zero-padded complex buffer of length `samples.len().next_power_of_two()`.
fn windowed_buffer(samples: &[f32]) -> Result<Vec<Complex<f32>>> {
    if samples.is_empty() {
        bail!("cannot transform an empty sample window");
    }
    if let Some(i) = samples.iter().position(|s| !s.is_finite()) {
        bail!("non-finite sample at index {}", i);
    }

    let fft_size = samples.len().next_power_of_two();
    let window = hann_window(samples.len());

    let mut buffer: Vec<Complex<f32>> = samples
        .iter()
        .zip(window.iter())
        .map(|(&s, &w)| Complex::new(s * w, 0.0))
        .collect();
    buffer.resize(fft_size, Complex::new(0.0, 0.0));
    Ok(buffer)
}

fn magnitudes(buffer: &[Complex<f32>]) -> Vec<f32> {
    let half = buffer.len() / 2;
    if half == 0 {
        // A single sample has no bins below Nyquist
        return Vec::new();
    }
    let scale = 1.0 / half as f32;
    buffer[..half]
        .iter()
        .map(|c| (c.re * c.re + c.im * c.im).sqrt() * scale)
        .collect()
}

/// In-place iterative radix-2 Cooley-Tukey FFT. `buffer.len()` must be a power of two.
pub fn radix2_fft(buffer: &mut [Complex<f32>]) {
    let n = buffer.len();
    if n <= 1 {
        return;
    }
    debug_assert!(n.is_power_of_two());

    // Bit-reversal permutation
    let mut j = 0usize;
    for i in 1..n {
        let mut bit = n >> 1;
        while j & bit != 0 {
            j ^= bit;
            bit >>= 1;
        }
        j |= bit;
        if i < j {
            buffer.swap(i, j);
        }
    }

    let mut len = 2;
    while len <= n {
        let angle = -2.0 * PI / len as f64;
        let (step_re, step_im) = (angle.cos(), angle.sin());
        let half = len / 2;

        for start in (0..n).step_by(len) {
            // Twiddle advanced by complex multiplication, kept in f64 to bound drift
            let (mut w_re, mut w_im) = (1.0f64, 0.0f64);
            for k in 0..half {
                let w = Complex::new(w_re as f32, w_im as f32);
                let u = buffer[start + k];
                let v = buffer[start + k + half] * w;
                buffer[start + k] = u + v;
                buffer[start + k + half] = u - v;

                let next_re = w_re * step_re - w_im * step_im;
                w_im = w_re * step_im + w_im * step_re;
                w_re = next_re;
            }
        }
        len <<= 1;
    }
}

/// Built-in radix-2 transform.
#[derive(Debug, Default, Clone, Copy)]
pub struct Radix2Engine;

impl SpectralEngine for Radix2Engine {
    fn magnitude_spectrum(&self, samples: &[f32]) -> Result<Vec<f32>> {
        let mut buffer = windowed_buffer(samples)?;
        radix2_fft(&mut buffer);
        Ok(magnitudes(&buffer))
    }

    fn engine_type(&self) -> &'static str {
        "radix2"
    }
}

/// Same contract as [`Radix2Engine`], planned by `rustfft`.
pub struct RustFftEngine {
    planner: Mutex<FftPlanner<f32>>,
}

impl RustFftEngine {
    pub fn new() -> Self {
        Self {
            planner: Mutex::new(FftPlanner::new()),
        }
    }
}

impl Default for RustFftEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SpectralEngine for RustFftEngine {
    fn magnitude_spectrum(&self, samples: &[f32]) -> Result<Vec<f32>> {
        let mut buffer = windowed_buffer(samples)?;
        let fft = self
            .planner
            .lock()
            .map_err(|_| anyhow!("FFT planner lock poisoned"))?
            .plan_fft_forward(buffer.len());
        fft.process(&mut buffer);
        Ok(magnitudes(&buffer))
    }

    fn engine_type(&self) -> &'static str {
        "rustfft"
    }
}
