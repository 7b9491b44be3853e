/// Number of chunks the fallback splits a window into.
pub const ENERGY_BANDS: usize = 256;

/// Transform-free energy view of a sample window.
///
/// The window is split into `bands` contiguous chunks (the last one absorbs
/// the remainder); each chunk's mean absolute amplitude is log-compressed with
/// `ln(1 + 20a) / ln(21)` so full scale lands at 1.0. Windows shorter than
/// `bands` yield one value per sample.
pub fn wave_energy(samples: &[f32], bands: usize) -> Vec<f32> {
    if samples.is_empty() || bands == 0 {
        return Vec::new();
    }

    let bands = bands.min(samples.len());
    let chunk = samples.len() / bands;
    let norm = 21.0f32.ln();

    (0..bands)
        .map(|b| {
            let start = b * chunk;
            let end = if b + 1 == bands { samples.len() } else { start + chunk };
            let slice = &samples[start..end];
            let avg = slice.iter().map(|s| s.abs()).sum::<f32>() / slice.len() as f32;
            ((1.0 + avg * 20.0).ln() / norm).clamp(0.0, 1.0)
        })
        .collect()
}
