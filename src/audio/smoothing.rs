//! Cross-frame smoothing, between-recompute decay and peak-hold tracking.

/// Blend a freshly computed spectrum with the previous one:
/// `smoothing * prev + (1 - smoothing) * new`. Returns `new` untouched when
/// there is no previous spectrum of the same length.
pub fn smooth_spectrum(previous: Option<&[f32]>, new: Vec<f32>, smoothing: f32) -> Vec<f32> {
    match previous {
        Some(prev) if prev.len() == new.len() => prev
            .iter()
            .zip(new.iter())
            .map(|(&p, &n)| smoothing * p + (1.0 - smoothing) * n)
            .collect(),
        _ => new,
    }
}

/// Decay-only update applied on ticks without a full recompute.
pub fn decay_in_place(values: &mut [f32], decay_factor: f32) {
    for value in values.iter_mut() {
        *value = (*value * decay_factor).clamp(0.0, 1.0);
    }
}

/// Per-band peak markers that snap up instantly and fall by a fixed step.
#[derive(Debug, Clone, PartialEq)]
pub struct PeakHold {
    peaks: Vec<f32>,
    step: f32,
}

impl PeakHold {
    pub fn new(step: f32) -> Self {
        Self {
            peaks: Vec::new(),
            step,
        }
    }

    pub fn set_step(&mut self, step: f32) {
        self.step = step;
    }

    /// Track one update of band values, resizing first if the band count changed.
    pub fn update(&mut self, bands: &[f32]) {
        self.peaks.resize(bands.len(), 0.0);
        for (peak, &value) in self.peaks.iter_mut().zip(bands.iter()) {
            if value > *peak {
                *peak = value;
            } else {
                *peak = (*peak - self.step).max(0.0);
            }
        }
    }

    pub fn values(&self) -> &[f32] {
        &self.peaks
    }

    pub fn clear(&mut self) {
        self.peaks.clear();
    }
}
