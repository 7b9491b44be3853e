//! Playback-synchronized spectrum visualization core.
//!
//! Windowed PCM reads at the playback position feed a spectral transform,
//! perceptual band mapping, smoothing and peak-hold tracking, driven by a
//! two-speed tick scheduler.

pub mod audio;
pub mod config;

pub use config::{AnalysisMode, BandingMode, EngineKind, VisualizerConfig};
