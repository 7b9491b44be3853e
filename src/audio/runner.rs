use anyhow::{anyhow, Result};
use crossbeam_channel::Sender;
use log::{debug, info};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Interval, MissedTickBehavior};

use super::fft::{engine_for, SpectralEngine};
use super::pcm::PcmProvider;
use super::playback::PlaybackClock;
use super::scheduler::{RecomputeJob, Scheduler, TickAction};
use super::SpectrumFrame;
use crate::config::VisualizerConfig;

/// Rendering side of the visualizer. Receives one snapshot per changed tick.
pub trait FrameSink {
    fn present(&mut self, frame: SpectrumFrame);
}

impl FrameSink for Sender<SpectrumFrame> {
    fn present(&mut self, frame: SpectrumFrame) {
        if self.send(frame).is_err() {
            debug!("frame receiver dropped");
        }
    }
}

impl FrameSink for Vec<SpectrumFrame> {
    fn present(&mut self, frame: SpectrumFrame) {
        self.push(frame);
    }
}

/// The single transform allowed in flight.
struct PendingTransform {
    job: RecomputeJob,
    handle: JoinHandle<Result<Vec<f32>>>,
}

fn tick_interval(period: Duration) -> Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

async fn wait_pending(pending: &mut Option<PendingTransform>) -> Result<Vec<f32>> {
    match pending {
        Some(p) => match (&mut p.handle).await {
            Ok(result) => result,
            Err(e) => Err(anyhow!("transform worker failed: {}", e)),
        },
        None => std::future::pending().await,
    }
}

/// Drive the visualizer until playback finishes or `config_rx`'s sender is dropped.
///
/// Ticks run on the calling task; each transform runs on the blocking pool
/// and its result is folded back in here, so all visualization state stays
/// on this task. The configuration is re-read at the start of every tick.
pub async fn run_visualizer<P, C, S>(
    pcm: &mut P,
    clock: &C,
    mut config_rx: watch::Receiver<VisualizerConfig>,
    sink: &mut S,
) -> Result<()>
where
    P: PcmProvider + ?Sized,
    C: PlaybackClock + ?Sized,
    S: FrameSink + ?Sized,
{
    let format = pcm.prepare().await?;
    info!(
        "Visualizer ready: {}Hz, {} channel(s), {:.1}s",
        format.sample_rate,
        format.channels,
        format.duration().as_secs_f32()
    );

    let mut config = config_rx.borrow_and_update().clone().validated();
    let mut engine: Arc<dyn SpectralEngine> = engine_for(config.engine);
    info!("Using {} spectral engine", engine.engine_type());
    let mut scheduler = Scheduler::new(config.clone());
    let mut ticker = tick_interval(config.tick_interval());
    let mut pending: Option<PendingTransform> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match config_rx.has_changed() {
                    Err(_) => {
                        info!("Visualizer controls closed, stopping");
                        break;
                    }
                    Ok(true) => {
                        let updated = config_rx.borrow_and_update().clone().validated();
                        if updated.tick_interval_ms != config.tick_interval_ms {
                            ticker = tick_interval(updated.tick_interval());
                        }
                        if updated.engine != config.engine {
                            engine = engine_for(updated.engine);
                            info!("Switched to {} spectral engine", engine.engine_type());
                        }
                        scheduler.set_config(updated.clone());
                        config = updated;
                    }
                    Ok(false) => {}
                }

                if clock.is_finished() {
                    info!("Playback finished, stopping visualizer");
                    break;
                }

                match scheduler.tick(Instant::now(), clock, &*pcm) {
                    TickAction::Transform(job) => {
                        let engine = Arc::clone(&engine);
                        let samples = job.samples.clone();
                        let handle = tokio::task::spawn_blocking(move || engine.magnitude_spectrum(&samples));
                        pending = Some(PendingTransform { job, handle });
                    }
                    TickAction::Updated(frame) => sink.present(frame),
                    TickAction::Skipped(reason) => debug!("tick skipped: {:?}", reason),
                    TickAction::Unchanged => {}
                }
            }
            result = wait_pending(&mut pending), if pending.is_some() => {
                if let Some(PendingTransform { job, .. }) = pending.take() {
                    if let Some(frame) = scheduler.finish_transform(job, result) {
                        sink.present(frame);
                    }
                }
            }
        }
    }

    // An in-flight transform keeps running on the blocking pool; its result is dropped
    pcm.dispose();
    Ok(())
}
