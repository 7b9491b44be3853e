use anyhow::Result;
use log::info;
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::{Duration, Instant};

/// Source of the current playback position.
pub trait PlaybackClock {
    fn position_millis(&self) -> u64;

    fn is_playing(&self) -> bool;

    /// True once the track has played to the end; the driver stops then.
    fn is_finished(&self) -> bool {
        false
    }
}

/// Elapsed playing time with pause accounting.
#[derive(Debug, Default, Clone, Copy)]
struct PlayTimer {
    resumed_at: Option<Instant>,
    accumulated: Duration,
}

impl PlayTimer {
    fn start(&mut self) {
        if self.resumed_at.is_none() {
            self.resumed_at = Some(Instant::now());
        }
    }

    fn pause(&mut self) {
        if let Some(resumed) = self.resumed_at.take() {
            self.accumulated += resumed.elapsed();
        }
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn elapsed(&self) -> Duration {
        self.accumulated + self.resumed_at.map_or(Duration::ZERO, |t| t.elapsed())
    }

    fn running(&self) -> bool {
        self.resumed_at.is_some()
    }
}

/// Audible playback through the default output device.
///
/// Position is wall-clock time since `play()`, excluding pauses.
pub struct AudioPlayback {
    #[allow(dead_code)]
    stream: OutputStream,
    stream_handle: OutputStreamHandle,
    sink: Option<Sink>,
    timer: PlayTimer,
    duration: Option<Duration>,
}

impl AudioPlayback {
    pub fn new() -> Result<Self> {
        let (stream, stream_handle) = OutputStream::try_default()?;

        Ok(Self {
            stream,
            stream_handle,
            sink: None,
            timer: PlayTimer::default(),
            duration: None,
        })
    }

    /// Queue `path` paused; `duration` bounds the reported position.
    pub fn load_file<P: AsRef<Path>>(&mut self, path: P, duration: Option<Duration>) -> Result<()> {
        let file = BufReader::new(File::open(&path)?);
        let source = Decoder::new(file)?;
        let sink = Sink::try_new(&self.stream_handle)?;
        sink.append(source);
        sink.pause();

        info!("Loaded audio file for playback: {:?}", path.as_ref());
        self.sink = Some(sink);
        self.timer.reset();
        self.duration = duration;

        Ok(())
    }

    pub fn play(&mut self) {
        if let Some(sink) = &self.sink {
            sink.play();
            self.timer.start();
            info!("Audio playback started");
        }
    }

    pub fn pause(&mut self) {
        if let Some(sink) = &self.sink {
            sink.pause();
            self.timer.pause();
            info!("Audio playback paused");
        }
    }

    pub fn stop(&mut self) {
        if let Some(sink) = &self.sink {
            sink.stop();
            self.timer.reset();
            info!("Audio playback stopped");
        }
    }

    pub fn set_volume(&self, volume: f32) {
        if let Some(sink) = &self.sink {
            sink.set_volume(volume.clamp(0.0, 1.0));
        }
    }
}

impl PlaybackClock for AudioPlayback {
    fn position_millis(&self) -> u64 {
        let elapsed = self.timer.elapsed();
        let elapsed = self.duration.map_or(elapsed, |d| elapsed.min(d));
        elapsed.as_millis() as u64
    }

    fn is_playing(&self) -> bool {
        self.sink.as_ref().map_or(false, |sink| !sink.is_paused()) && self.timer.running()
    }

    fn is_finished(&self) -> bool {
        self.sink.as_ref().map_or(true, |sink| sink.empty())
    }
}

/// Headless clock that "plays" in real time without an output device.
#[derive(Debug, Clone)]
pub struct WallClock {
    timer: PlayTimer,
    duration: Duration,
}

impl WallClock {
    /// Start playing immediately; finishes after `duration`.
    pub fn start(duration: Duration) -> Self {
        let mut timer = PlayTimer::default();
        timer.start();
        Self { timer, duration }
    }

    pub fn pause(&mut self) {
        self.timer.pause();
    }

    pub fn resume(&mut self) {
        self.timer.start();
    }
}

impl PlaybackClock for WallClock {
    fn position_millis(&self) -> u64 {
        self.timer.elapsed().min(self.duration).as_millis() as u64
    }

    fn is_playing(&self) -> bool {
        self.timer.running() && !self.is_finished()
    }

    fn is_finished(&self) -> bool {
        self.timer.elapsed() >= self.duration
    }
}
