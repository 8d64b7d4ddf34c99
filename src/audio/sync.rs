//! Audio-driven playback clock
//!
//! When a clip has sound, frame selection should follow the audio
//! playhead rather than a wall-clock accumulator, or the two drift
//! apart. `AudioClock` implements the [`Clock`](crate::clip::Clock)
//! contract but takes its position from the samples actually delivered
//! to the output device; `update` is a no-op because wall time is not
//! the authority. Substitute it on a clip with
//! [`VideoClip::set_clock`](crate::clip::VideoClip::set_clock).

use crate::clip::Clock;
use crate::utils::AtomicF64;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Sample-position-driven clock
#[derive(Debug)]
pub struct AudioClock {
    sample_rate: u32,
    samples_played: AtomicU64,
    /// Time base added to the sample position, set by seeks
    base_time: AtomicF64,
    paused: AtomicBool,
    speed: AtomicF64,
}

impl AudioClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            samples_played: AtomicU64::new(0),
            base_time: AtomicF64::new(0.0),
            paused: AtomicBool::new(false),
            speed: AtomicF64::new(1.0),
        }
    }

    /// Account for frames delivered to the output device
    pub fn advance_samples(&self, count: u64) {
        self.samples_played.fetch_add(count, Ordering::AcqRel);
    }

    /// Samples per second this clock counts in
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Clock for AudioClock {
    fn time(&self) -> f64 {
        self.base_time.load()
            + self.samples_played.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }

    fn update(&self, _dt: f64) {
        // position comes from delivered samples, not wall time
    }

    fn seek(&self, time: f64) {
        self.samples_played.store(0, Ordering::Release);
        self.base_time.store(time);
    }

    fn play(&self) {
        self.paused.store(false, Ordering::Release);
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    fn speed(&self) -> f64 {
        self.speed.load()
    }

    fn set_speed(&self, speed: f64) {
        self.speed.store(speed.max(0.0));
    }
}
