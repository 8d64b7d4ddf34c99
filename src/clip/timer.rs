//! Playback clocks
//!
//! A clip reads its playback position from a [`Clock`]. The default
//! implementation is [`Timer`], a pausable, speed-scalable time
//! accumulator advanced by the driver's `tick`. A clip may substitute
//! any other `Clock` — typically an audio-position-driven one — and
//! falls back to its own `Timer` when the substitute is removed.

use parking_lot::Mutex;

/// Playback clock contract
///
/// All methods take `&self`; implementations are shared across the
/// driver, consumer, and worker threads.
pub trait Clock: Send + Sync {
    /// Current playback time in seconds
    fn time(&self) -> f64;

    /// Advance by `dt` seconds of wall time while running
    fn update(&self, dt: f64);

    /// Jump to an absolute time immediately
    fn seek(&self, time: f64);

    /// Resume advancing
    fn play(&self);

    /// Stop advancing; `time` holds its value
    fn pause(&self);

    fn is_paused(&self) -> bool;

    /// Playback speed multiplier
    fn speed(&self) -> f64;

    fn set_speed(&self, speed: f64);
}

#[derive(Debug)]
struct TimerState {
    time: f64,
    speed: f64,
    paused: bool,
}

/// Default wall-clock accumulator
#[derive(Debug)]
pub struct Timer {
    state: Mutex<TimerState>,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TimerState {
                time: 0.0,
                speed: 1.0,
                paused: false,
            }),
        }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for Timer {
    fn time(&self) -> f64 {
        self.state.lock().time
    }

    fn update(&self, dt: f64) {
        let mut state = self.state.lock();
        if !state.paused {
            state.time += dt * state.speed;
        }
    }

    fn seek(&self, time: f64) {
        self.state.lock().time = time;
    }

    fn play(&self) {
        self.state.lock().paused = false;
    }

    fn pause(&self) {
        self.state.lock().paused = true;
    }

    fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    fn speed(&self) -> f64 {
        self.state.lock().speed
    }

    fn set_speed(&self, speed: f64) {
        self.state.lock().speed = speed.max(0.0);
    }
}
