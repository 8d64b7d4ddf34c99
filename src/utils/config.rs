//! Configuration management for reelplay
//!
//! This module holds the engine's tuning knobs. The drop/skip thresholds
//! are empirical smoothness constants, not correctness constants, so they
//! live here as data rather than as hard-coded values in the decode path.

use crate::utils::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Engine-wide configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Worker thread pool
    pub workers: WorkerConfig,

    /// Per-clip playback tuning
    pub playback: PlaybackConfig,

    /// Seek algorithm tuning
    pub seek: SeekConfig,
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of decode worker threads
    pub thread_count: usize,

    /// How long an idle worker waits for a wake signal before rescanning,
    /// in milliseconds
    pub wake_timeout_ms: u64,
}

/// Playback tuning for clips
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Default number of precached frames per clip
    pub precached_frames: usize,

    /// A ready frame older than this many seconds behind the clock is
    /// dropped instead of displayed
    pub late_frame_threshold: f64,

    /// After a loop restart, frames with display times inside this window
    /// are withheld rather than dropped, so the first frames of the new
    /// iteration are not discarded as stale
    pub restart_guard: f64,

    /// When rebasing the clock at a loop boundary, queued frames whose
    /// display time exceeds this are leftovers from the previous
    /// iteration and get dropped
    pub end_frame_guard: f64,

    /// How many seconds of audio to demux ahead of the playback clock
    pub audio_read_ahead: f64,

    /// Bytes pulled from the source per read
    pub read_chunk_size: usize,
}

/// Seek algorithm configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeekConfig {
    /// Iteration budget for the byte-offset bisection; the search is
    /// capped rather than guaranteed to converge exactly
    pub bisection_limit: u32,

    /// When the bisection lands within this many frames before the
    /// target, it switches to a linear forward scan
    pub fine_seek_window: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: WorkerConfig::default(),
            playback: PlaybackConfig::default(),
            seek: SeekConfig::default(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            thread_count: 1,
            wake_timeout_ms: 10,
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            precached_frames: 8,
            late_frame_threshold: 0.1,
            restart_guard: 2.0,
            end_frame_guard: 0.5,
            audio_read_ahead: 1.0,
            read_chunk_size: 4096,
        }
    }
}

impl Default for SeekConfig {
    fn default() -> Self {
        Self {
            bisection_limit: 100,
            fine_seek_window: 10,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn load_from(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&data)
            .map_err(|e| Error::Config(format!("parsing {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let data = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("serializing config: {}", e)))?;
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.workers.thread_count == 0 {
            return Err(Error::Config("thread_count must be at least 1".into()));
        }
        if self.playback.precached_frames == 0 {
            return Err(Error::Config("precached_frames must be at least 1".into()));
        }
        if self.playback.read_chunk_size == 0 {
            return Err(Error::Config("read_chunk_size must be non-zero".into()));
        }
        if self.playback.late_frame_threshold < 0.0 {
            return Err(Error::Config(
                "late_frame_threshold must be non-negative".into(),
            ));
        }
        if self.seek.bisection_limit == 0 {
            return Err(Error::Config("bisection_limit must be at least 1".into()));
        }
        Ok(())
    }
}
