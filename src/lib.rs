//! reelplay — a multi-threaded streaming video/audio decode engine
//!
//! The engine pulls compressed container data from an abstract byte
//! source, demultiplexes it into video and audio elementary streams,
//! decodes video frames and audio samples on a pool of worker threads,
//! and exposes a small synchronous surface to a host that owns the
//! render loop and audio output:
//!
//! ```no_run
//! use reelplay::{OpenOptions, VideoEngine};
//! use reelplay::source::FileSource;
//!
//! # fn main() -> reelplay::Result<()> {
//! let engine = VideoEngine::new()?;
//! let clip = engine.create_clip(
//!     Box::new(FileSource::open("intro.rpl")?),
//!     OpenOptions::default(),
//! )?;
//!
//! // once per host frame, on the update thread:
//! engine.tick(1.0 / 60.0);
//! if let Some(frame) = clip.get_next_frame() {
//!     // upload frame.data() to a texture...
//!     drop(frame);
//!     clip.pop_frame();
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Decoding never happens on the calling thread: `tick`,
//! `get_next_frame`, and `pop_frame` only take short-lived locks, while
//! the worker pool races to keep each clip's frame queue filled.

pub mod audio;
pub mod clip;
pub mod codec;
pub mod container;
pub mod convert;
pub mod engine;
pub mod source;
pub mod utils;

pub use audio::{AudioClock, AudioSink, AudioSinkFactory, RingBufferSink, SinkConsumer};
pub use clip::{Clock, FrontFrame, OpenOptions, Timer, VideoClip, VideoFrame};
pub use convert::{OutputMode, StrideMode};
pub use engine::VideoEngine;
pub use source::{DataSource, FileSource, MemorySource};
pub use utils::config::EngineConfig;
pub use utils::error::{Error, Result};
