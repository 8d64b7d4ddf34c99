//! Clip playback: frames, the frame queue, clocks, and the clip state
//! machine

pub mod frame;
pub mod queue;
pub mod timer;
mod video_clip;

pub use frame::VideoFrame;
pub use queue::{DecodeLease, FrameMeta, FrameQueue, FrontFrame};
pub use timer::{Clock, Timer};
pub use video_clip::{OpenOptions, VideoClip};
