//! Shared fixtures for the reelplay integration tests
//!
//! Streams are authored in memory with the container writer and the
//! built-in codecs, so the tests are hermetic: no media files, no
//! hardware.

use reelplay::codec::{block, pcm, AudioInfo, PlanarFrame, VideoInfo};
use reelplay::container::StreamMuxer;
use reelplay::{AudioSink, AudioSinkFactory};
use std::sync::{Arc, Mutex};

/// Serial numbers used by all synthesized streams
pub const VIDEO_SERIAL: u32 = 0x100;
pub const AUDIO_SERIAL: u32 = 0x200;

/// Install a test logger once
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Parameters of a synthesized clip
#[derive(Debug, Clone)]
pub struct SynthSpec {
    pub frames: u32,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub keyframe_interval: u32,
    pub with_audio: bool,
}

impl Default for SynthSpec {
    fn default() -> Self {
        Self {
            frames: 300,
            fps: 30,
            width: 32,
            height: 24,
            keyframe_interval: 8,
            with_audio: false,
        }
    }
}

/// A deterministic test frame: a diagonal gradient shifted per frame
pub fn synth_frame(info: &VideoInfo, index: u32) -> PlanarFrame {
    let mut frame = PlanarFrame::black(info.width, info.height);
    for row in 0..info.height {
        for col in 0..info.width {
            frame.y[(row * info.width + col) as usize] =
                (row + col + index) as u8;
        }
    }
    frame
}

/// Author a complete playable stream in memory
pub fn synth_stream(spec: &SynthSpec) -> Vec<u8> {
    let info = VideoInfo {
        width: spec.width,
        height: spec.height,
        fps_num: spec.fps,
        fps_den: 1,
        granule_shift: 6,
    };
    let mut muxer = StreamMuxer::new();
    muxer
        .add_stream(VIDEO_SERIAL, block::encode_header(&info))
        .expect("video stream");

    let audio_info = AudioInfo {
        channels: 2,
        sample_rate: 8000,
    };
    if spec.with_audio {
        muxer
            .add_stream(AUDIO_SERIAL, pcm::encode_header(&audio_info))
            .expect("audio stream");
    }

    let mut encoder =
        block::BlockEncoder::new(info.clone(), spec.keyframe_interval).expect("encoder");
    let samples_per_frame = (audio_info.sample_rate / spec.fps) as usize;
    let mut audio_granule = 0i64;

    for i in 0..spec.frames {
        let (packet, granule) = encoder.encode_frame(&synth_frame(&info, i)).expect("encode");
        muxer.add_packet(VIDEO_SERIAL, packet, granule).expect("mux video");
        if spec.with_audio {
            let samples: Vec<i16> = (0..samples_per_frame * 2)
                .map(|k| ((k + i as usize) as i16).wrapping_mul(129))
                .collect();
            audio_granule += samples_per_frame as i64;
            muxer
                .add_packet(AUDIO_SERIAL, pcm::encode_packet(&samples), audio_granule)
                .expect("mux audio");
        }
    }
    muxer.finish()
}

/// An audio sink that counts what reaches it, for assertions
pub struct CountingSink {
    samples: Arc<Mutex<u64>>,
}

impl AudioSink for CountingSink {
    fn insert_samples(&mut self, _channels: &[Vec<f32>], sample_count: usize) {
        *self.samples.lock().unwrap() += sample_count as u64;
    }
}

/// Factory producing [`CountingSink`]s sharing one counter
pub struct CountingSinkFactory {
    samples: Arc<Mutex<u64>>,
}

impl CountingSinkFactory {
    pub fn new() -> (Self, Arc<Mutex<u64>>) {
        let samples = Arc::new(Mutex::new(0));
        (
            Self {
                samples: samples.clone(),
            },
            samples,
        )
    }
}

impl AudioSinkFactory for CountingSinkFactory {
    fn create_sink(&self, _channels: u32, _sample_rate: u32) -> Box<dyn AudioSink> {
        Box::new(CountingSink {
            samples: self.samples.clone(),
        })
    }
}
