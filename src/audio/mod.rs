//! Audio sink boundary
//!
//! The engine does not own audio hardware. Decoded samples are pushed
//! through the [`AudioSink`] trait from the driver thread's audio
//! flush; a host that wants sound implements the sink (or uses
//! [`RingBufferSink`]) and owns the output device. A factory registered
//! on the engine attaches a sink to every clip that turns out to carry
//! an audio stream.

pub mod sync;

pub use sync::AudioClock;

use log::warn;
use ringbuf::traits::{Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::Arc;

/// Receiver of decoded audio, fed from the driver thread
pub trait AudioSink: Send {
    /// Accept `sample_count` decoded samples per channel, planar layout
    ///
    /// Called whenever enough audio has decoded to flush; gain has
    /// already been applied.
    fn insert_samples(&mut self, channels: &[Vec<f32>], sample_count: usize);

    /// The owning clip is going away; release playback resources
    fn stop(&mut self) {}
}

/// Creates a sink for each clip that has an audio stream
pub trait AudioSinkFactory: Send + Sync {
    fn create_sink(&self, channels: u32, sample_rate: u32) -> Box<dyn AudioSink>;
}

/// Sink adapter backed by a single-producer single-consumer ring
///
/// `insert_samples` interleaves into the ring on the driver thread; the
/// host's audio callback drains interleaved `f32` frames through the
/// paired [`SinkConsumer`], which also advances an [`AudioClock`] so the
/// clip's video timing can follow the audio playhead.
pub struct RingBufferSink {
    producer: HeapProd<f32>,
    channels: usize,
    scratch: Vec<f32>,
}

/// Host-side drain half of a [`RingBufferSink`]
pub struct SinkConsumer {
    consumer: HeapCons<f32>,
    channels: usize,
    clock: Arc<AudioClock>,
}

impl RingBufferSink {
    /// Create a sink buffering up to `capacity_frames` interleaved
    /// frames, returning the sink and its host-side consumer
    pub fn new(channels: u32, sample_rate: u32, capacity_frames: usize) -> (Self, SinkConsumer) {
        let channels = channels.max(1) as usize;
        let ring = HeapRb::<f32>::new(capacity_frames.max(1) * channels);
        let (producer, consumer) = ring.split();
        let clock = Arc::new(AudioClock::new(sample_rate));
        (
            Self {
                producer,
                channels,
                scratch: Vec::new(),
            },
            SinkConsumer {
                consumer,
                channels,
                clock,
            },
        )
    }
}

impl AudioSink for RingBufferSink {
    fn insert_samples(&mut self, channels: &[Vec<f32>], sample_count: usize) {
        let ch = self.channels.min(channels.len());
        if ch == 0 {
            return;
        }
        self.scratch.clear();
        self.scratch.reserve(sample_count * self.channels);
        for i in 0..sample_count {
            for c in 0..self.channels {
                // duplicate the last channel when the stream has fewer
                self.scratch.push(channels[c.min(ch - 1)][i]);
            }
        }
        let pushed = self.producer.push_slice(&self.scratch);
        if pushed < self.scratch.len() {
            warn!(
                "audio ring full, dropped {} samples",
                self.scratch.len() - pushed
            );
        }
    }
}

impl SinkConsumer {
    /// The audio-position clock driven by this consumer
    pub fn clock(&self) -> Arc<AudioClock> {
        Arc::clone(&self.clock)
    }

    /// Drain up to `out.len()` interleaved samples into `out`,
    /// advancing the audio clock by the frames delivered
    ///
    /// Returns the number of samples written; the host zero-fills the
    /// remainder on underrun.
    pub fn read(&mut self, out: &mut [f32]) -> usize {
        use ringbuf::traits::Consumer;
        let n = self.consumer.pop_slice(out);
        self.clock.advance_samples((n / self.channels) as u64);
        n
    }
}
