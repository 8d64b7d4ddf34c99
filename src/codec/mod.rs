//! Codec traits and stream probing
//!
//! The decode engine drives codecs through two narrow traits. A video
//! decoder turns packets into planar 4:2:0 image data and converts
//! granule positions to frame indices and playback times; an audio
//! decoder has a packet-in / pcm-out surface yielding planar `f32`
//! channel buffers. The seek algorithm leans on the granule conversions
//! and the keyframe flag; it never inspects packet payloads itself.

pub mod block;
pub mod pcm;

use crate::utils::error::Result;

/// Stream parameters of a video elementary stream
#[derive(Debug, Clone)]
pub struct VideoInfo {
    /// Frame width in pixels
    pub width: u32,

    /// Frame height in pixels
    pub height: u32,

    /// Frame rate numerator
    pub fps_num: u32,

    /// Frame rate denominator
    pub fps_den: u32,

    /// Bits used for the delta-frame count in granule positions
    pub granule_shift: u8,
}

impl VideoInfo {
    /// Frames per second as a float
    pub fn fps(&self) -> f64 {
        self.fps_num as f64 / self.fps_den as f64
    }
}

/// Stream parameters of an audio elementary stream
#[derive(Debug, Clone)]
pub struct AudioInfo {
    /// Channel count
    pub channels: u32,

    /// Samples per second
    pub sample_rate: u32,
}

/// One decoded planar 4:2:0 image
///
/// Chroma planes are subsampled by two in both dimensions; width and
/// height are required to be even.
#[derive(Debug, Clone)]
pub struct PlanarFrame {
    pub y: Vec<u8>,
    pub cb: Vec<u8>,
    pub cr: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl PlanarFrame {
    /// Allocate a black frame of the given dimensions
    pub fn black(width: u32, height: u32) -> Self {
        let luma = (width * height) as usize;
        let chroma = (width / 2 * height / 2) as usize;
        Self {
            y: vec![16; luma],
            cb: vec![128; chroma],
            cr: vec![128; chroma],
            width,
            height,
        }
    }
}

/// Video elementary stream decoder
pub trait VideoDecoder: Send {
    /// Stream parameters parsed from the header packet
    fn info(&self) -> &VideoInfo;

    /// Whether a data packet is decodable without reference to prior
    /// frames
    fn is_keyframe(&self, packet: &[u8]) -> bool;

    /// Decode one data packet, returning the granule position of the
    /// decoded frame
    fn decode_packet(&mut self, packet: &[u8]) -> Result<i64>;

    /// Borrow the most recently decoded frame
    fn frame(&self) -> &PlanarFrame;

    /// Frame index encoded by a granule position
    fn granule_frame(&self, granule: i64) -> u64;

    /// Playback time in seconds of a granule position
    fn granule_time(&self, granule: i64) -> f64;

    /// Frame index of the keyframe a granule position builds on
    fn granule_keyframe(&self, granule: i64) -> u64;

    /// Re-base the decoder's position after a container-level seek
    fn set_granule_position(&mut self, granule: i64);

    /// Drop reference state, as after a restart; the next decodable
    /// packet must be a keyframe
    fn reset(&mut self);
}

/// Audio elementary stream decoder
pub trait AudioDecoder: Send {
    /// Stream parameters parsed from the header packet
    fn info(&self) -> &AudioInfo;

    /// Submit one data packet for decoding
    fn packet_in(&mut self, packet: &[u8]) -> Result<()>;

    /// Drain decoded samples as planar per-channel buffers, if any are
    /// pending
    fn pcm_out(&mut self) -> Option<Vec<Vec<f32>>>;

    /// Playback time in seconds of a granule position
    fn granule_time(&self, granule: i64) -> f64;

    /// Drop pending samples, as after a seek or restart
    fn restart(&mut self);
}

/// A decoder probed from a stream's first header packet
pub enum StreamCodec {
    Video(Box<dyn VideoDecoder>),
    Audio(Box<dyn AudioDecoder>),
}

/// Identify the codec of a new stream from the first packet of its BOS
/// page and construct its decoder
///
/// Returns `None` when no known codec claims the header.
pub fn probe(header_packet: &[u8]) -> Option<Result<StreamCodec>> {
    if block::claims_header(header_packet) {
        return Some(
            block::BlockDecoder::from_header(header_packet)
                .map(|d| StreamCodec::Video(Box::new(d))),
        );
    }
    if pcm::claims_header(header_packet) {
        return Some(
            pcm::PcmDecoder::from_header(header_packet).map(|d| StreamCodec::Audio(Box::new(d))),
        );
    }
    None
}
