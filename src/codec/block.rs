//! Planar intra/delta video codec
//!
//! Frames are 4:2:0 planar images. Keyframes carry absolute samples and
//! their own frame number; delta frames carry per-sample wrapping
//! differences against the previous frame, so a delta decoded without
//! its reference chain produces garbage — which is what makes keyframe
//! alignment after a seek semantically observable.
//!
//! Granule positions follow the split scheme
//! `(keyframe_index << granule_shift) + deltas_since_keyframe`, letting
//! the seek bisection recover the preceding keyframe index from any
//! page's granule without decoding.

use super::{PlanarFrame, VideoDecoder, VideoInfo};
use crate::utils::error::{Error, Result};

const HEADER_MAGIC: &[u8; 4] = b"BVID";
const HEADER_LEN: usize = 22;

const FLAG_KEYFRAME: u8 = 0x01;

/// Whether a header packet belongs to this codec
pub fn claims_header(packet: &[u8]) -> bool {
    packet.len() >= 4 && &packet[..4] == HEADER_MAGIC
}

/// Serialize the codec ident header packet
pub fn encode_header(info: &VideoInfo) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN);
    out.extend_from_slice(HEADER_MAGIC);
    out.push(0); // version
    out.extend_from_slice(&info.width.to_le_bytes());
    out.extend_from_slice(&info.height.to_le_bytes());
    out.extend_from_slice(&info.fps_num.to_le_bytes());
    out.extend_from_slice(&info.fps_den.to_le_bytes());
    out.push(info.granule_shift);
    out
}

fn plane_sizes(info: &VideoInfo) -> (usize, usize) {
    let luma = (info.width * info.height) as usize;
    let chroma = (info.width / 2 * info.height / 2) as usize;
    (luma, chroma)
}

/// Decoder state for the block codec
pub struct BlockDecoder {
    info: VideoInfo,
    frame: PlanarFrame,
    /// A keyframe has been decoded since the last reset
    have_reference: bool,
    last_keyframe: u64,
    deltas: u64,
}

impl BlockDecoder {
    /// Parse the ident header packet and construct a decoder
    pub fn from_header(packet: &[u8]) -> Result<Self> {
        if packet.len() < HEADER_LEN || !claims_header(packet) {
            return Err(Error::malformed("video header packet too short"));
        }
        if packet[4] != 0 {
            return Err(Error::UnsupportedCodec(format!(
                "block codec version {}",
                packet[4]
            )));
        }
        let width = u32::from_le_bytes(packet[5..9].try_into().unwrap());
        let height = u32::from_le_bytes(packet[9..13].try_into().unwrap());
        let fps_num = u32::from_le_bytes(packet[13..17].try_into().unwrap());
        let fps_den = u32::from_le_bytes(packet[17..21].try_into().unwrap());
        let granule_shift = packet[21];

        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(Error::malformed(format!(
                "bad video dimensions {}x{}",
                width, height
            )));
        }
        if fps_num == 0 || fps_den == 0 {
            return Err(Error::malformed("zero frame rate"));
        }
        if granule_shift == 0 || granule_shift > 31 {
            return Err(Error::malformed(format!(
                "bad granule shift {}",
                granule_shift
            )));
        }

        let info = VideoInfo {
            width,
            height,
            fps_num,
            fps_den,
            granule_shift,
        };
        Ok(Self {
            frame: PlanarFrame::black(width, height),
            info,
            have_reference: false,
            last_keyframe: 0,
            deltas: 0,
        })
    }

    fn delta_mask(&self) -> u64 {
        (1u64 << self.info.granule_shift) - 1
    }
}

impl VideoDecoder for BlockDecoder {
    fn info(&self) -> &VideoInfo {
        &self.info
    }

    fn is_keyframe(&self, packet: &[u8]) -> bool {
        packet.first().is_some_and(|f| f & FLAG_KEYFRAME != 0)
    }

    fn decode_packet(&mut self, packet: &[u8]) -> Result<i64> {
        let (luma, chroma) = plane_sizes(&self.info);
        let planes_len = luma + 2 * chroma;

        if self.is_keyframe(packet) {
            if packet.len() != 5 + planes_len {
                return Err(Error::Codec(format!(
                    "keyframe packet length {} != {}",
                    packet.len(),
                    5 + planes_len
                )));
            }
            let frame_number = u32::from_le_bytes(packet[1..5].try_into().unwrap()) as u64;
            let body = &packet[5..];
            self.frame.y.copy_from_slice(&body[..luma]);
            self.frame.cb.copy_from_slice(&body[luma..luma + chroma]);
            self.frame.cr.copy_from_slice(&body[luma + chroma..]);
            self.have_reference = true;
            self.last_keyframe = frame_number;
            self.deltas = 0;
        } else {
            if !self.have_reference {
                return Err(Error::Codec("delta frame without reference".into()));
            }
            if packet.len() != 1 + planes_len {
                return Err(Error::Codec(format!(
                    "delta packet length {} != {}",
                    packet.len(),
                    1 + planes_len
                )));
            }
            if self.deltas + 1 > self.delta_mask() {
                return Err(Error::Codec("keyframe interval exceeds granule shift".into()));
            }
            let body = &packet[1..];
            for (dst, src) in self.frame.y.iter_mut().zip(&body[..luma]) {
                *dst = dst.wrapping_add(*src);
            }
            for (dst, src) in self.frame.cb.iter_mut().zip(&body[luma..luma + chroma]) {
                *dst = dst.wrapping_add(*src);
            }
            for (dst, src) in self.frame.cr.iter_mut().zip(&body[luma + chroma..]) {
                *dst = dst.wrapping_add(*src);
            }
            self.deltas += 1;
        }
        Ok(((self.last_keyframe << self.info.granule_shift) + self.deltas) as i64)
    }

    fn frame(&self) -> &PlanarFrame {
        &self.frame
    }

    fn granule_frame(&self, granule: i64) -> u64 {
        if granule < 0 {
            return 0;
        }
        let g = granule as u64;
        (g >> self.info.granule_shift) + (g & self.delta_mask())
    }

    fn granule_time(&self, granule: i64) -> f64 {
        (self.granule_frame(granule) + 1) as f64 * self.info.fps_den as f64
            / self.info.fps_num as f64
    }

    fn granule_keyframe(&self, granule: i64) -> u64 {
        if granule < 0 {
            return 0;
        }
        (granule as u64) >> self.info.granule_shift
    }

    fn set_granule_position(&mut self, granule: i64) {
        if granule < 0 {
            return;
        }
        let g = granule as u64;
        self.last_keyframe = g >> self.info.granule_shift;
        self.deltas = g & self.delta_mask();
    }

    fn reset(&mut self) {
        self.have_reference = false;
        self.last_keyframe = 0;
        self.deltas = 0;
    }
}

/// Encoder half of the block codec, used for authoring test and tool
/// streams
pub struct BlockEncoder {
    info: VideoInfo,
    prev: Option<PlanarFrame>,
    frame_index: u64,
    keyframe_interval: u32,
    last_keyframe: u64,
}

impl BlockEncoder {
    /// Create an encoder forcing a keyframe every `keyframe_interval`
    /// frames
    pub fn new(info: VideoInfo, keyframe_interval: u32) -> Result<Self> {
        if keyframe_interval == 0 || keyframe_interval as u64 > (1u64 << info.granule_shift) - 1 {
            return Err(Error::InvalidInput(format!(
                "keyframe interval {} does not fit granule shift {}",
                keyframe_interval, info.granule_shift
            )));
        }
        Ok(Self {
            info,
            prev: None,
            frame_index: 0,
            keyframe_interval,
            last_keyframe: 0,
        })
    }

    /// Stream parameters this encoder was configured with
    pub fn info(&self) -> &VideoInfo {
        &self.info
    }

    /// Encode the next frame, returning the packet and its granule
    /// position
    pub fn encode_frame(&mut self, frame: &PlanarFrame) -> Result<(Vec<u8>, i64)> {
        let (luma, chroma) = plane_sizes(&self.info);
        if frame.y.len() != luma || frame.cb.len() != chroma || frame.cr.len() != chroma {
            return Err(Error::InvalidInput("frame plane sizes mismatch".into()));
        }

        let keyframe =
            self.prev.is_none() || self.frame_index % self.keyframe_interval as u64 == 0;
        let mut packet = Vec::with_capacity(1 + luma + 2 * chroma + 4);
        if keyframe {
            packet.push(FLAG_KEYFRAME);
            packet.extend_from_slice(&(self.frame_index as u32).to_le_bytes());
            packet.extend_from_slice(&frame.y);
            packet.extend_from_slice(&frame.cb);
            packet.extend_from_slice(&frame.cr);
            self.last_keyframe = self.frame_index;
        } else {
            let prev = self.prev.as_ref().unwrap();
            packet.push(0);
            for (cur, old) in frame.y.iter().zip(&prev.y) {
                packet.push(cur.wrapping_sub(*old));
            }
            for (cur, old) in frame.cb.iter().zip(&prev.cb) {
                packet.push(cur.wrapping_sub(*old));
            }
            for (cur, old) in frame.cr.iter().zip(&prev.cr) {
                packet.push(cur.wrapping_sub(*old));
            }
        }

        let deltas = (self.frame_index - self.last_keyframe) as i64;
        let granule = ((self.last_keyframe as i64) << self.info.granule_shift) + deltas;
        self.prev = Some(frame.clone());
        self.frame_index += 1;
        Ok((packet, granule))
    }
}
