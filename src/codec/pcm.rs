//! PCM audio codec
//!
//! Packets carry interleaved signed 16-bit little-endian samples; the
//! decoder converts them to planar `f32` channel buffers. The surface is
//! packet-in / pcm-out so the driver thread can drain decoded audio
//! independently of packet arrival. Granule positions count total
//! samples per channel since the start of the stream.

use super::{AudioDecoder, AudioInfo};
use crate::utils::error::{Error, Result};
use std::collections::VecDeque;

const HEADER_MAGIC: &[u8; 4] = b"LPCM";
const HEADER_LEN: usize = 10;

/// Whether a header packet belongs to this codec
pub fn claims_header(packet: &[u8]) -> bool {
    packet.len() >= 4 && &packet[..4] == HEADER_MAGIC
}

/// Serialize the codec ident header packet
pub fn encode_header(info: &AudioInfo) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN);
    out.extend_from_slice(HEADER_MAGIC);
    out.push(0); // version
    out.push(info.channels as u8);
    out.extend_from_slice(&info.sample_rate.to_le_bytes());
    out
}

/// Encode interleaved i16 samples as one data packet
pub fn encode_packet(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// Decoder state for the PCM codec
pub struct PcmDecoder {
    info: AudioInfo,
    pending: VecDeque<Vec<Vec<f32>>>,
}

impl PcmDecoder {
    /// Parse the ident header packet and construct a decoder
    pub fn from_header(packet: &[u8]) -> Result<Self> {
        if packet.len() < HEADER_LEN || !claims_header(packet) {
            return Err(Error::malformed("audio header packet too short"));
        }
        if packet[4] != 0 {
            return Err(Error::UnsupportedCodec(format!(
                "pcm codec version {}",
                packet[4]
            )));
        }
        let channels = packet[5] as u32;
        let sample_rate = u32::from_le_bytes(packet[6..10].try_into().unwrap());
        if channels == 0 || channels > 8 {
            return Err(Error::malformed(format!("bad channel count {}", channels)));
        }
        if sample_rate == 0 {
            return Err(Error::malformed("zero sample rate"));
        }
        Ok(Self {
            info: AudioInfo {
                channels,
                sample_rate,
            },
            pending: VecDeque::new(),
        })
    }
}

impl AudioDecoder for PcmDecoder {
    fn info(&self) -> &AudioInfo {
        &self.info
    }

    fn packet_in(&mut self, packet: &[u8]) -> Result<()> {
        let channels = self.info.channels as usize;
        let frame_bytes = 2 * channels;
        if packet.is_empty() || packet.len() % frame_bytes != 0 {
            return Err(Error::Audio(format!(
                "pcm packet length {} not a multiple of {}",
                packet.len(),
                frame_bytes
            )));
        }
        let count = packet.len() / frame_bytes;
        let mut planar = vec![Vec::with_capacity(count); channels];
        for frame in packet.chunks_exact(frame_bytes) {
            for (ch, bytes) in frame.chunks_exact(2).enumerate() {
                let sample = i16::from_le_bytes([bytes[0], bytes[1]]);
                planar[ch].push(sample as f32 / 32768.0);
            }
        }
        self.pending.push_back(planar);
        Ok(())
    }

    fn pcm_out(&mut self) -> Option<Vec<Vec<f32>>> {
        self.pending.pop_front()
    }

    fn granule_time(&self, granule: i64) -> f64 {
        if granule < 0 {
            return 0.0;
        }
        granule as f64 / self.info.sample_rate as f64
    }

    fn restart(&mut self) {
        self.pending.clear();
    }
}
