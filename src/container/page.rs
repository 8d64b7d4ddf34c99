//! Page layout for the paged container format
//!
//! A page is the unit of framing and the unit of seeking. Byte layout,
//! all integers little-endian:
//!
//! ```text
//! magic        [u8; 4]   b"RPLS", capture pattern for resync
//! version      u8        format version, currently 0
//! flags        u8        bit 0: first page of stream (BOS)
//!                        bit 1: last page of stream (EOS)
//! serial       u32       elementary stream id
//! sequence     u32       per-stream page counter
//! granule      i64       position of the last packet ending on this
//!                        page, -1 if none does
//! packet_count u16       number of packets on this page
//! lengths      u32 * n   packet byte lengths
//! payload      ...       packet bytes, concatenated
//! ```

use super::{MAX_PACKETS_PER_PAGE, MAX_PACKET_LEN, MAX_PAGE_PAYLOAD};

/// Capture pattern marking the start of every page
pub const PAGE_MAGIC: [u8; 4] = *b"RPLS";

/// Fixed header size before the per-packet length table
pub const FIXED_HEADER_LEN: usize = 24;

const FLAG_BOS: u8 = 0x01;
const FLAG_EOS: u8 = 0x02;

/// One parsed container page
#[derive(Debug, Clone)]
pub struct Page {
    /// Elementary stream id
    pub serial: u32,

    /// Per-stream page counter
    pub sequence: u32,

    /// Granule position of the last packet ending on this page, -1 if
    /// no packet ends here
    pub granule: i64,

    /// First page of its stream
    pub bos: bool,

    /// Last page of its stream
    pub eos: bool,

    /// Whole packets carried by this page
    pub packets: Vec<Vec<u8>>,
}

/// Outcome of attempting to parse a page at a buffer position
pub(crate) enum ParseOutcome {
    /// A full, valid page; the value is (page, total bytes consumed)
    Page(Box<Page>, usize),
    /// The header is valid so far but the buffer ends too early
    NeedMoreData,
    /// The bytes at this position are not a plausible page header
    Invalid,
}

impl Page {
    /// Serialize the page to wire format
    pub fn to_bytes(&self) -> Vec<u8> {
        let payload_len: usize = self.packets.iter().map(|p| p.len()).sum();
        let mut out = Vec::with_capacity(FIXED_HEADER_LEN + 4 * self.packets.len() + payload_len);

        out.extend_from_slice(&PAGE_MAGIC);
        out.push(0); // version
        let mut flags = 0u8;
        if self.bos {
            flags |= FLAG_BOS;
        }
        if self.eos {
            flags |= FLAG_EOS;
        }
        out.push(flags);
        out.extend_from_slice(&self.serial.to_le_bytes());
        out.extend_from_slice(&self.sequence.to_le_bytes());
        out.extend_from_slice(&self.granule.to_le_bytes());
        out.extend_from_slice(&(self.packets.len() as u16).to_le_bytes());
        for packet in &self.packets {
            out.extend_from_slice(&(packet.len() as u32).to_le_bytes());
        }
        for packet in &self.packets {
            out.extend_from_slice(packet);
        }
        out
    }

    /// Attempt to parse a page from the start of `buf`
    ///
    /// `buf` must begin at a suspected capture pattern. The header is
    /// validated field by field so that payload bytes that happen to
    /// contain the magic are rejected rather than framed.
    pub(crate) fn parse(buf: &[u8]) -> ParseOutcome {
        if buf.len() < FIXED_HEADER_LEN {
            return if PAGE_MAGIC.starts_with(&buf[..buf.len().min(4)]) {
                ParseOutcome::NeedMoreData
            } else {
                ParseOutcome::Invalid
            };
        }
        if buf[..4] != PAGE_MAGIC {
            return ParseOutcome::Invalid;
        }
        if buf[4] != 0 {
            return ParseOutcome::Invalid;
        }
        let flags = buf[5];
        if flags & !(FLAG_BOS | FLAG_EOS) != 0 {
            return ParseOutcome::Invalid;
        }
        let serial = u32::from_le_bytes(buf[6..10].try_into().unwrap());
        let sequence = u32::from_le_bytes(buf[10..14].try_into().unwrap());
        let granule = i64::from_le_bytes(buf[14..22].try_into().unwrap());
        if granule < -1 {
            return ParseOutcome::Invalid;
        }
        let packet_count = u16::from_le_bytes(buf[22..24].try_into().unwrap()) as usize;
        if packet_count > MAX_PACKETS_PER_PAGE {
            return ParseOutcome::Invalid;
        }

        let table_end = FIXED_HEADER_LEN + 4 * packet_count;
        if buf.len() < table_end {
            return ParseOutcome::NeedMoreData;
        }
        let mut lengths = Vec::with_capacity(packet_count);
        let mut payload_len = 0usize;
        for i in 0..packet_count {
            let off = FIXED_HEADER_LEN + 4 * i;
            let len = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap()) as usize;
            if len > MAX_PACKET_LEN {
                return ParseOutcome::Invalid;
            }
            payload_len += len;
            lengths.push(len);
        }
        if payload_len > MAX_PAGE_PAYLOAD {
            return ParseOutcome::Invalid;
        }

        let total = table_end + payload_len;
        if buf.len() < total {
            return ParseOutcome::NeedMoreData;
        }

        let mut packets = Vec::with_capacity(packet_count);
        let mut pos = table_end;
        for len in lengths {
            packets.push(buf[pos..pos + len].to_vec());
            pos += len;
        }

        let page = Page {
            serial,
            sequence,
            granule,
            bos: flags & FLAG_BOS != 0,
            eos: flags & FLAG_EOS != 0,
            packets,
        };
        ParseOutcome::Page(Box::new(page), total)
    }
}
