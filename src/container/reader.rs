//! Page scanning and packet assembly
//!
//! `PageScanner` buffers raw bytes from a data source and frames them
//! into pages, resynchronizing on the capture pattern after a blind byte
//! seek. `StreamAssembler` accepts the pages of one elementary stream
//! and hands out its packets in order. Together they are the demux half
//! of the container layer; neither touches a codec.

use super::page::{Page, ParseOutcome};
use log::warn;

/// Incremental page framer over a byte buffer
///
/// Feed it bytes with [`push_bytes`](Self::push_bytes), pull pages with
/// [`next_page`](Self::next_page). After seeking the underlying source
/// to an arbitrary offset, call [`reset`](Self::reset); the scanner then
/// skips garbage up to the next capture pattern on its own.
pub struct PageScanner {
    buf: Vec<u8>,
    /// Bytes before this offset have been consumed or rejected
    pos: usize,
}

impl PageScanner {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(8192),
            pos: 0,
        }
    }

    /// Append raw bytes read from the source
    pub fn push_bytes(&mut self, data: &[u8]) {
        // drop the consumed prefix before growing the buffer
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
        self.buf.extend_from_slice(data);
    }

    /// Discard all buffered bytes (used around source seeks)
    pub fn reset(&mut self) {
        self.buf.clear();
        self.pos = 0;
    }

    /// Frame the next page out of the buffer, if a complete one is
    /// available
    pub fn next_page(&mut self) -> Option<Page> {
        loop {
            let remaining = &self.buf[self.pos..];
            if remaining.is_empty() {
                return None;
            }
            // scan forward to a candidate capture pattern
            let offset = match find_magic(remaining) {
                Some(off) => off,
                None => {
                    // keep the last few bytes in case the magic straddles
                    // the chunk boundary
                    let keep = remaining.len().min(3);
                    self.pos = self.buf.len() - keep;
                    return None;
                }
            };
            self.pos += offset;

            match Page::parse(&self.buf[self.pos..]) {
                ParseOutcome::Page(page, consumed) => {
                    self.pos += consumed;
                    return Some(*page);
                }
                ParseOutcome::NeedMoreData => return None,
                ParseOutcome::Invalid => {
                    // false capture pattern inside payload bytes; step
                    // past it and rescan
                    self.pos += 1;
                }
            }
        }
    }
}

impl Default for PageScanner {
    fn default() -> Self {
        Self::new()
    }
}

fn find_magic(buf: &[u8]) -> Option<usize> {
    buf.windows(super::PAGE_MAGIC.len())
        .position(|w| w == super::PAGE_MAGIC.as_slice())
}

/// Packet assembly for one elementary stream
///
/// Pages for the stream's serial go in, packets come out in order.
/// `reset` discards queued packets and the sequence expectation, used
/// for seeks and restarts.
pub struct StreamAssembler {
    serial: u32,
    packets: std::collections::VecDeque<Vec<u8>>,
    next_sequence: Option<u32>,
    last_granule: i64,
}

impl StreamAssembler {
    pub fn new(serial: u32) -> Self {
        Self {
            serial,
            packets: std::collections::VecDeque::new(),
            next_sequence: None,
            last_granule: -1,
        }
    }

    /// Serial number of the stream this assembler accepts
    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// Granule position of the most recent page that carried one
    pub fn last_granule(&self) -> i64 {
        self.last_granule
    }

    /// Accept a page; pages for other serials are ignored
    pub fn page_in(&mut self, page: &Page) {
        if page.serial != self.serial {
            return;
        }
        if let Some(expected) = self.next_sequence {
            if page.sequence != expected {
                warn!(
                    "stream {:#x}: page sequence gap, expected {} got {}",
                    self.serial, expected, page.sequence
                );
            }
        }
        self.next_sequence = Some(page.sequence.wrapping_add(1));
        if page.granule >= 0 {
            self.last_granule = page.granule;
        }
        for packet in &page.packets {
            self.packets.push_back(packet.clone());
        }
    }

    /// Pull the next assembled packet
    pub fn packet_out(&mut self) -> Option<Vec<u8>> {
        self.packets.pop_front()
    }

    /// Discard queued packets and sequence state
    pub fn reset(&mut self) {
        self.packets.clear();
        self.next_sequence = None;
        self.last_granule = -1;
    }
}
