//! Stream authoring for the paged container format
//!
//! `StreamMuxer` interleaves the packets of several elementary streams
//! into pages. Header packets go on BOS pages, one stream at a time,
//! before any data packet; data packets accumulate per stream and flush
//! as a page once enough payload is pending, so streams interleave at
//! roughly page granularity when the caller feeds packets in time order.

use super::page::Page;
use crate::utils::error::{Error, Result};

/// Target payload size that triggers a page flush
const TARGET_PAGE_PAYLOAD: usize = 4096;

struct MuxStream {
    serial: u32,
    sequence: u32,
    pending: Vec<(Vec<u8>, i64)>,
    pending_bytes: usize,
    finished: bool,
}

/// Multiplexer writing interleaved elementary streams into page form
pub struct StreamMuxer {
    out: Vec<u8>,
    streams: Vec<MuxStream>,
    data_started: bool,
}

impl StreamMuxer {
    pub fn new() -> Self {
        Self {
            out: Vec::new(),
            streams: Vec::new(),
            data_started: false,
        }
    }

    /// Register a stream and emit its BOS page carrying the codec header
    /// packet
    ///
    /// All streams must be added before the first data packet so that
    /// every BOS page precedes every data page.
    pub fn add_stream(&mut self, serial: u32, header_packet: Vec<u8>) -> Result<()> {
        if self.data_started {
            return Err(Error::InvalidInput(
                "streams must be added before data packets".into(),
            ));
        }
        if self.streams.iter().any(|s| s.serial == serial) {
            return Err(Error::InvalidInput(format!(
                "duplicate stream serial {:#x}",
                serial
            )));
        }
        let page = Page {
            serial,
            sequence: 0,
            granule: -1,
            bos: true,
            eos: false,
            packets: vec![header_packet],
        };
        self.out.extend_from_slice(&page.to_bytes());
        self.streams.push(MuxStream {
            serial,
            sequence: 1,
            pending: Vec::new(),
            pending_bytes: 0,
            finished: false,
        });
        Ok(())
    }

    /// Queue a data packet with the granule position it completes
    ///
    /// Call in presentation order across streams for a well-interleaved
    /// output.
    pub fn add_packet(&mut self, serial: u32, packet: Vec<u8>, granule: i64) -> Result<()> {
        self.data_started = true;
        let stream = self
            .streams
            .iter_mut()
            .find(|s| s.serial == serial)
            .ok_or_else(|| Error::InvalidInput(format!("unknown stream serial {:#x}", serial)))?;
        if stream.finished {
            return Err(Error::InvalidInput(format!(
                "stream {:#x} already finished",
                serial
            )));
        }
        stream.pending_bytes += packet.len();
        stream.pending.push((packet, granule));
        if stream.pending_bytes >= TARGET_PAGE_PAYLOAD {
            Self::flush_stream(&mut self.out, stream, false);
        }
        Ok(())
    }

    /// Flush remaining packets, mark every stream's last page EOS, and
    /// return the serialized container bytes
    pub fn finish(mut self) -> Vec<u8> {
        for stream in &mut self.streams {
            Self::flush_stream(&mut self.out, stream, true);
            stream.finished = true;
        }
        self.out
    }

    fn flush_stream(out: &mut Vec<u8>, stream: &mut MuxStream, eos: bool) {
        if stream.pending.is_empty() {
            if eos {
                // an empty closing page still marks end-of-stream
                let page = Page {
                    serial: stream.serial,
                    sequence: stream.sequence,
                    granule: -1,
                    bos: false,
                    eos: true,
                    packets: Vec::new(),
                };
                stream.sequence += 1;
                out.extend_from_slice(&page.to_bytes());
            }
            return;
        }
        let granule = stream.pending.last().map(|(_, g)| *g).unwrap_or(-1);
        let packets: Vec<Vec<u8>> = stream.pending.drain(..).map(|(p, _)| p).collect();
        stream.pending_bytes = 0;
        let page = Page {
            serial: stream.serial,
            sequence: stream.sequence,
            granule,
            bos: false,
            eos,
            packets,
        };
        stream.sequence += 1;
        out.extend_from_slice(&page.to_bytes());
    }
}

impl Default for StreamMuxer {
    fn default() -> Self {
        Self::new()
    }
}
