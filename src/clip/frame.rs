//! Decoded frame slot contents

/// One decoded video image and its display metadata
///
/// Frames live inside a clip's frame queue and are reused for the
/// clip's whole lifetime; the pixel buffer is allocated once when the
/// queue is sized and overwritten by each decode.
#[derive(Debug)]
pub struct VideoFrame {
    pub(crate) data: Vec<u8>,
    pub(crate) display_time: f64,
    pub(crate) iteration: bool,
    pub(crate) frame_number: u64,
}

impl VideoFrame {
    pub(crate) fn with_buffer_len(len: usize) -> Self {
        Self {
            data: vec![0; len],
            display_time: 0.0,
            iteration: false,
            frame_number: 0,
        }
    }

    /// Converted pixel data in the clip's active output layout
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Time at which this frame should be displayed, in seconds from
    /// the start of its loop iteration
    pub fn display_time(&self) -> f64 {
        self.display_time
    }

    /// Loop iteration parity this frame belongs to
    pub fn iteration(&self) -> bool {
        self.iteration
    }

    /// Index of this frame within the stream
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }
}
