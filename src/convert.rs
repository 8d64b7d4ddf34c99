//! Output pixel conversion
//!
//! Decoded planar 4:2:0 data is converted into the clip's configured
//! output layout as the last step of a decode, directly into the claimed
//! frame slot's buffer. The YCbCr to RGB path uses the BT.601 integer
//! approximation with a lazily built clamp table.

use crate::codec::PlanarFrame;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Pixel layout written into frame buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum OutputMode {
    /// Packed 8-bit RGB
    Rgb24 = 0,

    /// Packed 8-bit RGBA, alpha fixed at 255
    Rgba32 = 1,

    /// Luma plane only
    Gray8 = 2,

    /// Planar 4:2:0, copied through with row padding applied
    Yuv420 = 3,
}

impl OutputMode {
    /// Bytes per output pixel; `Yuv420` averages 1.5 and is handled by
    /// [`buffer_len`](Self::buffer_len) directly
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            OutputMode::Rgb24 => 3,
            OutputMode::Rgba32 => 4,
            OutputMode::Gray8 => 1,
            OutputMode::Yuv420 => 1,
        }
    }

    /// Required buffer length for a strided image in this mode
    pub fn buffer_len(&self, stride: u32, height: u32) -> usize {
        let stride = stride as usize;
        let height = height as usize;
        match self {
            OutputMode::Rgb24 | OutputMode::Rgba32 | OutputMode::Gray8 => {
                stride * height * self.bytes_per_pixel()
            }
            OutputMode::Yuv420 => stride * height + 2 * (stride / 2) * (height / 2),
        }
    }

    pub(crate) fn to_u8(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            0 => OutputMode::Rgb24,
            1 => OutputMode::Rgba32,
            2 => OutputMode::Gray8,
            _ => OutputMode::Yuv420,
        }
    }
}

/// Row stride policy for output buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrideMode {
    /// Stride equals the frame width
    Natural,

    /// Stride is the next power of two at or above the frame width, for
    /// texture pipelines that require it
    PowerOfTwo,
}

impl StrideMode {
    /// Row stride in pixels for a frame of the given width
    pub fn stride_for(&self, width: u32) -> u32 {
        match self {
            StrideMode::Natural => width,
            StrideMode::PowerOfTwo => crate::utils::next_pow2(width),
        }
    }
}

/// Clamp table covering the BT.601 intermediate range; index is the
/// unclamped value offset by 384
static CLAMP: Lazy<Vec<u8>> = Lazy::new(|| {
    (0..1024)
        .map(|i| (i - 384).clamp(0, 255) as u8)
        .collect()
});

#[inline]
fn clamp8(v: i32) -> u8 {
    CLAMP[((v + 384).clamp(0, 1023)) as usize]
}

#[inline]
fn ycbcr_to_rgb(y: u8, cb: u8, cr: u8) -> (u8, u8, u8) {
    let c = 298 * (y as i32 - 16);
    let d = cb as i32 - 128;
    let e = cr as i32 - 128;
    let r = clamp8((c + 409 * e + 128) >> 8);
    let g = clamp8((c - 100 * d - 208 * e + 128) >> 8);
    let b = clamp8((c + 516 * d + 128) >> 8);
    (r, g, b)
}

/// Convert a planar frame into `out` using the given mode and stride
///
/// `out` must be exactly `mode.buffer_len(stride, frame.height)` bytes;
/// this is guaranteed by the frame queue sizing its buffers from the
/// same parameters.
pub fn convert(frame: &PlanarFrame, mode: OutputMode, stride: u32, out: &mut [u8]) {
    debug_assert_eq!(out.len(), mode.buffer_len(stride, frame.height));
    let w = frame.width as usize;
    let h = frame.height as usize;
    let stride = stride as usize;

    match mode {
        OutputMode::Gray8 => {
            for row in 0..h {
                let src = &frame.y[row * w..row * w + w];
                out[row * stride..row * stride + w].copy_from_slice(src);
            }
        }
        OutputMode::Yuv420 => {
            let half_w = w / 2;
            let half_stride = stride / 2;
            let y_len = stride * h;
            let c_len = half_stride * (h / 2);
            for row in 0..h {
                out[row * stride..row * stride + w]
                    .copy_from_slice(&frame.y[row * w..row * w + w]);
            }
            for row in 0..h / 2 {
                out[y_len + row * half_stride..y_len + row * half_stride + half_w]
                    .copy_from_slice(&frame.cb[row * half_w..row * half_w + half_w]);
                out[y_len + c_len + row * half_stride..y_len + c_len + row * half_stride + half_w]
                    .copy_from_slice(&frame.cr[row * half_w..row * half_w + half_w]);
            }
        }
        OutputMode::Rgb24 => {
            let half_w = w / 2;
            for row in 0..h {
                let y_row = &frame.y[row * w..row * w + w];
                let c_row = (row / 2) * half_w;
                let dst = &mut out[row * stride * 3..];
                for (x, &y) in y_row.iter().enumerate() {
                    let cb = frame.cb[c_row + x / 2];
                    let cr = frame.cr[c_row + x / 2];
                    let (r, g, b) = ycbcr_to_rgb(y, cb, cr);
                    dst[x * 3] = r;
                    dst[x * 3 + 1] = g;
                    dst[x * 3 + 2] = b;
                }
            }
        }
        OutputMode::Rgba32 => {
            let half_w = w / 2;
            // write whole pixels at a time
            let pixels: &mut [[u8; 4]] = bytemuck::cast_slice_mut(out);
            for row in 0..h {
                let y_row = &frame.y[row * w..row * w + w];
                let c_row = (row / 2) * half_w;
                let dst = &mut pixels[row * stride..];
                for (x, &y) in y_row.iter().enumerate() {
                    let cb = frame.cb[c_row + x / 2];
                    let cr = frame.cr[c_row + x / 2];
                    let (r, g, b) = ycbcr_to_rgb(y, cb, cr);
                    dst[x] = [r, g, b, 255];
                }
            }
        }
    }
}
