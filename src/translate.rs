// Copyright 2026 The vncmirror Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Pixel-format translation from captured RGBA to the client's format.
//!
//! Captured frames are always tightly-packed 8-bit RGBA. The client
//! negotiates an arbitrary true-colour layout (bpp, channel maxima, shifts,
//! endianness); translation widens each channel to 16 bits, quantizes it
//! into the client's channel range, packs the channels with the client's
//! shifts, and emits the pixel at the client's width and endianness.
//!
//! Output is row-major, left to right, appended to the caller's buffer with
//! no per-pixel allocation.

use crate::capture::Frame;
use crate::protocol::PixelFormat;
use bytes::{BufMut, BytesMut};

/// Appends `frame` translated into `format` onto `out`.
///
/// Exactly `width * height * (bpp / 8)` bytes are produced.
pub fn translate(out: &mut BytesMut, format: &PixelFormat, frame: &Frame) {
    let pixel_count = frame.width as usize * frame.height as usize;
    out.reserve(pixel_count * format.bytes_per_pixel());

    let big_endian = format.big_endian_flag != 0;
    for rgba in frame.pixels.chunks_exact(4) {
        // Widen to the 16-bit range the quantization shifts assume.
        let r16 = u32::from(rgba[0]) << 8 | u32::from(rgba[0]);
        let g16 = u32::from(rgba[1]) << 8 | u32::from(rgba[1]);
        let b16 = u32::from(rgba[2]) << 8 | u32::from(rgba[2]);

        let r = quantize(r16, format.red_max);
        let g = quantize(g16, format.green_max);
        let b = quantize(b16, format.blue_max);

        let pixel = (r << format.red_shift) | (g << format.green_shift) | (b << format.blue_shift);

        match format.bits_per_pixel {
            8 => out.put_u8(pixel as u8),
            16 => {
                if big_endian {
                    out.put_u16(pixel as u16);
                } else {
                    out.put_u16_le(pixel as u16);
                }
            }
            _ => {
                if big_endian {
                    out.put_u32(pixel);
                } else {
                    out.put_u32_le(pixel);
                }
            }
        }
    }
}

/// Shifts a 16-bit channel value down into `0..=max`.
#[inline]
fn quantize(v16: u32, max: u16) -> u32 {
    match max {
        0x1f => v16 >> 11, // 5 bits
        0x3f => v16 >> 10, // 6 bits
        0xff => v16 >> 8,  // 8 bits
        _ => v16 >> 8,     // fallback: clamp to 8 bits per channel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_of(pixels: &[[u8; 4]], width: u16, height: u16) -> Frame {
        let mut frame = Frame::new(width, height);
        for (dst, src) in frame.pixels.chunks_exact_mut(4).zip(pixels) {
            dst.copy_from_slice(src);
        }
        frame
    }

    #[test]
    fn rgb565_red_pixel() {
        let frame = frame_of(&[[255, 0, 0, 255]], 1, 1);
        let mut out = BytesMut::new();
        translate(&mut out, &PixelFormat::rgb565(), &frame);

        assert_eq!(out.len(), 2);
        let value = u16::from_le_bytes([out[0], out[1]]);
        assert_eq!(value, 0xF800);
    }

    #[test]
    fn rgb565_white_fills_all_channels() {
        let frame = frame_of(&[[255, 255, 255, 255]], 1, 1);
        let mut out = BytesMut::new();
        translate(&mut out, &PixelFormat::rgb565(), &frame);
        assert_eq!(u16::from_le_bytes([out[0], out[1]]), 0xFFFF);
    }

    #[test]
    fn rgb565_big_endian_byte_order() {
        let mut format = PixelFormat::rgb565();
        format.big_endian_flag = 1;
        let frame = frame_of(&[[255, 0, 0, 255]], 1, 1);
        let mut out = BytesMut::new();
        translate(&mut out, &format, &frame);
        assert_eq!(&out[..], &[0xF8, 0x00]);
    }

    #[test]
    fn rgbx32_passes_channels_through() {
        let frame = frame_of(&[[128, 64, 32, 255]], 1, 1);
        let mut out = BytesMut::new();
        translate(&mut out, &PixelFormat::rgbx32(), &frame);

        assert_eq!(out.len(), 4);
        // red_shift 0, green_shift 8, blue_shift 16, little-endian
        assert_eq!(&out[..], &[128, 64, 32, 0]);
    }

    #[test]
    fn output_length_matches_bpp() {
        let frame = frame_of(&[[1, 2, 3, 255]; 6], 3, 2);
        let mut out = BytesMut::new();
        translate(&mut out, &PixelFormat::rgb565(), &frame);
        assert_eq!(out.len(), 12);

        out.clear();
        translate(&mut out, &PixelFormat::rgbx32(), &frame);
        assert_eq!(out.len(), 24);
    }
}
