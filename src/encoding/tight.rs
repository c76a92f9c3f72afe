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

//! Tight encoding, JPEG mode.
//!
//! The whole rectangle is JPEG-compressed and framed as
//! `[0x90][compact length][JPEG bytes]`; 0x90 is the control byte selecting
//! basic JPEG in Tight. The JPEG payload always carries 24-bit RGB, so the
//! negotiated pixel format does not affect this encoder.

use crate::capture::Frame;
use crate::error::{Result, ServerError};
use crate::protocol::{PixelFormat, ENCODING_TIGHT};
use bytes::{BufMut, BytesMut};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder};

use super::{put_compact_length, Encoding};

/// Control byte selecting basic JPEG compression.
const TIGHT_JPEG_CTRL: u8 = 0x90;

/// Default JPEG quality when none is configured.
pub const DEFAULT_JPEG_QUALITY: u8 = 75;

/// Tight encoder compressing every rectangle as JPEG.
pub struct TightJpegEncoding {
    quality: u8,
}

impl TightJpegEncoding {
    /// Creates the encoder with the given JPEG quality, clamped to 1..=100.
    /// Zero selects the default.
    #[must_use]
    pub fn new(quality: u8) -> Self {
        let quality = match quality {
            0 => DEFAULT_JPEG_QUALITY,
            q => q.min(100),
        };
        Self { quality }
    }
}

impl Encoding for TightJpegEncoding {
    fn code(&self) -> i32 {
        ENCODING_TIGHT
    }

    fn encode(&self, out: &mut BytesMut, _format: &PixelFormat, frame: &Frame) -> Result<()> {
        // Strip alpha: the JPEG path takes tightly-packed RGB.
        let mut rgb = Vec::with_capacity(frame.width as usize * frame.height as usize * 3);
        for px in frame.pixels.chunks_exact(4) {
            rgb.extend_from_slice(&px[..3]);
        }

        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, self.quality)
            .write_image(
                &rgb,
                u32::from(frame.width),
                u32::from(frame.height),
                ExtendedColorType::Rgb8,
            )
            .map_err(|err| ServerError::Encoding(format!("jpeg: {err}")))?;

        out.put_u8(TIGHT_JPEG_CTRL);
        put_compact_length(out, jpeg.len());
        out.put_slice(&jpeg);
        Ok(())
    }
}
