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

//! TightPng encoding: Tight framing with a lossless PNG payload.

use crate::capture::Frame;
use crate::error::{Result, ServerError};
use crate::protocol::{PixelFormat, ENCODING_TIGHTPNG};
use bytes::{BufMut, BytesMut};
use png::{BitDepth, ColorType, Encoder};

use super::{put_compact_length, Encoding};

/// Control byte selecting the PNG sub-encoding.
const TIGHT_PNG_CTRL: u8 = 0x50;

/// Lossless alternative to the JPEG mode; payload layout is
/// `[0x50][compact length][PNG bytes]`.
pub struct TightPngEncoding;

impl Encoding for TightPngEncoding {
    fn code(&self) -> i32 {
        ENCODING_TIGHTPNG
    }

    fn encode(&self, out: &mut BytesMut, _format: &PixelFormat, frame: &Frame) -> Result<()> {
        let mut rgb = Vec::with_capacity(frame.width as usize * frame.height as usize * 3);
        for px in frame.pixels.chunks_exact(4) {
            rgb.extend_from_slice(&px[..3]);
        }

        let mut png_data = Vec::new();
        {
            let mut encoder = Encoder::new(&mut png_data, u32::from(frame.width), u32::from(frame.height));
            encoder.set_color(ColorType::Rgb);
            encoder.set_depth(BitDepth::Eight);
            let mut writer = encoder
                .write_header()
                .map_err(|err| ServerError::Encoding(format!("png header: {err}")))?;
            writer
                .write_image_data(&rgb)
                .map_err(|err| ServerError::Encoding(format!("png data: {err}")))?;
        }

        out.put_u8(TIGHT_PNG_CTRL);
        put_compact_length(out, png_data.len());
        out.put_slice(&png_data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_framed_png() {
        let mut frame = Frame::new(4, 4);
        for px in frame.pixels.chunks_exact_mut(4) {
            px.copy_from_slice(&[1, 2, 3, 255]);
        }

        let mut out = BytesMut::new();
        TightPngEncoding
            .encode(&mut out, &PixelFormat::rgb565(), &frame)
            .unwrap();

        assert_eq!(out[0], TIGHT_PNG_CTRL);
        let mut idx = 1;
        while out[idx] & 0x80 != 0 {
            idx += 1;
        }
        idx += 1;
        // PNG signature
        assert_eq!(&out[idx..idx + 4], &[0x89, b'P', b'N', b'G']);
    }
}
