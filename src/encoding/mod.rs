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

//! Rectangle encodings for framebuffer updates.
//!
//! An encoder packages one rectangle of pixels into its on-wire form. The
//! active encoder is chosen once per `SetEncodings` message by scanning the
//! client's list in order and taking the first supported code; Raw is the
//! fallback when nothing matches.

use crate::capture::Frame;
use crate::error::Result;
use crate::protocol::{PixelFormat, ENCODING_RAW, ENCODING_TIGHT, ENCODING_TIGHTPNG, ENCODING_ZLIB};
use bytes::BytesMut;
use std::sync::Arc;

pub mod raw;
pub mod tight;
pub mod tightpng;
pub mod zlib;

pub use raw::RawEncoding;
pub use tight::TightJpegEncoding;
pub use tightpng::TightPngEncoding;
pub use zlib::ZlibEncoding;

/// One rectangle encoding.
pub trait Encoding: Send + Sync {
    /// The RFB encoding code written into the rectangle header.
    fn code(&self) -> i32;

    /// Appends the encoded pixel data for `frame` onto `out`.
    ///
    /// # Errors
    ///
    /// An error means this rectangle could not be produced (e.g. the JPEG
    /// encoder failed); the caller drops the whole update rather than emit
    /// a truncated message. The session stays up.
    fn encode(&self, out: &mut BytesMut, format: &PixelFormat, frame: &Frame) -> Result<()>;
}

/// Picks the active encoder from a client's encoding list.
///
/// First supported code wins; an empty or unsupported list falls back to
/// Raw. Pseudo-encodings never reach this function.
#[must_use]
pub fn select_encoding(codes: &[i32], jpeg_quality: u8) -> Arc<dyn Encoding> {
    for &code in codes {
        match code {
            ENCODING_RAW => return Arc::new(RawEncoding),
            ENCODING_TIGHT => return Arc::new(TightJpegEncoding::new(jpeg_quality)),
            ENCODING_TIGHTPNG => return Arc::new(TightPngEncoding),
            ENCODING_ZLIB => return Arc::new(ZlibEncoding::new()),
            _ => {}
        }
    }
    Arc::new(RawEncoding)
}

/// Appends a Tight compact length: 7 bits per byte, high bit set while more
/// bytes follow. Covers lengths below 2^21.
pub(crate) fn put_compact_length(out: &mut BytesMut, n: usize) {
    use bytes::BufMut;

    if n < 0x80 {
        out.put_u8((n & 0x7f) as u8);
    } else if n < 0x4000 {
        out.put_u8(((n & 0x7f) | 0x80) as u8);
        out.put_u8(((n >> 7) & 0x7f) as u8);
    } else {
        out.put_u8(((n & 0x7f) | 0x80) as u8);
        out.put_u8((((n >> 7) & 0x7f) | 0x80) as u8);
        out.put_u8(((n >> 14) & 0x7f) as u8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Decodes a compact length, returning the value and bytes consumed.
    fn decode_compact_length(buf: &[u8]) -> (usize, usize) {
        let mut value = (buf[0] & 0x7f) as usize;
        if buf[0] & 0x80 == 0 {
            return (value, 1);
        }
        value |= ((buf[1] & 0x7f) as usize) << 7;
        if buf[1] & 0x80 == 0 {
            return (value, 2);
        }
        value |= ((buf[2] & 0x7f) as usize) << 14;
        (value, 3)
    }

    #[test]
    fn compact_length_roundtrips() {
        // Boundaries plus a sweep across each width class.
        let mut cases: Vec<usize> = vec![0, 1, 0x7f, 0x80, 0x3fff, 0x4000, (1 << 21) - 1];
        cases.extend((0..1 << 21).step_by(997));

        for n in cases {
            let mut buf = BytesMut::new();
            put_compact_length(&mut buf, n);
            let (decoded, used) = decode_compact_length(&buf);
            assert_eq!(decoded, n, "value {n} did not roundtrip");
            assert_eq!(used, buf.len(), "trailing bytes for value {n}");
        }
    }

    #[test]
    fn compact_length_widths() {
        for (n, expected) in [(0, 1), (0x7f, 1), (0x80, 2), (0x3fff, 2), (0x4000, 3)] {
            let mut buf = BytesMut::new();
            put_compact_length(&mut buf, n);
            assert_eq!(buf.len(), expected, "width for value {n}");
        }
    }

    #[test]
    fn selection_takes_first_supported() {
        let enc = select_encoding(&[ENCODING_TIGHT, ENCODING_RAW], 75);
        assert_eq!(enc.code(), ENCODING_TIGHT);

        let enc = select_encoding(&[99, ENCODING_ZLIB, ENCODING_TIGHT], 75);
        assert_eq!(enc.code(), ENCODING_ZLIB);
    }

    #[test]
    fn selection_falls_back_to_raw() {
        assert_eq!(select_encoding(&[], 75).code(), ENCODING_RAW);
        assert_eq!(select_encoding(&[99, -1], 75).code(), ENCODING_RAW);
        assert_eq!(select_encoding(&[ENCODING_TIGHTPNG], 75).code(), ENCODING_TIGHTPNG);
    }
}
