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

//! Zlib encoding: translated pixels through a persistent deflate stream.
//!
//! The stream lives for the whole session; each rectangle is one deflate
//! call with a sync flush so the client can decode it immediately. Payload
//! layout is `[u32 compressed length][deflate bytes]`.

use crate::capture::Frame;
use crate::error::{Result, ServerError};
use crate::protocol::{PixelFormat, ENCODING_ZLIB};
use crate::translate;
use bytes::{BufMut, BytesMut};
use flate2::{Compress, Compression, FlushCompress};
use std::sync::Mutex;

use super::Encoding;

/// Zlib encoder with its per-session compression stream.
pub struct ZlibEncoding {
    stream: Mutex<Compress>,
}

impl ZlibEncoding {
    /// Creates the encoder with a fresh deflate stream.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stream: Mutex::new(Compress::new(Compression::default(), true)),
        }
    }
}

impl Default for ZlibEncoding {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoding for ZlibEncoding {
    fn code(&self) -> i32 {
        ENCODING_ZLIB
    }

    #[allow(clippy::cast_possible_truncation)] // totals bounded by the output buffer size
    fn encode(&self, out: &mut BytesMut, format: &PixelFormat, frame: &Frame) -> Result<()> {
        let mut pixels = BytesMut::new();
        translate::translate(&mut pixels, format, frame);

        // Deflate worst case: input + input/1000 + 12 (zlib.h bound).
        let mut compressed = vec![0u8; pixels.len() + pixels.len() / 1000 + 12];

        let mut stream = self
            .stream
            .lock()
            .map_err(|_| ServerError::Encoding("zlib stream poisoned".into()))?;
        let previous_in = stream.total_in();
        let previous_out = stream.total_out();

        stream
            .compress(&pixels, &mut compressed, FlushCompress::Sync)
            .map_err(|err| ServerError::Encoding(format!("zlib: {err}")))?;

        let written = (stream.total_out() - previous_out) as usize;
        let consumed = (stream.total_in() - previous_in) as usize;
        if consumed < pixels.len() {
            return Err(ServerError::Encoding(format!(
                "zlib consumed {consumed}/{} bytes",
                pixels.len()
            )));
        }

        out.put_u32(written as u32);
        out.put_slice(&compressed[..written]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{Decompress, FlushDecompress};

    #[test]
    fn rectangles_share_one_stream() {
        let enc = ZlibEncoding::new();
        let mut frame = Frame::new(4, 4);
        for px in frame.pixels.chunks_exact_mut(4) {
            px.copy_from_slice(&[10, 20, 30, 255]);
        }
        let format = PixelFormat::rgb565();

        let mut inflater = Decompress::new(true);
        for _ in 0..3 {
            let mut out = BytesMut::new();
            enc.encode(&mut out, &format, &frame).unwrap();

            let len = u32::from_be_bytes([out[0], out[1], out[2], out[3]]) as usize;
            assert_eq!(out.len(), 4 + len);

            // Must inflate against the continuing stream state.
            let mut plain = vec![0u8; 64];
            let before = inflater.total_out();
            inflater
                .decompress(&out[4..], &mut plain, FlushDecompress::Sync)
                .unwrap();
            let produced = (inflater.total_out() - before) as usize;
            assert_eq!(produced, 32); // 4x4 pixels at 16 bpp
        }
    }
}
