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

//! Raw encoding: pixels in the client's format, no compression.

use crate::capture::Frame;
use crate::error::Result;
use crate::protocol::{PixelFormat, ENCODING_RAW};
use crate::translate;
use bytes::BytesMut;

use super::Encoding;

/// The universally-supported fallback encoding. High bandwidth; the payload
/// is just the translated pixel data.
pub struct RawEncoding;

impl Encoding for RawEncoding {
    fn code(&self) -> i32 {
        ENCODING_RAW
    }

    fn encode(&self, out: &mut BytesMut, format: &PixelFormat, frame: &Frame) -> Result<()> {
        translate::translate(out, format, frame);
        Ok(())
    }
}
