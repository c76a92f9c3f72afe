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

//! RFB (Remote Framebuffer) protocol constants and wire structures.
//!
//! Everything multi-byte on the wire is big-endian. Each wire struct carries
//! a hand-written codec for its fixed field list; there is no reflective
//! encode/decode anywhere in the protocol layer.

use bytes::{Buf, BufMut, BytesMut};
use std::io;

/// The RFB protocol version string advertised by the server.
///
/// Must be exactly 12 bytes including the trailing newline.
pub const PROTOCOL_VERSION: &str = "RFB 003.008\n";

// Client-to-Server message types

/// Client requests to change the pixel format for subsequent updates.
pub const CLIENT_MSG_SET_PIXEL_FORMAT: u8 = 0;

/// Client announces the encodings it supports, in order of preference.
pub const CLIENT_MSG_SET_ENCODINGS: u8 = 2;

/// Client asks for a framebuffer update (incremental or full) of a region.
pub const CLIENT_MSG_FRAMEBUFFER_UPDATE_REQUEST: u8 = 3;

/// Client sends a keyboard event (keysym + press/release flag).
pub const CLIENT_MSG_KEY_EVENT: u8 = 4;

/// Client sends a pointer event (position + button mask).
pub const CLIENT_MSG_POINTER_EVENT: u8 = 5;

/// Client transfers clipboard contents to the server.
pub const CLIENT_MSG_CLIENT_CUT_TEXT: u8 = 6;

// Server-to-Client message types

/// Server sends one or more rectangles of encoded pixel data.
pub const SERVER_MSG_FRAMEBUFFER_UPDATE: u8 = 0;

// Encoding codes

/// Raw: uncompressed pixel data in the negotiated pixel format.
pub const ENCODING_RAW: i32 = 0;

/// Zlib: the translated pixels deflated through a per-session stream.
pub const ENCODING_ZLIB: i32 = 6;

/// Tight: JPEG-compressed rectangle behind a compact-length header.
pub const ENCODING_TIGHT: i32 = 7;

/// TightPng: Tight framing with a PNG payload instead of JPEG.
pub const ENCODING_TIGHTPNG: i32 = -260;

// Security types

/// Security type: None (no authentication).
pub const SECURITY_TYPE_NONE: u8 = 1;

/// Security type: VNC Authentication (DES challenge/response).
pub const SECURITY_TYPE_VNC_AUTH: u8 = 2;

/// Security result: handshake succeeded.
pub const SECURITY_RESULT_OK: u32 = 0;

/// Security result: handshake failed.
pub const SECURITY_RESULT_FAILED: u32 = 1;

/// The pixel layout negotiated with a client.
///
/// Flags are carried as raw wire bytes (`0`/`1`) so the struct round-trips
/// the 16-byte PIXEL_FORMAT block without interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelFormat {
    /// Number of bits per pixel. 8, 16, or 32 on the wire.
    pub bits_per_pixel: u8,
    /// Colour depth in bits.
    pub depth: u8,
    /// Non-zero when multi-byte pixels are big-endian.
    pub big_endian_flag: u8,
    /// Non-zero for true colour; zero means colour-mapped.
    pub true_colour_flag: u8,
    /// Maximum red value.
    pub red_max: u16,
    /// Maximum green value.
    pub green_max: u16,
    /// Maximum blue value.
    pub blue_max: u16,
    /// Left shift of the red component within a pixel.
    pub red_shift: u8,
    /// Left shift of the green component within a pixel.
    pub green_shift: u8,
    /// Left shift of the blue component within a pixel.
    pub blue_shift: u8,
}

impl PixelFormat {
    /// The server default: 16 bpp RGB565, little-endian, true colour.
    #[must_use]
    pub fn rgb565() -> Self {
        Self {
            bits_per_pixel: 16,
            depth: 16,
            big_endian_flag: 0,
            true_colour_flag: 1,
            red_max: 0x1f,
            green_max: 0x3f,
            blue_max: 0x1f,
            red_shift: 11,
            green_shift: 5,
            blue_shift: 0,
        }
    }

    /// 32 bpp RGBX, little-endian, true colour.
    #[must_use]
    pub fn rgbx32() -> Self {
        Self {
            bits_per_pixel: 32,
            depth: 24,
            big_endian_flag: 0,
            true_colour_flag: 1,
            red_max: 255,
            green_max: 255,
            blue_max: 255,
            red_shift: 0,
            green_shift: 8,
            blue_shift: 16,
        }
    }

    /// Bytes occupied by one pixel in this format.
    #[must_use]
    pub fn bytes_per_pixel(&self) -> usize {
        (self.bits_per_pixel / 8) as usize
    }

    /// Serializes the 16-byte PIXEL_FORMAT block (including 3 padding bytes).
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u8(self.bits_per_pixel);
        buf.put_u8(self.depth);
        buf.put_u8(self.big_endian_flag);
        buf.put_u8(self.true_colour_flag);
        buf.put_u16(self.red_max);
        buf.put_u16(self.green_max);
        buf.put_u16(self.blue_max);
        buf.put_u8(self.red_shift);
        buf.put_u8(self.green_shift);
        buf.put_u8(self.blue_shift);
        buf.put_bytes(0, 3); // padding
    }

    /// Parses a 16-byte PIXEL_FORMAT block.
    ///
    /// # Errors
    ///
    /// Returns `io::ErrorKind::UnexpectedEof` if fewer than 16 bytes remain.
    pub fn from_bytes(buf: &mut BytesMut) -> io::Result<Self> {
        if buf.len() < 16 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Not enough bytes for PixelFormat",
            ));
        }

        let pf = Self {
            bits_per_pixel: buf.get_u8(),
            depth: buf.get_u8(),
            big_endian_flag: buf.get_u8(),
            true_colour_flag: buf.get_u8(),
            red_max: buf.get_u16(),
            green_max: buf.get_u16(),
            blue_max: buf.get_u16(),
            red_shift: buf.get_u8(),
            green_shift: buf.get_u8(),
            blue_shift: buf.get_u8(),
        };
        buf.advance(3);
        Ok(pf)
    }
}

impl Default for PixelFormat {
    fn default() -> Self {
        Self::rgb565()
    }
}

/// The `ServerInit` message concluding the handshake.
#[derive(Debug, Clone)]
pub struct ServerInit {
    /// Framebuffer width in pixels.
    pub framebuffer_width: u16,
    /// Framebuffer height in pixels.
    pub framebuffer_height: u16,
    /// The server's native pixel format.
    pub pixel_format: PixelFormat,
    /// Desktop name shown in the client's title bar.
    pub name: String,
}

impl ServerInit {
    /// Serializes width, height, pixel format, and the length-prefixed name.
    #[allow(clippy::cast_possible_truncation)] // name length is bounded by u32 per the protocol
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u16(self.framebuffer_width);
        buf.put_u16(self.framebuffer_height);
        self.pixel_format.write_to(buf);

        let name_bytes = self.name.as_bytes();
        buf.put_u32(name_bytes.len() as u32);
        buf.put_slice(name_bytes);
    }
}

/// Rectangle header inside a framebuffer update message.
#[derive(Debug, Clone)]
pub struct Rectangle {
    /// X coordinate of the top-left corner.
    pub x: u16,
    /// Y coordinate of the top-left corner.
    pub y: u16,
    /// Width in pixels.
    pub width: u16,
    /// Height in pixels.
    pub height: u16,
    /// Encoding code of the pixel data that follows.
    pub encoding: i32,
}

impl Rectangle {
    /// Writes the 12-byte rectangle header.
    pub fn write_header(&self, buf: &mut BytesMut) {
        buf.put_u16(self.x);
        buf.put_u16(self.y);
        buf.put_u16(self.width);
        buf.put_u16(self.height);
        buf.put_i32(self.encoding);
    }
}

/// A client's request for a framebuffer update.
#[derive(Debug, Clone, Copy)]
pub struct FrameBufferUpdateRequest {
    /// When true, the client only needs changes since its last update.
    pub incremental: bool,
    /// X coordinate of the requested region.
    pub x: u16,
    /// Y coordinate of the requested region.
    pub y: u16,
    /// Width of the requested region.
    pub width: u16,
    /// Height of the requested region.
    pub height: u16,
}

/// A key press or release.
#[derive(Debug, Clone, Copy)]
pub struct KeyEvent {
    /// True on press, false on release.
    pub down: bool,
    /// X11-style keysym.
    pub keysym: u32,
}

/// A pointer move or button change.
///
/// Button bits 0..2 are left/middle/right; bits 3..6 are scroll
/// up/down/left/right.
#[derive(Debug, Clone, Copy)]
pub struct PointerEvent {
    /// Currently pressed buttons.
    pub button_mask: u8,
    /// X coordinate in remote (session) space.
    pub x: u16,
    /// Y coordinate in remote (session) space.
    pub y: u16,
}

/// Clipboard bytes sent by the client. Treated as Latin-1 on ingress.
#[derive(Debug, Clone)]
pub struct ClientCutText {
    /// The raw clipboard bytes.
    pub text: Vec<u8>,
}
