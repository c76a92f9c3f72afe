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

//! Per-connection display session state and frame pushing.
//!
//! A [`DisplaySession`] owns everything one client sees: the negotiated
//! pixel format, the active encoder, and the four bounded event queues its
//! pipelines consume. The message demultiplexer is the only writer of the
//! format and encoder; the framebuffer pipeline reads them per push, each
//! behind its own lock so a format is never observed torn.

use crate::buffer::OutputBuffer;
use crate::capture::{Frame, FrameReceiver};
use crate::encoding::{self, Encoding};
use crate::input::InputBackend;
use crate::pipelines;
use crate::protocol::{
    ClientCutText, FrameBufferUpdateRequest, KeyEvent, PixelFormat, PointerEvent, Rectangle,
    SERVER_MSG_FRAMEBUFFER_UPDATE,
};
use bytes::{BufMut, BytesMut};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};

/// Capacity of each inbound event queue.
const EVENT_QUEUE_DEPTH: usize = 128;

/// Session state shared between the demultiplexer and the pipelines.
pub(crate) struct SessionState {
    pub(crate) width: u16,
    pub(crate) height: u16,
    jpeg_quality: u8,
    pixel_format: RwLock<PixelFormat>,
    encoder: RwLock<Arc<dyn Encoding>>,
    pseudo_encodings: std::sync::Mutex<Vec<i32>>,
    pub(crate) out: OutputBuffer,
}

impl SessionState {
    /// Encodes `frame` as a single-rectangle framebuffer update at `(x, y)`
    /// and queues it latest-wins.
    ///
    /// Dropped whole when the writer is closed or the encoder fails; a
    /// truncated update must never reach the wire.
    pub(crate) async fn push_image(&self, frame: &Frame, x: u16, y: u16) {
        if self.out.is_closed() {
            return;
        }

        let format = self.pixel_format.read().await.clone();
        if format.true_colour_flag == 0 {
            log::error!("only true-colour formats are supported, dropping frame");
            return;
        }
        let encoder = self.encoder.read().await.clone();

        // Header + rectangle header + a rough payload guess (16 bpp raw).
        let mut buf =
            BytesMut::with_capacity(16 + frame.width as usize * frame.height as usize * 2);
        buf.put_u8(SERVER_MSG_FRAMEBUFFER_UPDATE);
        buf.put_u8(0); // padding
        buf.put_u16(1); // one rectangle per update

        Rectangle {
            x,
            y,
            width: frame.width,
            height: frame.height,
            encoding: encoder.code(),
        }
        .write_header(&mut buf);

        if let Err(err) = encoder.encode(&mut buf, &format, frame) {
            log::debug!("encoder failed, dropping frame: {err}");
            return;
        }

        self.out.dispatch_latest(buf.freeze());
    }
}

/// One client's display session: negotiated state, the event queues its
/// pipelines consume, and the shutdown signal that stops them.
pub struct DisplaySession {
    state: Arc<SessionState>,
    fb_tx: mpsc::Sender<FrameBufferUpdateRequest>,
    key_tx: mpsc::Sender<KeyEvent>,
    ptr_tx: mpsc::Sender<PointerEvent>,
    cut_tx: mpsc::Sender<ClientCutText>,
    done: watch::Sender<bool>,
}

impl DisplaySession {
    /// Creates the session and spawns its four event pipelines.
    #[must_use]
    pub fn start(
        width: u16,
        height: u16,
        jpeg_quality: u8,
        out: OutputBuffer,
        frames: FrameReceiver,
        input: Arc<dyn InputBackend>,
    ) -> Self {
        let state = Arc::new(SessionState {
            width,
            height,
            jpeg_quality,
            pixel_format: RwLock::new(PixelFormat::default()),
            encoder: RwLock::new(encoding::select_encoding(&[], jpeg_quality)),
            pseudo_encodings: std::sync::Mutex::new(Vec::new()),
            out,
        });

        let (fb_tx, fb_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (key_tx, key_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (ptr_tx, ptr_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (cut_tx, cut_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (done, done_rx) = watch::channel(false);

        pipelines::spawn(
            state.clone(),
            pipelines::Queues {
                fb: fb_rx,
                key: key_rx,
                pointer: ptr_rx,
                cut_text: cut_rx,
            },
            frames,
            input,
            done_rx,
        );

        Self {
            state,
            fb_tx,
            key_tx,
            ptr_tx,
            cut_tx,
            done,
        }
    }

    /// Session dimensions as announced in `ServerInit`.
    #[must_use]
    pub fn dimensions(&self) -> (u16, u16) {
        (self.state.width, self.state.height)
    }

    /// Applies a client's `SetPixelFormat`, normalizing to what the encode
    /// path supports.
    ///
    /// Colour-mapped requests keep the server default; unsupported depths
    /// reset to it; 16 bpp is forced to 5-6-5 little-endian; 32 bpp is
    /// accepted as sent.
    pub async fn set_pixel_format(&self, pf: PixelFormat) {
        if pf.true_colour_flag == 0 {
            log::warn!("client asked for colour-mapped pixels; keeping 16bpp 5-6-5");
            return;
        }

        let normalized = match pf.bits_per_pixel {
            16 => {
                let mut pf = pf;
                pf.depth = 16;
                pf.big_endian_flag = 0;
                pf.red_max = 0x1f;
                pf.green_max = 0x3f;
                pf.blue_max = 0x1f;
                pf.red_shift = 11;
                pf.green_shift = 5;
                pf.blue_shift = 0;
                pf
            }
            32 => pf,
            bpp => {
                log::warn!("unsupported {bpp} bpp requested; using 16bpp 5-6-5");
                PixelFormat::rgb565()
            }
        };

        log::info!(
            "client pixel format: {}bpp, {} endian",
            normalized.bits_per_pixel,
            if normalized.big_endian_flag != 0 { "big" } else { "little" },
        );
        *self.state.pixel_format.write().await = normalized;
    }

    /// Applies a client's `SetEncodings`: the first supported code in the
    /// regular list becomes the active encoder, Raw when none match.
    /// Pseudo-encodings are remembered but drive nothing yet.
    pub async fn set_encodings(&self, regular: Vec<i32>, pseudo: Vec<i32>) {
        let encoder = encoding::select_encoding(&regular, self.state.jpeg_quality);
        log::info!(
            "client encodings {regular:?} (pseudo {pseudo:?}), using {}",
            encoder.code()
        );
        *self.state.encoder.write().await = encoder;
        if let Ok(mut slot) = self.state.pseudo_encodings.lock() {
            *slot = pseudo;
        }
    }

    /// The currently negotiated pixel format.
    pub async fn pixel_format(&self) -> PixelFormat {
        self.state.pixel_format.read().await.clone()
    }

    /// The active encoder's code.
    pub async fn encoding_code(&self) -> i32 {
        self.state.encoder.read().await.code()
    }

    /// Queues a framebuffer update request for the framebuffer pipeline.
    /// Blocks while the queue is full.
    pub async fn dispatch_frame_buffer_update(&self, req: FrameBufferUpdateRequest) {
        let _ = self.fb_tx.send(req).await;
    }

    /// Queues a key event for the key pipeline. Blocks while full.
    pub async fn dispatch_key_event(&self, ev: KeyEvent) {
        let _ = self.key_tx.send(ev).await;
    }

    /// Queues a pointer event for the pointer pipeline. Blocks while full.
    pub async fn dispatch_pointer_event(&self, ev: PointerEvent) {
        let _ = self.ptr_tx.send(ev).await;
    }

    /// Queues clipboard bytes for the cut-text pipeline. Blocks while full.
    pub async fn dispatch_client_cut_text(&self, ev: ClientCutText) {
        let _ = self.cut_tx.send(ev).await;
    }

    /// Signals all pipelines to stop. The event queues close when the
    /// session is dropped.
    pub fn close(&self) {
        let _ = self.done.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame_channel;
    use crate::input::NullBackend;
    use crate::protocol::{ENCODING_RAW, ENCODING_TIGHT, ENCODING_ZLIB};

    fn session() -> DisplaySession {
        let (_client, server) = tokio::io::duplex(64 * 1024);
        let out = OutputBuffer::new(server);
        let (_tx, rx) = frame_channel(8, 8);
        DisplaySession::start(8, 8, 75, out, rx, Arc::new(NullBackend::new(8, 8)))
    }

    #[tokio::test]
    async fn colour_mapped_request_keeps_default() {
        let s = session();
        let mut pf = PixelFormat::rgbx32();
        pf.true_colour_flag = 0;
        pf.bits_per_pixel = 8;
        s.set_pixel_format(pf).await;
        assert_eq!(s.pixel_format().await, PixelFormat::rgb565());
    }

    #[tokio::test]
    async fn sixteen_bpp_is_forced_to_565() {
        let s = session();
        let pf = PixelFormat {
            bits_per_pixel: 16,
            depth: 15,
            big_endian_flag: 1,
            true_colour_flag: 1,
            red_max: 0x1f,
            green_max: 0x1f,
            blue_max: 0x1f,
            red_shift: 10,
            green_shift: 5,
            blue_shift: 0,
        };
        s.set_pixel_format(pf).await;
        assert_eq!(s.pixel_format().await, PixelFormat::rgb565());
    }

    #[tokio::test]
    async fn thirty_two_bpp_is_accepted_as_sent() {
        let s = session();
        let mut pf = PixelFormat::rgbx32();
        pf.red_shift = 16;
        pf.blue_shift = 0;
        s.set_pixel_format(pf.clone()).await;
        assert_eq!(s.pixel_format().await, pf);
    }

    #[tokio::test]
    async fn unsupported_bpp_resets_to_default() {
        let s = session();
        let mut pf = PixelFormat::rgbx32();
        pf.bits_per_pixel = 8;
        s.set_pixel_format(pf).await;
        assert_eq!(s.pixel_format().await, PixelFormat::rgb565());
    }

    #[tokio::test]
    async fn encoder_follows_client_preference() {
        let s = session();
        assert_eq!(s.encoding_code().await, ENCODING_RAW);

        s.set_encodings(vec![ENCODING_TIGHT, ENCODING_RAW], vec![]).await;
        assert_eq!(s.encoding_code().await, ENCODING_TIGHT);

        s.set_encodings(vec![42, ENCODING_ZLIB], vec![-239]).await;
        assert_eq!(s.encoding_code().await, ENCODING_ZLIB);

        s.set_encodings(vec![42], vec![]).await;
        assert_eq!(s.encoding_code().await, ENCODING_RAW);
    }
}
