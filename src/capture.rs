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

//! Frame sources and the captured-frame data model.
//!
//! A [`FrameSource`] produces tightly-packed RGBA frames at its own pace and
//! publishes them through a latest-wins channel; the display side always
//! observes the newest frame and nothing queues up behind a slow client.
//!
//! Frames are recycled through a two-slot pool. The capture side owns both
//! buffers and alternates between them; a slot is rewritten only once no
//! reference to it remains in flight, so the display side can hold at most
//! one frame while the next is being filled.

use crate::error::{Result, ServerError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Interval between frames of the built-in test-pattern source (~5 fps).
const TEST_PATTERN_INTERVAL: Duration = Duration::from_millis(200);

/// A captured RGBA image. 4 bytes per pixel, row-major, stride = width * 4.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Width in pixels.
    pub width: u16,
    /// Height in pixels.
    pub height: u16,
    /// Pixel bytes, `stride * height` long.
    pub pixels: Vec<u8>,
}

impl Frame {
    /// Allocates a zeroed (opaque black) frame.
    #[must_use]
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 4],
        }
    }

    /// Row stride in bytes.
    #[must_use]
    pub fn stride(&self) -> usize {
        self.width as usize * 4
    }

    /// Copies out the given rectangle, clipped to the frame bounds.
    ///
    /// Returns `None` when the intersection is empty. When `Some`, the
    /// rectangle's origin `(x, y)` lies inside the frame and the returned
    /// image holds the clipped width and height.
    #[must_use]
    pub fn crop(&self, x: u16, y: u16, width: u16, height: u16) -> Option<Frame> {
        let x_end = (u32::from(x) + u32::from(width)).min(u32::from(self.width));
        let y_end = (u32::from(y) + u32::from(height)).min(u32::from(self.height));
        if u32::from(x) >= x_end || u32::from(y) >= y_end {
            return None;
        }

        #[allow(clippy::cast_possible_truncation)] // clipped below frame dimensions
        let (out_w, out_h) = ((x_end - u32::from(x)) as u16, (y_end - u32::from(y)) as u16);
        let mut out = Frame::new(out_w, out_h);
        let src_stride = self.stride();
        let dst_stride = out.stride();
        for row in 0..out_h as usize {
            let src_off = (y as usize + row) * src_stride + x as usize * 4;
            let dst_off = row * dst_stride;
            out.pixels[dst_off..dst_off + dst_stride]
                .copy_from_slice(&self.pixels[src_off..src_off + dst_stride]);
        }
        Some(out)
    }
}

/// Publishing side of a frame channel, owning the two recycled buffers.
pub struct FrameSender {
    tx: watch::Sender<Option<Arc<Frame>>>,
    slots: [Arc<Frame>; 2],
    cursor: usize,
}

impl FrameSender {
    /// Fills a recycled buffer via `fill` and publishes it, superseding any
    /// previously published frame.
    ///
    /// Returns `false` without calling `fill` when both buffers still have
    /// references in flight; the caller should skip this frame and retry on
    /// its next tick.
    pub fn publish_with(&mut self, fill: impl FnOnce(&mut Frame)) -> bool {
        for _ in 0..self.slots.len() {
            self.cursor = (self.cursor + 1) % self.slots.len();
            if let Some(frame) = Arc::get_mut(&mut self.slots[self.cursor]) {
                fill(frame);
                self.tx.send_replace(Some(self.slots[self.cursor].clone()));
                return true;
            }
        }
        false
    }
}

/// Receiving side of a frame channel.
#[derive(Clone)]
pub struct FrameReceiver {
    rx: watch::Receiver<Option<Arc<Frame>>>,
}

impl FrameReceiver {
    /// The most recent frame, waiting for the first one if none has been
    /// published yet. Resolves to `None` once the source is closed, even
    /// mid-wait.
    pub async fn latest(&mut self) -> Option<Arc<Frame>> {
        loop {
            if self.rx.has_changed().is_err() {
                return None;
            }
            if let Some(frame) = self.rx.borrow_and_update().as_ref() {
                return Some(frame.clone());
            }
            self.rx.changed().await.ok()?;
        }
    }
}

/// Creates a frame channel with two recycled buffers of the given size.
#[must_use]
pub fn frame_channel(width: u16, height: u16) -> (FrameSender, FrameReceiver) {
    let (tx, rx) = watch::channel(None);
    (
        FrameSender {
            tx,
            slots: [Arc::new(Frame::new(width, height)), Arc::new(Frame::new(width, height))],
            cursor: 0,
        },
        FrameReceiver { rx },
    )
}

/// A source of captured screen frames.
///
/// Implementations run their own capture loop and publish into the returned
/// receiver. Dropping the publishing side (or `close`) unblocks any pending
/// [`FrameReceiver::latest`] call with `None`.
pub trait FrameSource: Send + Sync {
    /// Starts capturing at the given dimensions.
    fn start(&mut self, width: u16, height: u16) -> Result<FrameReceiver>;

    /// Stops the capture loop and releases the frame buffers.
    fn close(&mut self);
}

/// Synthetic frame source: a moving gradient at ~5 fps.
///
/// Stands in for OS capture so a server is runnable end-to-end; real
/// providers (compositor, gstreamer) live outside this crate behind
/// [`FrameSource`].
#[derive(Default)]
pub struct TestPattern {
    stop: Option<watch::Sender<bool>>,
}

impl TestPattern {
    /// Creates an idle test-pattern source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrameSource for TestPattern {
    fn start(&mut self, width: u16, height: u16) -> Result<FrameReceiver> {
        if width == 0 || height == 0 {
            return Err(ServerError::Capture(format!(
                "invalid capture dimensions {width}x{height}"
            )));
        }
        let (mut sender, receiver) = frame_channel(width, height);
        let (stop_tx, mut stop_rx) = watch::channel(false);
        self.stop = Some(stop_tx);

        tokio::spawn(async move {
            let mut tick = tokio::time::interval_at(
                tokio::time::Instant::now() + TEST_PATTERN_INTERVAL,
                TEST_PATTERN_INTERVAL,
            );
            let mut seq: u32 = 0;
            loop {
                if !sender.publish_with(|frame| render_pattern(frame, seq)) {
                    log::debug!("both frame buffers in flight, skipping frame");
                }
                seq = seq.wrapping_add(1);
                tokio::select! {
                    _ = tick.tick() => {}
                    _ = stop_rx.changed() => {
                        log::debug!("test pattern source stopping");
                        return;
                    }
                }
            }
        });

        Ok(receiver)
    }

    fn close(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(true);
        }
    }
}

/// Gradient with a sweeping vertical bar so consecutive frames differ.
fn render_pattern(frame: &mut Frame, seq: u32) {
    let (w, h) = (frame.width as usize, frame.height as usize);
    let bar = (seq as usize * 8) % w.max(1);
    for y in 0..h {
        for x in 0..w {
            let off = (y * w + x) * 4;
            frame.pixels[off] = ((x * 255) / w.max(1)) as u8;
            frame.pixels[off + 1] = ((y * 255) / h.max(1)) as u8;
            frame.pixels[off + 2] = if x.abs_diff(bar) < 4 { 255 } else { 64 };
            frame.pixels[off + 3] = 255;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crop_clips_to_bounds() {
        let mut frame = Frame::new(8, 4);
        for (i, px) in frame.pixels.chunks_exact_mut(4).enumerate() {
            px[0] = i as u8;
        }

        let cropped = frame.crop(6, 2, 10, 10).unwrap();
        assert_eq!((cropped.width, cropped.height), (2, 2));
        // Row 2 starts at pixel 16; x offset 6.
        assert_eq!(cropped.pixels[0], 22);
        assert_eq!(cropped.pixels[4], 23);
        assert_eq!(cropped.pixels[8], 30);
    }

    #[test]
    fn crop_outside_is_empty() {
        let frame = Frame::new(8, 4);
        assert!(frame.crop(8, 0, 4, 4).is_none());
        assert!(frame.crop(0, 4, 4, 4).is_none());
        assert!(frame.crop(0, 0, 0, 4).is_none());
    }

    #[tokio::test]
    async fn channel_is_latest_wins() {
        let (mut tx, mut rx) = frame_channel(2, 2);
        assert!(tx.publish_with(|f| f.pixels[0] = 1));
        assert!(tx.publish_with(|f| f.pixels[0] = 2));
        let frame = rx.latest().await.unwrap();
        assert_eq!(frame.pixels[0], 2);
    }

    #[tokio::test]
    async fn publish_skips_when_both_buffers_held() {
        let (mut tx, mut rx) = frame_channel(2, 2);
        assert!(tx.publish_with(|f| f.pixels[0] = 1));
        let held = rx.latest().await.unwrap(); // display holds slot A
        assert!(tx.publish_with(|f| f.pixels[0] = 2)); // slot B published, held by channel
        assert!(!tx.publish_with(|f| f.pixels[0] = 3)); // nothing free
        drop(held);
        assert!(tx.publish_with(|f| f.pixels[0] = 3));
        assert_eq!(rx.latest().await.unwrap().pixels[0], 3);
    }

    #[tokio::test]
    async fn latest_returns_none_after_close() {
        let (tx, mut rx) = frame_channel(2, 2);
        drop(tx);
        assert!(rx.latest().await.is_none());
    }
}
