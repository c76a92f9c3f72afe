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

//! The four per-session event pipelines.
//!
//! Each pipeline is a single task consuming one bounded queue, terminated by
//! the session's done signal or by its queue closing. All mutable state a
//! pipeline needs (down keys, last button mask, last frame hash, cached
//! screen size) lives in that task alone.
//!
//! - **Key**: tracks the down-key set, forwards press/release transitions,
//!   and releases anything still held when the session ends.
//! - **Pointer**: latest-wins coalescing on an 8 ms tick, host rescaling,
//!   move rate limiting, button edge detection, scroll ticks.
//! - **Framebuffer**: serves explicit update requests immediately and runs a
//!   200 ms keepalive that pushes only when a sparse CRC of the latest frame
//!   changes.
//! - **Cut text**: decodes clipboard bytes as Latin-1 and hands them to the
//!   host.

use crate::capture::{Frame, FrameReceiver};
use crate::input::{InputBackend, MouseButton};
use crate::protocol::{ClientCutText, FrameBufferUpdateRequest, KeyEvent, PointerEvent};
use crate::session::SessionState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};

/// Pacing tick of the pointer pipeline.
const POINTER_TICK: Duration = Duration::from_millis(8);

/// Minimum spacing between host pointer moves.
const MIN_MOVE_INTERVAL: Duration = Duration::from_millis(7);

/// How long the cached host screen size stays fresh.
const SCREEN_SIZE_TTL: Duration = Duration::from_secs(2);

/// Keepalive tick of the framebuffer pipeline.
const KEEPALIVE_INTERVAL: Duration = Duration::from_millis(200);

/// Sampling step (both axes) of the keepalive frame hash.
const HASH_SAMPLE_STEP: usize = 8;

/// The receiving ends of a session's four event queues.
pub(crate) struct Queues {
    pub(crate) fb: mpsc::Receiver<FrameBufferUpdateRequest>,
    pub(crate) key: mpsc::Receiver<KeyEvent>,
    pub(crate) pointer: mpsc::Receiver<PointerEvent>,
    pub(crate) cut_text: mpsc::Receiver<ClientCutText>,
}

/// Spawns the four pipeline tasks for a session.
pub(crate) fn spawn(
    state: Arc<SessionState>,
    queues: Queues,
    frames: FrameReceiver,
    input: Arc<dyn InputBackend>,
    done: watch::Receiver<bool>,
) {
    let remote = (state.width, state.height);
    tokio::spawn(key_pipeline(queues.key, input.clone(), done.clone()));
    tokio::spawn(pointer_pipeline(queues.pointer, input.clone(), remote, done.clone()));
    tokio::spawn(framebuffer_pipeline(state, queues.fb, frames, done.clone()));
    tokio::spawn(cut_text_pipeline(queues.cut_text, input, done));
}

async fn key_pipeline(
    mut rx: mpsc::Receiver<KeyEvent>,
    input: Arc<dyn InputBackend>,
    mut done: watch::Receiver<bool>,
) {
    // Insertion-ordered; duplicates are never inserted.
    let mut down_keys: Vec<u32> = Vec::new();

    loop {
        tokio::select! {
            _ = done.changed() => break,
            ev = rx.recv() => {
                let Some(ev) = ev else { break };
                log::debug!("key event: 0x{:x} down={}", ev.keysym, ev.down);
                if ev.down {
                    if !down_keys.contains(&ev.keysym) {
                        down_keys.push(ev.keysym);
                        input.key_down(ev.keysym);
                    }
                } else {
                    down_keys.retain(|&k| k != ev.keysym);
                    input.key_up(ev.keysym);
                }
            }
        }
    }

    // Don't leave the host with stuck modifiers.
    for keysym in down_keys {
        input.key_up(keysym);
    }
}

/// Pointer-task state; owned by the pipeline, never shared.
struct PointerTracker {
    last_mask: u8,
    last_pos: Option<(i32, i32)>,
    last_move_at: Option<Instant>,
    screen: (u16, u16),
    screen_checked_at: Option<Instant>,
}

impl PointerTracker {
    fn new() -> Self {
        Self {
            last_mask: 0,
            last_pos: None,
            last_move_at: None,
            screen: (0, 0),
            screen_checked_at: None,
        }
    }
}

async fn pointer_pipeline(
    mut rx: mpsc::Receiver<PointerEvent>,
    input: Arc<dyn InputBackend>,
    remote: (u16, u16),
    mut done: watch::Receiver<bool>,
) {
    let mut tracker = PointerTracker::new();
    let mut pending: Option<PointerEvent> = None;
    // First fire one full period out, like a ticker.
    let mut tick = tokio::time::interval_at(Instant::now() + POINTER_TICK, POINTER_TICK);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = done.changed() => return,
            ev = rx.recv() => {
                match ev {
                    // Overwrite the slot: only the newest event executes.
                    Some(ev) => pending = Some(ev),
                    None => return,
                }
            }
            _ = tick.tick() => {
                if let Some(ev) = pending.take() {
                    serve_pointer_event(&mut tracker, input.as_ref(), remote, ev, Instant::now());
                }
            }
        }
    }
}

fn serve_pointer_event(
    tracker: &mut PointerTracker,
    input: &dyn InputBackend,
    remote: (u16, u16),
    ev: PointerEvent,
    now: Instant,
) {
    let stale = tracker
        .screen_checked_at
        .is_none_or(|at| now.duration_since(at) >= SCREEN_SIZE_TTL);
    if stale {
        tracker.screen = input.screen_size();
        tracker.screen_checked_at = Some(now);
    }

    // Rescale remote coordinates onto the host screen if sizes differ.
    let (mut x, mut y) = (i32::from(ev.x), i32::from(ev.y));
    let (sw, sh) = tracker.screen;
    let (rw, rh) = remote;
    if rw > 0 && rh > 0 && (rw, rh) != (sw, sh) {
        #[allow(clippy::cast_possible_truncation)] // scaled coordinates stay in screen range
        {
            x = (f64::from(ev.x) * f64::from(sw) / f64::from(rw)).round() as i32;
            y = (f64::from(ev.y) * f64::from(sh) / f64::from(rh)).round() as i32;
        }
    }

    let moved = tracker.last_pos != Some((x, y));
    let spaced = tracker
        .last_move_at
        .is_none_or(|at| now.duration_since(at) >= MIN_MOVE_INTERVAL);
    if moved && spaced {
        input.move_to(x, y);
        tracker.last_pos = Some((x, y));
        tracker.last_move_at = Some(now);
    }

    // Buttons 0..2: act on edges only.
    for (bit, button) in [
        (0, MouseButton::Left),
        (1, MouseButton::Middle),
        (2, MouseButton::Right),
    ] {
        let prev = tracker.last_mask >> bit & 1;
        let cur = ev.button_mask >> bit & 1;
        if prev != cur {
            if cur == 1 {
                input.mouse_down(button);
            } else {
                input.mouse_up(button);
            }
        }
    }

    // Scroll bits 3..6: one tick per set bit.
    if ev.button_mask >> 3 & 1 == 1 {
        input.scroll(0, 1); // up
    }
    if ev.button_mask >> 4 & 1 == 1 {
        input.scroll(0, -1); // down
    }
    if ev.button_mask >> 5 & 1 == 1 {
        input.scroll(-1, 0); // left
    }
    if ev.button_mask >> 6 & 1 == 1 {
        input.scroll(1, 0); // right
    }

    tracker.last_mask = ev.button_mask;
}

async fn framebuffer_pipeline(
    state: Arc<SessionState>,
    mut rx: mpsc::Receiver<FrameBufferUpdateRequest>,
    mut frames: FrameReceiver,
    mut done: watch::Receiver<bool>,
) {
    let mut tick = tokio::time::interval_at(Instant::now() + KEEPALIVE_INTERVAL, KEEPALIVE_INTERVAL);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_hash: u32 = 0;

    loop {
        tokio::select! {
            _ = done.changed() => return,
            req = rx.recv() => {
                let Some(req) = req else { return };
                log::debug!("framebuffer update request: {req:?}");
                push_frame(&state, &mut frames, req).await;
            }
            _ = tick.tick() => {
                if state.out.is_closed() {
                    return;
                }
                if state.out.pending() > 0 {
                    // Writer is still busy; don't pile more frames on.
                    continue;
                }
                let Some(frame) = frames.latest().await else { return };
                let hash = sample_hash(&frame);
                if hash != last_hash {
                    last_hash = hash;
                    state.push_image(&frame, 0, 0).await;
                }
            }
        }
    }
}

/// Serves one explicit update request from the latest captured frame.
async fn push_frame(
    state: &SessionState,
    frames: &mut FrameReceiver,
    req: FrameBufferUpdateRequest,
) {
    let Some(frame) = frames.latest().await else { return };
    if req.incremental {
        match frame.crop(req.x, req.y, req.width, req.height) {
            Some(cropped) => state.push_image(&cropped, req.x, req.y).await,
            None => {} // requested region is empty after clipping
        }
    } else {
        state.push_image(&frame, 0, 0).await;
    }
}

/// CRC-32 over every 8th pixel in both axes: cheap, and any sampled change
/// flips it.
fn sample_hash(frame: &Frame) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    let stride = frame.stride();
    let mut y = 0;
    while y < frame.height as usize {
        let mut x = 0;
        while x < frame.width as usize {
            let off = y * stride + x * 4;
            hasher.update(&frame.pixels[off..off + 4]);
            x += HASH_SAMPLE_STEP;
        }
        y += HASH_SAMPLE_STEP;
    }
    hasher.finalize()
}

async fn cut_text_pipeline(
    mut rx: mpsc::Receiver<ClientCutText>,
    input: Arc<dyn InputBackend>,
    mut done: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = done.changed() => return,
            ev = rx.recv() => {
                let Some(ev) = ev else { return };
                log::debug!("cut-text event: {} bytes", ev.text.len());
                input.write_clipboard(&latin1_to_string(&ev.text));
            }
        }
    }
}

/// Clipboard bytes arrive as Latin-1; each byte maps to the code point of
/// the same value.
fn latin1_to_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Move(i32, i32),
        Down(MouseButton),
        Up(MouseButton),
        Scroll(i32, i32),
        KeyDown(u32),
        KeyUp(u32),
        Clipboard(String),
    }

    struct Recorder {
        calls: Mutex<Vec<Call>>,
        screen: (u16, u16),
    }

    impl Recorder {
        fn new(screen: (u16, u16)) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                screen,
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl InputBackend for Recorder {
        fn move_to(&self, x: i32, y: i32) {
            self.record(Call::Move(x, y));
        }
        fn mouse_down(&self, button: MouseButton) {
            self.record(Call::Down(button));
        }
        fn mouse_up(&self, button: MouseButton) {
            self.record(Call::Up(button));
        }
        fn scroll(&self, dx: i32, dy: i32) {
            self.record(Call::Scroll(dx, dy));
        }
        fn key_down(&self, keysym: u32) {
            self.record(Call::KeyDown(keysym));
        }
        fn key_up(&self, keysym: u32) {
            self.record(Call::KeyUp(keysym));
        }
        fn write_clipboard(&self, text: &str) {
            self.record(Call::Clipboard(text.to_owned()));
        }
        fn screen_size(&self) -> (u16, u16) {
            self.screen
        }
    }

    fn ptr(mask: u8, x: u16, y: u16) -> PointerEvent {
        PointerEvent {
            button_mask: mask,
            x,
            y,
        }
    }

    #[tokio::test]
    async fn button_edges_fire_once() {
        let input = Recorder::new((100, 100));
        let mut tracker = PointerTracker::new();
        let now = Instant::now();

        for mask in [0b001, 0b001, 0b011, 0b010, 0b000] {
            serve_pointer_event(&mut tracker, &input, (100, 100), ptr(mask, 5, 5), now);
        }

        let buttons: Vec<Call> = input
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Down(_) | Call::Up(_)))
            .collect();
        assert_eq!(
            buttons,
            vec![
                Call::Down(MouseButton::Left),
                Call::Down(MouseButton::Middle),
                Call::Up(MouseButton::Left),
                Call::Up(MouseButton::Middle),
            ]
        );
    }

    #[tokio::test]
    async fn identical_event_is_a_no_op() {
        let input = Recorder::new((100, 100));
        let mut tracker = PointerTracker::new();
        let now = Instant::now();

        serve_pointer_event(&mut tracker, &input, (100, 100), ptr(0, 5, 5), now);
        let after_first = input.calls().len();
        serve_pointer_event(&mut tracker, &input, (100, 100), ptr(0, 5, 5), now);
        assert_eq!(input.calls().len(), after_first);
    }

    #[tokio::test]
    async fn moves_within_seven_millis_are_suppressed() {
        let input = Recorder::new((100, 100));
        let mut tracker = PointerTracker::new();
        let start = Instant::now();

        serve_pointer_event(&mut tracker, &input, (100, 100), ptr(0, 1, 1), start);
        serve_pointer_event(
            &mut tracker,
            &input,
            (100, 100),
            ptr(0, 2, 2),
            start + Duration::from_millis(3),
        );
        serve_pointer_event(
            &mut tracker,
            &input,
            (100, 100),
            ptr(0, 3, 3),
            start + Duration::from_millis(8),
        );

        let moves: Vec<Call> = input
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Move(..)))
            .collect();
        assert_eq!(moves, vec![Call::Move(1, 1), Call::Move(3, 3)]);
    }

    #[tokio::test]
    async fn coordinates_rescale_to_host_screen() {
        let input = Recorder::new((200, 50));
        let mut tracker = PointerTracker::new();

        serve_pointer_event(
            &mut tracker,
            &input,
            (100, 100),
            ptr(0, 50, 25),
            Instant::now(),
        );
        assert_eq!(input.calls(), vec![Call::Move(100, 13)]);
    }

    #[tokio::test]
    async fn scroll_bits_emit_axis_ticks() {
        let input = Recorder::new((100, 100));
        let mut tracker = PointerTracker::new();
        let now = Instant::now();

        serve_pointer_event(&mut tracker, &input, (100, 100), ptr(0b0001_1000, 5, 5), now);
        let scrolls: Vec<Call> = input
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Scroll(..)))
            .collect();
        assert_eq!(scrolls, vec![Call::Scroll(0, 1), Call::Scroll(0, -1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn pointer_events_coalesce_per_tick() {
        let input = Arc::new(Recorder::new((100, 100)));
        let (tx, rx) = mpsc::channel(128);
        let (_done_tx, done_rx) = watch::channel(false);
        let task = tokio::spawn(pointer_pipeline(
            rx,
            input.clone() as Arc<dyn InputBackend>,
            (100, 100),
            done_rx,
        ));

        for x in 0..50u16 {
            tx.send(ptr(0, x, 0)).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        let moves: Vec<Call> = input
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Move(..)))
            .collect();
        assert_eq!(moves, vec![Call::Move(49, 0)]);

        drop(tx);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn key_transitions_dedupe_and_release_on_exit() {
        let input = Arc::new(Recorder::new((100, 100)));
        let (tx, rx) = mpsc::channel(128);
        let (_done_tx, done_rx) = watch::channel(false);
        let task = tokio::spawn(key_pipeline(
            rx,
            input.clone() as Arc<dyn InputBackend>,
            done_rx,
        ));

        let down = |k| KeyEvent { down: true, keysym: k };
        let up = |k| KeyEvent { down: false, keysym: k };
        for ev in [down(0x61), down(0x61), down(0xffe1), up(0x61)] {
            tx.send(ev).await.unwrap();
        }
        drop(tx);
        task.await.unwrap();

        assert_eq!(
            input.calls(),
            vec![
                Call::KeyDown(0x61),
                Call::KeyDown(0xffe1),
                Call::KeyUp(0x61),
                // Still held at shutdown, released by the pipeline.
                Call::KeyUp(0xffe1),
            ]
        );
    }

    #[tokio::test]
    async fn cut_text_is_decoded_as_latin1() {
        let input = Arc::new(Recorder::new((100, 100)));
        let (tx, rx) = mpsc::channel(128);
        let (_done_tx, done_rx) = watch::channel(false);
        let task = tokio::spawn(cut_text_pipeline(
            rx,
            input.clone() as Arc<dyn InputBackend>,
            done_rx,
        ));

        tx.send(ClientCutText {
            text: vec![0x41, 0xE9, 0x00],
        })
        .await
        .unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(input.calls(), vec![Call::Clipboard("A\u{e9}\u{0}".into())]);
    }

    #[test]
    fn sample_hash_tracks_sampled_pixels_only() {
        let mut frame = Frame::new(32, 32);
        let base = sample_hash(&frame);

        // (1, 1) is never sampled with step 8.
        let stride = frame.stride();
        frame.pixels[stride + 4] = 0xff;
        assert_eq!(sample_hash(&frame), base);

        // (8, 8) is sampled.
        frame.pixels[8 * stride + 8 * 4] = 0xff;
        assert_ne!(sample_hash(&frame), base);
    }

    #[test]
    fn latin1_maps_bytes_to_code_points() {
        assert_eq!(latin1_to_string(&[0x41, 0xE9, 0x00]), "A\u{e9}\u{0}");
    }
}
