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

//! Host input injection.
//!
//! The event pipelines drive everything through [`InputBackend`]; OS-specific
//! actuators (compositor portals, uinput, platform APIs) implement it outside
//! this crate. Calls are best-effort and fire-and-forget: a lost click is
//! recoverable, a stalled pipeline is not.

/// A physical mouse button, mapped from pointer-event mask bits 0..2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    /// Bit 0.
    Left,
    /// Bit 1.
    Middle,
    /// Bit 2.
    Right,
}

/// Injects remote input into the host.
pub trait InputBackend: Send + Sync {
    /// Moves the pointer to absolute host coordinates.
    fn move_to(&self, x: i32, y: i32);

    /// Presses a mouse button.
    fn mouse_down(&self, button: MouseButton);

    /// Releases a mouse button.
    fn mouse_up(&self, button: MouseButton);

    /// Scrolls one tick. Positive `dy` is up, positive `dx` is right.
    fn scroll(&self, dx: i32, dy: i32);

    /// Presses the key for an X11 keysym.
    fn key_down(&self, keysym: u32);

    /// Releases the key for an X11 keysym.
    fn key_up(&self, keysym: u32);

    /// Replaces the host clipboard contents.
    fn write_clipboard(&self, text: &str);

    /// Current host screen size, used to rescale pointer coordinates.
    fn screen_size(&self) -> (u16, u16);
}

/// Backend that logs every call at debug level and injects nothing.
///
/// Useful for demos, view-only servers, and tests.
pub struct NullBackend {
    width: u16,
    height: u16,
}

impl NullBackend {
    /// Creates a no-op backend reporting the given screen size.
    #[must_use]
    pub fn new(width: u16, height: u16) -> Self {
        Self { width, height }
    }
}

impl InputBackend for NullBackend {
    fn move_to(&self, x: i32, y: i32) {
        log::debug!("input: move to ({x}, {y})");
    }

    fn mouse_down(&self, button: MouseButton) {
        log::debug!("input: {button:?} down");
    }

    fn mouse_up(&self, button: MouseButton) {
        log::debug!("input: {button:?} up");
    }

    fn scroll(&self, dx: i32, dy: i32) {
        log::debug!("input: scroll ({dx}, {dy})");
    }

    fn key_down(&self, keysym: u32) {
        log::debug!("input: key 0x{keysym:x} down");
    }

    fn key_up(&self, keysym: u32) {
        log::debug!("input: key 0x{keysym:x} up");
    }

    fn write_clipboard(&self, text: &str) {
        log::debug!("input: clipboard set ({} chars)", text.chars().count());
    }

    fn screen_size(&self) -> (u16, u16) {
        (self.width, self.height)
    }
}
