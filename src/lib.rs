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

//! # vncmirror
//!
//! A screen-mirroring RFB (VNC) server. It accepts TCP connections from
//! standard VNC clients, streams the locally captured screen as framebuffer
//! updates in the client's negotiated encoding, and relays keyboard, pointer,
//! and clipboard input back into the host.
//!
//! ## Features
//!
//! - **Encodings**: Raw, Tight (JPEG), TightPng, Zlib; the first supported
//!   code in the client's list wins
//! - **Pixel formats**: 16 bpp 5-6-5 (server default) and 32 bpp true
//!   colour, either endianness
//! - **Latest-wins delivery**: a slow client always converges on the newest
//!   frame; stale updates are dropped, never queued
//! - **Input relay**: coalesced pointer moves, button edge detection,
//!   scroll ticks, key transition tracking, Latin-1 clipboard ingress
//! - **Pluggable edges**: screen capture behind [`FrameSource`], host input
//!   behind [`InputBackend`]
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use vncmirror::{FrameSource, NullBackend, ServerConfig, TestPattern, VncServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = VncServer::new(
//!         ServerConfig {
//!             width: 1280,
//!             height: 720,
//!             ..ServerConfig::default()
//!         },
//!         Box::new(|| Box::new(TestPattern::new()) as Box<dyn FrameSource>),
//!         Arc::new(NullBackend::new(1280, 720)),
//!     );
//!     server.listen("0.0.0.0:5900").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! Each connection runs its own session engine:
//!
//! ```text
//! frame source ─▶ frame slot ─▶ framebuffer pipeline ─▶ encoder ─▶ write queue ─▶ socket
//!
//! socket ─▶ demultiplexer ─▶ key / pointer / cut-text queues ─▶ pipelines ─▶ input backend
//! ```
//!
//! The write queue has a single writer task that batches and flushes on a
//! short tick; framebuffer updates are dispatched latest-wins so backpressure
//! discards stale frames instead of stalling capture.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod capture;
pub mod encoding;
pub mod error;
pub mod input;
pub mod protocol;
pub mod server;

// Internal modules
mod auth;
mod conn;
mod pipelines;
mod session;
mod translate;

// Re-exports
pub use capture::{Frame, FrameReceiver, FrameSource, TestPattern};
pub use conn::{serve_stream, ConnOptions};
pub use encoding::Encoding;
pub use error::{Result, ServerError};
pub use input::{InputBackend, MouseButton, NullBackend};
pub use protocol::PixelFormat;
pub use server::{ServerConfig, SourceFactory, VncServer};
pub use session::DisplaySession;

/// Default VNC port.
pub const DEFAULT_PORT: u16 = 5900;
