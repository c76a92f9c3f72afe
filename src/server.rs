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

//! TCP front end: accepts connections and runs one session engine per
//! client.

use crate::capture::FrameSource;
use crate::conn::{self, ConnOptions};
use crate::error::Result;
use crate::input::InputBackend;
use std::sync::Arc;
use tokio::net::{TcpListener, ToSocketAddrs};

/// Builds a fresh frame source for each accepted connection.
pub type SourceFactory = Box<dyn Fn() -> Box<dyn FrameSource> + Send + Sync>;

/// Server-wide configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Session width. Zero means "use the input backend's screen width".
    pub width: u16,
    /// Session height. Zero means "use the input backend's screen height".
    pub height: u16,
    /// Desktop name announced to clients.
    pub desktop_name: String,
    /// When set, clients must pass VNC Authentication.
    pub password: Option<String>,
    /// JPEG quality for Tight encoding (1..=100, 0 = default).
    pub jpeg_quality: u8,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            desktop_name: "vncmirror".to_string(),
            password: None,
            jpeg_quality: 0,
        }
    }
}

/// The VNC server: listener plus the capture and input plumbing shared by
/// all sessions.
pub struct VncServer {
    config: ServerConfig,
    source_factory: SourceFactory,
    input: Arc<dyn InputBackend>,
}

impl VncServer {
    /// Creates a server from its configuration and backends.
    #[must_use]
    pub fn new(config: ServerConfig, source_factory: SourceFactory, input: Arc<dyn InputBackend>) -> Self {
        Self {
            config,
            source_factory,
            input,
        }
    }

    /// Accepts clients forever, one detached session task per connection.
    ///
    /// # Errors
    ///
    /// Returns an error if binding or accepting fails; per-session errors
    /// are logged and do not stop the listener.
    pub async fn listen<A: ToSocketAddrs>(&self, addr: A) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        log::info!("listening on {}", listener.local_addr()?);

        loop {
            let (stream, peer) = listener.accept().await?;
            log::info!("client connected from {peer}");

            // Frame delivery must not sit behind Nagle batching.
            if let Err(err) = stream.set_nodelay(true) {
                log::warn!("could not disable nagle for {peer}: {err}");
            }

            let (width, height) = self.dimensions();
            let opts = ConnOptions {
                width,
                height,
                desktop_name: self.config.desktop_name.clone(),
                password: self.config.password.clone(),
                jpeg_quality: self.config.jpeg_quality,
                source: (self.source_factory)(),
                input: self.input.clone(),
            };

            tokio::spawn(async move {
                match conn::serve_stream(stream, opts).await {
                    Ok(()) => log::info!("session for {peer} ended"),
                    Err(err) => log::warn!("session for {peer} failed: {err}"),
                }
            });
        }
    }

    /// Configured dimensions, falling back to the host screen size.
    fn dimensions(&self) -> (u16, u16) {
        match (self.config.width, self.config.height) {
            (0, _) | (_, 0) => self.input.screen_size(),
            dims => dims,
        }
    }
}
