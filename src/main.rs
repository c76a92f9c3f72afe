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

//! Demo server binary: serves the built-in test pattern and logs injected
//! input. Real deployments plug platform capture and input backends into
//! the library instead.

use clap::Parser;
use std::sync::Arc;
use vncmirror::{NullBackend, ServerConfig, TestPattern, VncServer};

#[derive(Parser, Debug)]
#[command(name = "vncmirror", about = "Screen-mirroring RFB (VNC) server", version)]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value_t = format!("0.0.0.0:{}", vncmirror::DEFAULT_PORT))]
    listen: String,

    /// Session width in pixels.
    #[arg(long, default_value_t = 1280)]
    width: u16,

    /// Session height in pixels.
    #[arg(long, default_value_t = 720)]
    height: u16,

    /// Desktop name announced to clients.
    #[arg(long, default_value = "vncmirror")]
    name: String,

    /// Require VNC authentication with this password.
    #[arg(long)]
    password: Option<String>,

    /// JPEG quality for Tight encoding (1-100).
    #[arg(long, default_value_t = 75)]
    quality: u8,
}

#[tokio::main]
async fn main() -> vncmirror::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let server = VncServer::new(
        ServerConfig {
            width: args.width,
            height: args.height,
            desktop_name: args.name,
            password: args.password,
            jpeg_quality: args.quality,
        },
        Box::new(|| Box::new(TestPattern::new()) as Box<dyn vncmirror::FrameSource>),
        Arc::new(NullBackend::new(args.width, args.height)),
    );

    tokio::select! {
        result = server.listen(args.listen.as_str()) => result,
        _ = tokio::signal::ctrl_c() => {
            log::info!("interrupted, shutting down");
            Ok(())
        }
    }
}
