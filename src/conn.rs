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

//! Per-connection protocol driver: handshake, message demultiplexer, and
//! teardown.
//!
//! After the handshake the connection settles into a loop reading one
//! message-type byte and dispatching to the per-message parser. Unknown
//! message types are logged and skipped; only I/O errors end the session.
//! Teardown runs in a fixed order (done signal, event queues, frame
//! source, write buffer) so every pipeline observes a clean shutdown.

use crate::auth::VncAuth;
use crate::buffer::OutputBuffer;
use crate::capture::FrameSource;
use crate::error::{Result, ServerError};
use crate::input::InputBackend;
use crate::protocol::{
    ClientCutText, FrameBufferUpdateRequest, KeyEvent, PixelFormat, PointerEvent, ServerInit,
    CLIENT_MSG_CLIENT_CUT_TEXT, CLIENT_MSG_FRAMEBUFFER_UPDATE_REQUEST, CLIENT_MSG_KEY_EVENT,
    CLIENT_MSG_POINTER_EVENT, CLIENT_MSG_SET_ENCODINGS, CLIENT_MSG_SET_PIXEL_FORMAT,
    PROTOCOL_VERSION, SECURITY_RESULT_FAILED, SECURITY_RESULT_OK, SECURITY_TYPE_NONE,
    SECURITY_TYPE_VNC_AUTH,
};
use crate::session::DisplaySession;
use bytes::{BufMut, Bytes, BytesMut};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, BufReader};

/// Hard cap on announced cut-text length; anything larger is hostile.
const MAX_CUT_TEXT: usize = 1024 * 1024;

/// Everything a connection needs besides its transport.
pub struct ConnOptions {
    /// Session width announced in `ServerInit`.
    pub width: u16,
    /// Session height announced in `ServerInit`.
    pub height: u16,
    /// Desktop name announced in `ServerInit`.
    pub desktop_name: String,
    /// When set, VNC Authentication is required.
    pub password: Option<String>,
    /// JPEG quality for the Tight encoder (1..=100, 0 = default).
    pub jpeg_quality: u8,
    /// Screen capture for this connection.
    pub source: Box<dyn FrameSource>,
    /// Host input injection, shared across connections.
    pub input: Arc<dyn InputBackend>,
}

/// Runs one client connection over any byte stream until either side
/// disconnects.
///
/// # Errors
///
/// Returns the I/O or protocol error that ended the session; a clean client
/// disconnect is `Ok`.
pub async fn serve_stream<S>(stream: S, mut opts: ConnOptions) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let out = OutputBuffer::new(writer);

    if let Err(err) = handshake(&mut reader, &out, &opts).await {
        out.close();
        return Err(err);
    }

    let frames = match opts.source.start(opts.width, opts.height) {
        Ok(frames) => frames,
        Err(err) => {
            out.close();
            return Err(err);
        }
    };

    let session = DisplaySession::start(
        opts.width,
        opts.height,
        opts.jpeg_quality,
        out.clone(),
        frames,
        opts.input.clone(),
    );

    let result = demux_loop(&mut reader, &session).await;

    // Orderly teardown: stop pipelines, close their queues, stop capture,
    // then let the writer drain.
    session.close();
    drop(session);
    opts.source.close();
    out.close();

    result
}

/// RFB 3.8 handshake: version, security, `ClientInit`, `ServerInit`.
async fn handshake<R>(reader: &mut R, out: &OutputBuffer, opts: &ConnOptions) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    out.dispatch(Bytes::from_static(PROTOCOL_VERSION.as_bytes()));
    let mut version = [0u8; 12];
    reader.read_exact(&mut version).await?;
    log::info!(
        "client version: {}",
        String::from_utf8_lossy(&version).trim_end()
    );

    let offered = if opts.password.is_some() {
        SECURITY_TYPE_VNC_AUTH
    } else {
        SECURITY_TYPE_NONE
    };
    out.dispatch(Bytes::copy_from_slice(&[1, offered]));

    let chosen = reader.read_u8().await?;
    if chosen != offered {
        return Err(ServerError::Protocol(format!(
            "client chose unsupported security type {chosen}"
        )));
    }

    if let Some(password) = &opts.password {
        let auth = VncAuth::new(password.clone());
        let challenge = VncAuth::generate_challenge();
        out.dispatch(Bytes::copy_from_slice(&challenge));

        let mut response = [0u8; 16];
        reader.read_exact(&mut response).await?;

        let mut result = BytesMut::with_capacity(4);
        if auth.verify_response(&response, &challenge) {
            result.put_u32(SECURITY_RESULT_OK);
            out.dispatch(result.freeze());
        } else {
            result.put_u32(SECURITY_RESULT_FAILED);
            out.dispatch(result.freeze());
            return Err(ServerError::AuthenticationFailed);
        }
    } else {
        let mut result = BytesMut::with_capacity(4);
        result.put_u32(SECURITY_RESULT_OK);
        out.dispatch(result.freeze());
    }

    // ClientInit: the shared flag is irrelevant to a single-tenant server.
    let _shared = reader.read_u8().await?;

    let mut init = BytesMut::new();
    ServerInit {
        framebuffer_width: opts.width,
        framebuffer_height: opts.height,
        pixel_format: PixelFormat::default(),
        name: opts.desktop_name.clone(),
    }
    .write_to(&mut init);
    out.dispatch(init.freeze());

    log::info!("handshake complete ({}x{})", opts.width, opts.height);
    Ok(())
}

/// Steady-state message loop. Returns `Ok` on clean client disconnect.
async fn demux_loop<R>(reader: &mut R, session: &DisplaySession) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    loop {
        let msg_type = match reader.read_u8().await {
            Ok(t) => t,
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                log::info!("client disconnected");
                return Ok(());
            }
            Err(err) => {
                log::info!("client read failed: {err}");
                return Err(err.into());
            }
        };

        match msg_type {
            CLIENT_MSG_SET_PIXEL_FORMAT => {
                read_padding(reader, 3).await?;
                let mut raw = [0u8; 16];
                reader.read_exact(&mut raw).await?;
                let mut buf = BytesMut::from(&raw[..]);
                let pf = PixelFormat::from_bytes(&mut buf)?;
                session.set_pixel_format(pf).await;
            }
            CLIENT_MSG_SET_ENCODINGS => {
                read_padding(reader, 1).await?;
                let count = reader.read_u16().await? as usize;
                let mut codes = Vec::with_capacity(count);
                for _ in 0..count {
                    codes.push(reader.read_i32().await?);
                }
                let (regular, pseudo) = split_pseudo_encodings(codes);
                session.set_encodings(regular, pseudo).await;
            }
            CLIENT_MSG_FRAMEBUFFER_UPDATE_REQUEST => {
                let incremental = reader.read_u8().await? != 0;
                let req = FrameBufferUpdateRequest {
                    incremental,
                    x: reader.read_u16().await?,
                    y: reader.read_u16().await?,
                    width: reader.read_u16().await?,
                    height: reader.read_u16().await?,
                };
                session.dispatch_frame_buffer_update(req).await;
            }
            CLIENT_MSG_KEY_EVENT => {
                let down = reader.read_u8().await? != 0;
                read_padding(reader, 2).await?;
                let keysym = reader.read_u32().await?;
                session.dispatch_key_event(KeyEvent { down, keysym }).await;
            }
            CLIENT_MSG_POINTER_EVENT => {
                let ev = PointerEvent {
                    button_mask: reader.read_u8().await?,
                    x: reader.read_u16().await?,
                    y: reader.read_u16().await?,
                };
                session.dispatch_pointer_event(ev).await;
            }
            CLIENT_MSG_CLIENT_CUT_TEXT => {
                read_padding(reader, 3).await?;
                let length = reader.read_u32().await? as usize;
                if length > MAX_CUT_TEXT {
                    return Err(ServerError::Protocol(format!(
                        "cut text of {length} bytes exceeds limit"
                    )));
                }
                let mut text = vec![0u8; length];
                reader.read_exact(&mut text).await?;
                session.dispatch_client_cut_text(ClientCutText { text }).await;
            }
            other => {
                log::warn!("unsupported message type {other} from client");
            }
        }
    }
}

/// Discards up to three padding bytes.
async fn read_padding<R>(reader: &mut R, n: usize) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut pad = [0u8; 3];
    reader.read_exact(&mut pad[..n]).await?;
    Ok(())
}

/// Splits an encoding list at the first zero: values up to and including the
/// zero are regular encodings, the remainder pseudo-encodings.
fn split_pseudo_encodings(codes: Vec<i32>) -> (Vec<i32>, Vec<i32>) {
    match codes.iter().position(|&c| c == 0) {
        Some(idx) => {
            let pseudo = codes[idx + 1..].to_vec();
            let mut regular = codes;
            regular.truncate(idx + 1);
            (regular, pseudo)
        }
        None => (codes, Vec::new()),
    }
}
