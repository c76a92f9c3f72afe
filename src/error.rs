//! Error types for the VNC server library.

use std::io;
use thiserror::Error;

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Errors that can occur while serving an RFB session.
#[derive(Debug, Error)]
pub enum ServerError {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// RFB protocol error.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Authentication failed.
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// Rectangle encoding failed; the frame carrying it is dropped.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// The frame source could not start or stopped delivering frames.
    #[error("Capture error: {0}")]
    Capture(String),

    /// Connection closed.
    #[error("Connection closed")]
    ConnectionClosed,
}
