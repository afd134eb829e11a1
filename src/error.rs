// src/error.rs
/* Every failure a tunnel session can hit, from the SOCKS front end to the backend dial. */

use hyper::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed SOCKS5 input from the local application
    #[error("socks handshake failed: {0}")]
    Handshake(String),

    #[error("unsupported socks command: {0:#04x}")]
    UnsupportedCommand(u8),

    /// Target unreachable when creating a session
    #[error("failed to dial {addr}: {reason}")]
    Dial { addr: String, reason: String },

    /// HTTP round trip to the tunnel server failed
    #[error("tunnel transport error: {0}")]
    Transport(#[from] hyper::Error),

    #[error("invalid tunnel request: {0}")]
    Request(#[from] http::Error),

    #[error("tunnel server answered {0}")]
    Rejected(StatusCode),

    #[error("no such session")]
    UnknownSession,

    #[error("session muxer is not running")]
    MuxerGone,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
