use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

use crate::packet::{DecodeError, ErrorCode};

#[derive(Error, Debug)]
pub enum TftpError {
    /// No free port was found in the IANA dynamic range.
    #[error("no free port in the ephemeral range after {attempts} attempts")]
    NoPort { attempts: usize },

    #[error("could not bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("unexpected {received} packet, expecting {expected}")]
    UnexpectedPacket {
        expected: &'static str,
        received: &'static str,
    },

    #[error("out-of-order block: received {received}, expecting {expected}")]
    OutOfOrderBlock { expected: u16, received: u16 },

    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// A bare CR on the wire side that is followed by neither LF nor NUL.
    #[error("malformed netascii stream: lone CR not followed by LF or NUL")]
    NetasciiFormat,

    /// The remote side terminated the session with an ERROR packet.
    #[error("peer error {code}: {message}")]
    Peer { code: ErrorCode, message: String },

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, TftpError>;
