//! Read-only TFTP (RFC 1350) server and client.
//!
//! The crate implements the wire-message codec, the lockstep stop-and-wait
//! transfer engine shared by both sides of a read session, transfer-ID
//! tracking with source validation, and the netascii translation of RFC 764.
//! Write requests are decoded for completeness but never served.

pub mod audit;
pub mod client;
pub mod endpoint;
pub mod error;
pub mod fblock;
pub mod netascii;
pub mod packet;
pub mod server;
pub mod transfer;

pub use client::{GetOutcome, TftpClient, TransferReport};
pub use endpoint::Endpoint;
pub use error::{Result, TftpError};
pub use packet::{DecodeError, ErrorCode, Opcode, Packet, TransferMode};
pub use server::{ServerConfig, TftpServer};

/// RFC 1350: every DATA packet but the last carries exactly this many bytes.
pub const DATA_BLOCK_SIZE: usize = 512;

/// Largest datagram a session can receive: a full DATA block plus its header.
pub const MAX_PACKET_SIZE: usize = DATA_BLOCK_SIZE + 4;

/// Longest filename accepted in a request packet.
pub const MAX_FILENAME_LEN: usize = 255;

/// Longest transfer-mode string ("netascii" is the longest valid one).
pub const MAX_MODE_LEN: usize = 8;

/// Longest message accepted in an ERROR packet.
pub const MAX_ERROR_MSG_LEN: usize = 255;

/// Largest well-formed request datagram the listener has to accept.
pub const MAX_REQUEST_SIZE: usize = 4 + MAX_FILENAME_LEN + MAX_MODE_LEN;

/// The well-known TFTP server port.
pub const TFTP_PORT: u16 = 69;
