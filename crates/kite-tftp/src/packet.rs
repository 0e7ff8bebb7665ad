//! TFTP wire-message codec (RFC 1350).
//!
//! Pure functions over byte buffers: no sockets, no files. Decoding takes
//! the received datagram as a slice and either yields a [`Packet`] or a
//! [`DecodeError`] naming exactly what was wrong with it; encoding appends
//! the exact on-wire representation to a caller-supplied buffer.

use std::fmt;

use bytes::{BufMut, BytesMut};
use thiserror::Error;

use crate::{DATA_BLOCK_SIZE, MAX_ERROR_MSG_LEN, MAX_FILENAME_LEN, MAX_MODE_LEN};

// TFTP Opcodes (RFC 1350)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Opcode {
    Rrq = 1,   // Read request
    Wrq = 2,   // Write request
    Data = 3,  // Data block
    Ack = 4,   // Acknowledgment
    Error = 5, // Error
}

impl Opcode {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Opcode::Rrq),
            2 => Some(Opcode::Wrq),
            3 => Some(Opcode::Data),
            4 => Some(Opcode::Ack),
            5 => Some(Opcode::Error),
            _ => None,
        }
    }
}

// TFTP Error Codes (RFC 1350)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    NotDefined = 0,
    FileNotFound = 1,
    AccessViolation = 2,
    DiskFull = 3,
    IllegalOperation = 4,
    UnknownTransferId = 5,
    FileAlreadyExists = 6,
    NoSuchUser = 7,
}

impl ErrorCode {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(ErrorCode::NotDefined),
            1 => Some(ErrorCode::FileNotFound),
            2 => Some(ErrorCode::AccessViolation),
            3 => Some(ErrorCode::DiskFull),
            4 => Some(ErrorCode::IllegalOperation),
            5 => Some(ErrorCode::UnknownTransferId),
            6 => Some(ErrorCode::FileAlreadyExists),
            7 => Some(ErrorCode::NoSuchUser),
            _ => None,
        }
    }

    /// Canonical description of the code, per the RFC 1350 appendix.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotDefined => "Not defined",
            ErrorCode::FileNotFound => "File not found",
            ErrorCode::AccessViolation => "Access violation",
            ErrorCode::DiskFull => "Disk full or allocation exceeded",
            ErrorCode::IllegalOperation => "Illegal TFTP operation",
            ErrorCode::UnknownTransferId => "Unknown transfer ID",
            ErrorCode::FileAlreadyExists => "File already exists",
            ErrorCode::NoSuchUser => "No such user",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u16)
    }
}

/// Transfer modes accepted by this implementation.
///
/// RFC 1350 also names the obsolete `mail` mode; a request carrying it (or
/// anything else) fails decoding with [`DecodeError::UnknownMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// 8-bit ASCII with RFC 764 line-ending conversion on the wire.
    Netascii,
    /// Raw binary transfer, no conversion.
    Octet,
}

impl TransferMode {
    /// Mode strings are compared case-insensitively per RFC 1350.
    pub fn parse(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("netascii") {
            Some(TransferMode::Netascii)
        } else if s.eq_ignore_ascii_case("octet") {
            Some(TransferMode::Octet)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferMode::Netascii => "netascii",
            TransferMode::Octet => "octet",
        }
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What was wrong with a datagram that failed to decode.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("bad or unsupported opcode")]
    WrongOpcode,
    #[error("packet truncated")]
    Truncated,
    #[error("trailing bytes after packet end")]
    TrailingGarbage,
    #[error("text field exceeds protocol limit")]
    FieldTooLong,
    #[error("unknown transfer mode")]
    UnknownMode,
    #[error("error code out of range")]
    BadErrorCode,
}

/// One TFTP message.
///
/// `Wrq` is decoded for completeness but never produced by this crate: the
/// server is read-only and the client only issues read requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Rrq {
        filename: String,
        mode: TransferMode,
    },
    Wrq {
        filename: String,
        mode: TransferMode,
    },
    Data {
        block: u16,
        payload: Vec<u8>,
    },
    Ack {
        block: u16,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
}

impl Packet {
    /// Short packet-kind name used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::Rrq { .. } => "RRQ",
            Packet::Wrq { .. } => "WRQ",
            Packet::Data { .. } => "DATA",
            Packet::Ack { .. } => "ACK",
            Packet::Error { .. } => "ERROR",
        }
    }

    /// Exact length of the encoded packet.
    pub fn wire_size(&self) -> usize {
        match self {
            Packet::Rrq { filename, mode } | Packet::Wrq { filename, mode } => {
                4 + filename.len() + mode.as_str().len()
            }
            Packet::Data { payload, .. } => 4 + payload.len(),
            Packet::Ack { .. } => 4,
            Packet::Error { message, .. } => 5 + message.len(),
        }
    }

    /// Appends the wire representation to `buf`; exactly
    /// [`wire_size`](Self::wire_size) bytes are written.
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            Packet::Rrq { filename, mode } => request_bytes(Opcode::Rrq, filename, *mode, buf),
            Packet::Wrq { filename, mode } => request_bytes(Opcode::Wrq, filename, *mode, buf),
            Packet::Data { block, payload } => {
                buf.put_u16(Opcode::Data as u16);
                buf.put_u16(*block);
                buf.put_slice(payload);
            }
            Packet::Ack { block } => {
                buf.put_u16(Opcode::Ack as u16);
                buf.put_u16(*block);
            }
            Packet::Error { code, message } => {
                buf.put_u16(Opcode::Error as u16);
                buf.put_u16(*code as u16);
                buf.put_slice(message.as_bytes());
                buf.put_u8(0);
            }
        }
    }

    /// Convenience wrapper allocating a buffer of the exact wire size.
    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.wire_size());
        self.encode(&mut buf);
        buf
    }

    /// Parses one datagram. The slice must hold exactly the received bytes.
    pub fn decode(buf: &[u8]) -> Result<Packet, DecodeError> {
        if buf.len() < 2 {
            return Err(DecodeError::Truncated);
        }
        let opcode = u16::from_be_bytes([buf[0], buf[1]]);
        let opcode = Opcode::from_u16(opcode).ok_or(DecodeError::WrongOpcode)?;
        let body = &buf[2..];
        match opcode {
            Opcode::Rrq => {
                let (filename, mode) = decode_request(body)?;
                Ok(Packet::Rrq { filename, mode })
            }
            Opcode::Wrq => {
                let (filename, mode) = decode_request(body)?;
                Ok(Packet::Wrq { filename, mode })
            }
            Opcode::Data => {
                if buf.len() < 4 {
                    return Err(DecodeError::Truncated);
                }
                if buf.len() > 4 + DATA_BLOCK_SIZE {
                    return Err(DecodeError::FieldTooLong);
                }
                let block = u16::from_be_bytes([buf[2], buf[3]]);
                Ok(Packet::Data {
                    block,
                    payload: buf[4..].to_vec(),
                })
            }
            Opcode::Ack => {
                if buf.len() < 4 {
                    return Err(DecodeError::Truncated);
                }
                if buf.len() > 4 {
                    return Err(DecodeError::TrailingGarbage);
                }
                let block = u16::from_be_bytes([buf[2], buf[3]]);
                Ok(Packet::Ack { block })
            }
            Opcode::Error => {
                if buf.len() < 4 {
                    return Err(DecodeError::Truncated);
                }
                let code = u16::from_be_bytes([buf[2], buf[3]]);
                let code = ErrorCode::from_u16(code).ok_or(DecodeError::BadErrorCode)?;
                let (message, rest) = take_cstr(&buf[4..], MAX_ERROR_MSG_LEN)?;
                if !rest.is_empty() {
                    return Err(DecodeError::TrailingGarbage);
                }
                Ok(Packet::Error {
                    code,
                    message: String::from_utf8_lossy(message).into_owned(),
                })
            }
        }
    }
}

// RRQ/WRQ body: filename NUL mode NUL, nothing else.
fn decode_request(body: &[u8]) -> Result<(String, TransferMode), DecodeError> {
    let (filename, rest) = take_cstr(body, MAX_FILENAME_LEN)?;
    let (mode, rest) = take_cstr(rest, MAX_MODE_LEN)?;
    if !rest.is_empty() {
        return Err(DecodeError::TrailingGarbage);
    }
    let mode = std::str::from_utf8(mode)
        .ok()
        .and_then(TransferMode::parse)
        .ok_or(DecodeError::UnknownMode)?;
    Ok((String::from_utf8_lossy(filename).into_owned(), mode))
}

// Splits one zero-terminated field off the front of `buf`.
fn take_cstr(buf: &[u8], max_len: usize) -> Result<(&[u8], &[u8]), DecodeError> {
    let nul = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or(DecodeError::Truncated)?;
    if nul > max_len {
        return Err(DecodeError::FieldTooLong);
    }
    Ok((&buf[..nul], &buf[nul + 1..]))
}

fn request_bytes(opcode: Opcode, filename: &str, mode: TransferMode, buf: &mut BytesMut) {
    buf.put_u16(opcode as u16);
    buf.put_slice(filename.as_bytes());
    buf.put_u8(0);
    buf.put_slice(mode.as_str().as_bytes());
    buf.put_u8(0);
}
