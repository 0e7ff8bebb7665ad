//! Netascii line-ending translation (RFC 764).
//!
//! On the wire a line break is CR LF and a literal carriage return is
//! CR NUL. The translators are streaming and restartable at arbitrary
//! chunk boundaries: the encoder carries the previous input byte, the
//! decoder a pending-CR flag. Both sides of a transfer apply them as a
//! whole-file pass through a temporary file rather than per packet.

use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{info, warn};

use crate::error::{Result, TftpError};

const CR: u8 = b'\r';
const LF: u8 = b'\n';
const NUL: u8 = 0;

const CHUNK_SIZE: usize = 8192;

/// Local form to wire form.
///
/// LF not preceded by CR becomes CR LF; a CR not followed by LF becomes
/// CR NUL; a literal CR LF passes through unchanged.
#[derive(Debug, Default)]
pub struct NetasciiEncoder {
    prev: Option<u8>,
}

impl NetasciiEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Translates `input`, appending the wire form to `out`.
    pub fn push(&mut self, input: &[u8], out: &mut Vec<u8>) {
        for &byte in input {
            // A CR was emitted but its classification was still open: it is
            // part of a CR LF if LF follows, a lone CR otherwise.
            if self.prev == Some(CR) {
                if byte == LF {
                    out.push(LF);
                    self.prev = Some(LF);
                    continue;
                }
                out.push(NUL);
            }
            match byte {
                LF => {
                    out.push(CR);
                    out.push(LF);
                }
                CR => out.push(CR),
                other => out.push(other),
            }
            self.prev = Some(byte);
        }
    }

    /// Flushes a trailing CR, which is necessarily a lone one.
    pub fn finish(self, out: &mut Vec<u8>) {
        if self.prev == Some(CR) {
            out.push(NUL);
        }
    }
}

/// Wire form to local form.
///
/// CR LF becomes LF, CR NUL becomes CR; a CR followed by anything else
/// (or ending the stream) is a format error.
#[derive(Debug, Default)]
pub struct NetasciiDecoder {
    pending_cr: bool,
}

impl NetasciiDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Translates `input`, appending the local form to `out`.
    pub fn push(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<()> {
        for &byte in input {
            if self.pending_cr {
                self.pending_cr = false;
                match byte {
                    LF => out.push(LF),
                    NUL => out.push(CR),
                    other => {
                        warn!("bad netascii: 0x{:02x} after CR", other);
                        return Err(TftpError::NetasciiFormat);
                    }
                }
            } else if byte == CR {
                self.pending_cr = true;
            } else {
                out.push(byte);
            }
        }
        Ok(())
    }

    /// The stream must not end in the middle of a CR sequence.
    pub fn finish(self) -> Result<()> {
        if self.pending_cr {
            warn!("bad netascii: stream ends after CR");
            return Err(TftpError::NetasciiFormat);
        }
        Ok(())
    }
}

/// Converts a local file into its netascii wire form (sender pre-pass).
pub async fn encode_file(src: &Path, dst: &Path) -> Result<()> {
    let mut input = File::open(src).await?;
    let mut output = File::create(dst).await?;
    let mut encoder = NetasciiEncoder::new();
    let mut chunk = vec![0u8; CHUNK_SIZE];
    let mut translated = Vec::with_capacity(CHUNK_SIZE * 2);
    loop {
        let n = input.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        translated.clear();
        encoder.push(&chunk[..n], &mut translated);
        output.write_all(&translated).await?;
    }
    translated.clear();
    encoder.finish(&mut translated);
    output.write_all(&translated).await?;
    output.flush().await?;
    info!(
        "converted {} to netascii file {}",
        src.display(),
        dst.display()
    );
    Ok(())
}

/// Converts a received netascii file back to local form (receiver post-pass).
pub async fn decode_file(src: &Path, dst: &Path) -> Result<()> {
    let mut input = File::open(src).await?;
    let mut output = File::create(dst).await?;
    let mut decoder = NetasciiDecoder::new();
    let mut chunk = vec![0u8; CHUNK_SIZE];
    let mut translated = Vec::with_capacity(CHUNK_SIZE);
    loop {
        let n = input.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        translated.clear();
        decoder.push(&chunk[..n], &mut translated)?;
        output.write_all(&translated).await?;
    }
    decoder.finish()?;
    output.flush().await?;
    info!(
        "converted netascii file {} to {}",
        src.display(),
        dst.display()
    );
    Ok(())
}
