//! Block-oriented file access for the transfer engine.
//!
//! A [`BlockFile`] owns its file for the lifetime of one session. The read
//! side pre-computes the file length into a `remaining` counter so the
//! engine can tell when the final, short DATA block is due; the write side
//! accumulates a `written` counter for the completion report.

use std::io;
use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use crate::error::{Result, TftpError};

#[derive(Debug)]
enum Counter {
    Remaining(u64),
    Written(u64),
}

#[derive(Debug)]
pub struct BlockFile {
    file: File,
    block_size: usize,
    counter: Counter,
}

impl BlockFile {
    /// Opens `path` for reading. A missing file is surfaced as
    /// [`TftpError::FileNotFound`] so callers can answer it on the wire.
    pub async fn open_read(path: &Path, block_size: usize) -> Result<Self> {
        let file = File::open(path).await.map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                TftpError::FileNotFound(path.to_path_buf())
            } else {
                TftpError::Io(e)
            }
        })?;
        let len = file.metadata().await?.len();
        debug!("opened {} for reading, {} bytes", path.display(), len);
        Ok(Self {
            file,
            block_size,
            counter: Counter::Remaining(len),
        })
    }

    /// Creates (or truncates) `path` for writing.
    pub async fn open_write(path: &Path, block_size: usize) -> Result<Self> {
        let file = File::create(path).await?;
        debug!("opened {} for writing", path.display());
        Ok(Self {
            file,
            block_size,
            counter: Counter::Written(0),
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Bytes the read side has not yet handed out.
    pub fn remaining(&self) -> u64 {
        match self.counter {
            Counter::Remaining(n) => n,
            Counter::Written(_) => 0,
        }
    }

    /// Bytes the write side has accepted so far.
    pub fn written(&self) -> u64 {
        match self.counter {
            Counter::Written(n) => n,
            Counter::Remaining(_) => 0,
        }
    }

    /// Reads the next block into `buf`, returning how many bytes it holds:
    /// `min(remaining, block_size)`. A file that ends before the expected
    /// count is an error, not a silent short block.
    pub async fn read_block(&mut self, buf: &mut [u8]) -> Result<usize> {
        let Counter::Remaining(remaining) = &mut self.counter else {
            return Err(TftpError::Io(io::Error::other(
                "block file not opened for reading",
            )));
        };
        let want = (*remaining).min(self.block_size as u64) as usize;
        let mut filled = 0;
        while filled < want {
            let n = self.file.read(&mut buf[filled..want]).await?;
            if n == 0 {
                return Err(TftpError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "file shrank while being served",
                )));
            }
            filled += n;
        }
        *remaining -= want as u64;
        Ok(want)
    }

    /// Writes one block; the whole buffer or an error.
    pub async fn write_block(&mut self, buf: &[u8]) -> Result<usize> {
        let Counter::Written(written) = &mut self.counter else {
            return Err(TftpError::Io(io::Error::other(
                "block file not opened for writing",
            )));
        };
        self.file.write_all(buf).await?;
        *written += buf.len() as u64;
        Ok(buf.len())
    }

    /// Flushes the write side and releases the file.
    pub async fn close(mut self) -> Result<()> {
        if matches!(self.counter, Counter::Written(_)) {
            self.file.flush().await?;
        }
        Ok(())
    }
}
