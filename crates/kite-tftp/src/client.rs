//! One-shot TFTP read client.
//!
//! A `get` opens a fresh ephemeral endpoint, sends the RRQ to the server's
//! request port and drives the receiver side of the transfer engine against
//! that server's IP. Netascii transfers land in a temporary file next to
//! the destination and are converted as a post-pass; the temporary is
//! removed on every exit path.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::DATA_BLOCK_SIZE;
use crate::endpoint::Endpoint;
use crate::error::{Result, TftpError};
use crate::fblock::BlockFile;
use crate::netascii;
use crate::packet::{ErrorCode, Packet, TransferMode};
use crate::transfer;

/// Summary of a finished read transfer.
#[derive(Debug, Clone, Copy)]
pub struct TransferReport {
    pub bytes: u64,
    pub blocks: u64,
}

/// How a read request ended, short of an actual error.
///
/// A server answering `ERROR(1)` is an ordinary outcome for an interactive
/// client, not a failure of the session.
#[derive(Debug)]
pub enum GetOutcome {
    Complete(TransferReport),
    NotFound,
}

pub struct TftpClient {
    /// The server's request port; sessions then follow its transfer ID.
    pub server: SocketAddr,
    /// Mode used for subsequent requests. Defaults to octet.
    pub mode: TransferMode,
}

impl TftpClient {
    pub fn new(server: SocketAddr) -> Self {
        Self {
            server,
            mode: TransferMode::Octet,
        }
    }

    /// Reads `remote` from the server into `local`.
    pub async fn get(&self, remote: &str, local: &Path) -> Result<GetOutcome> {
        let endpoint = Endpoint::bind_ephemeral().await?;
        debug!("bound {}", endpoint.local_addr()?);

        // Netascii arrives in wire form; receive into LOCAL.tmp and convert.
        let write_path = match self.mode {
            TransferMode::Netascii => PathBuf::from(format!("{}.tmp", local.display())),
            TransferMode::Octet => local.to_path_buf(),
        };
        let mut file = BlockFile::open_write(&write_path, DATA_BLOCK_SIZE).await?;

        let rrq = Packet::Rrq {
            filename: remote.to_string(),
            mode: self.mode,
        };
        endpoint.send_to(&rrq.to_bytes(), self.server).await?;
        info!("sent RRQ for {} ({}) to {}", remote, self.mode, self.server);

        let result = transfer::receive_file(&endpoint, self.server.ip(), &mut file).await;
        let written = file.written();
        let close_result = file.close().await;

        match result {
            Ok(()) => {
                close_result?;
                if self.mode == TransferMode::Netascii {
                    let converted = netascii::decode_file(&write_path, local).await;
                    let _ = tokio::fs::remove_file(&write_path).await;
                    converted?;
                }
                let blocks = written / DATA_BLOCK_SIZE as u64 + 1;
                info!("transfer complete: {} bytes in {} blocks", written, blocks);
                Ok(GetOutcome::Complete(TransferReport {
                    bytes: written,
                    blocks,
                }))
            }
            Err(TftpError::Peer {
                code: ErrorCode::FileNotFound,
                message,
            }) => {
                info!("server: {}", message);
                let _ = tokio::fs::remove_file(&write_path).await;
                Ok(GetOutcome::NotFound)
            }
            Err(e) => {
                if self.mode == TransferMode::Netascii {
                    let _ = tokio::fs::remove_file(&write_path).await;
                }
                Err(e)
            }
        }
    }
}
