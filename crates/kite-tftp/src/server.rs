//! Read-only TFTP server.
//!
//! The listener owns the well-known port and accepts read requests one at a
//! time; each request that survives validation is handed to an independent
//! tokio task that owns its own ephemeral socket, its own block file and
//! its own copy of the client address. Workers never share state with the
//! listener or with each other, and nothing a client sends can terminate
//! the listener loop.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::audit::AuditLogger;
use crate::endpoint::Endpoint;
use crate::error::{Result, TftpError};
use crate::fblock::BlockFile;
use crate::netascii;
use crate::packet::{ErrorCode, Opcode, Packet, TransferMode};
use crate::{DATA_BLOCK_SIZE, MAX_REQUEST_SIZE};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address of the well-known request port.
    pub bind_addr: SocketAddr,
    /// Directory the served files are confined to.
    pub root_dir: PathBuf,
    /// Emit structured audit events.
    pub audit_enabled: bool,
}

pub struct TftpServer {
    endpoint: Endpoint,
    config: ServerConfig,
}

impl TftpServer {
    /// Binds the request port. Failing to bind is fatal for the caller;
    /// everything after this point keeps the listener alive.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let endpoint = Endpoint::bind(config.bind_addr).await?;
        Ok(Self { endpoint, config })
    }

    /// The actually bound address, which differs from the configured one
    /// when port 0 was requested.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.endpoint.local_addr()
    }

    /// Runs the listener loop; returns only on a fatal socket error.
    pub async fn serve(self) -> Result<()> {
        info!("TFTP server listening on {}", self.local_addr()?);
        if self.config.audit_enabled {
            AuditLogger::server_started(
                &self.local_addr()?.to_string(),
                &self.config.root_dir.display().to_string(),
            );
        }

        let mut buf = [0u8; MAX_REQUEST_SIZE];
        loop {
            let (len, client_addr) = match self.endpoint.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    error!("error receiving request: {}", e);
                    continue;
                }
            };
            self.dispatch(&buf[..len], client_addr).await;
        }
    }

    /// Handles one datagram on the request port.
    async fn dispatch(&self, datagram: &[u8], client_addr: SocketAddr) {
        match Packet::decode(datagram) {
            Ok(Packet::Rrq { filename, mode }) => {
                self.handle_rrq(filename, mode, client_addr).await;
            }
            Ok(other) => {
                warn!(
                    "{} packet on the request port from {}",
                    other.kind(),
                    client_addr
                );
                if self.config.audit_enabled {
                    AuditLogger::request_denied(client_addr, None, "illegal initial operation");
                }
                self.answer_error(
                    client_addr,
                    ErrorCode::IllegalOperation,
                    "Illegal TFTP operation.",
                )
                .await;
            }
            Err(e) => {
                // A datagram that at least claims to be an RRQ gets the more
                // specific diagnostic.
                let claims_rrq = datagram.len() >= 2
                    && u16::from_be_bytes([datagram[0], datagram[1]]) == Opcode::Rrq as u16;
                if claims_rrq {
                    warn!("malformed RRQ from {}: {}", client_addr, e);
                    if self.config.audit_enabled {
                        AuditLogger::request_denied(client_addr, None, "malformed RRQ");
                    }
                    self.answer_error(client_addr, ErrorCode::NotDefined, "Malformed RRQ packet.")
                        .await;
                } else {
                    warn!("undecodable packet from {}: {}", client_addr, e);
                    if self.config.audit_enabled {
                        AuditLogger::request_denied(client_addr, None, "illegal initial operation");
                    }
                    self.answer_error(
                        client_addr,
                        ErrorCode::IllegalOperation,
                        "Illegal TFTP operation.",
                    )
                    .await;
                }
            }
        }
    }

    /// Validates a read request and spawns the session that serves it.
    async fn handle_rrq(&self, filename: String, mode: TransferMode, client_addr: SocketAddr) {
        info!(
            "RRQ from {}: {} (mode: {})",
            client_addr, filename, mode
        );
        if self.config.audit_enabled {
            AuditLogger::read_request(client_addr, &filename, mode);
        }

        let path = match resolve_within_root(&self.config.root_dir, &filename) {
            Ok(path) => path,
            Err(e) => {
                warn!("rejected filename '{}' from {}: {}", filename, client_addr, e);
                if self.config.audit_enabled {
                    AuditLogger::request_denied(client_addr, Some(&filename), "access violation");
                }
                self.answer_error(client_addr, ErrorCode::IllegalOperation, "Access violation.")
                    .await;
                return;
            }
        };

        if !path.is_file() {
            warn!("RRQ from {} for missing file {}", client_addr, path.display());
            if self.config.audit_enabled {
                AuditLogger::request_denied(client_addr, Some(&filename), "file not found");
            }
            self.answer_error(client_addr, ErrorCode::FileNotFound, "File Not Found.")
                .await;
            return;
        }

        let audit_enabled = self.config.audit_enabled;
        tokio::spawn(async move {
            if let Err(e) = run_read_session(path, mode, client_addr, audit_enabled).await {
                error!("session for {} failed: {}", client_addr, e);
            }
        });
    }

    /// Answers a bad request with an ERROR datagram from the request port.
    async fn answer_error(&self, to: SocketAddr, code: ErrorCode, message: &str) {
        let packet = Packet::Error {
            code,
            message: message.to_string(),
        };
        if let Err(e) = self.endpoint.send_to(&packet.to_bytes(), to).await {
            warn!("could not send ERROR to {}: {}", to, e);
        }
    }
}

/// Resolves a requested filename against the root directory and rejects
/// anything that would escape it: absolute names, `..` components, and
/// symlinked targets.
fn resolve_within_root(root_dir: &Path, filename: &str) -> Result<PathBuf> {
    let filename = filename.replace('\\', "/");
    if filename.contains("..") {
        return Err(TftpError::Io(std::io::Error::other("invalid filename")));
    }

    let file_path = root_dir.join(filename.trim_start_matches('/'));

    match std::fs::symlink_metadata(&file_path) {
        Ok(metadata) => {
            if metadata.file_type().is_symlink() {
                return Err(TftpError::Io(std::io::Error::other(
                    "symlinks are not allowed",
                )));
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            // Missing files are answered later, with their own error code.
        }
        Err(_) => {
            return Err(TftpError::Io(std::io::Error::other("access denied")));
        }
    }

    let canonical_root = root_dir
        .canonicalize()
        .map_err(|_| TftpError::Io(std::io::Error::other("root directory error")))?;

    if let Ok(canonical_file) = file_path.canonicalize() {
        if !canonical_file.starts_with(&canonical_root) {
            return Err(TftpError::Io(std::io::Error::other("access denied")));
        }
    } else if let Some(parent) = file_path.parent()
        && let Ok(canonical_parent) = parent.canonicalize()
        && !canonical_parent.starts_with(&canonical_root)
    {
        return Err(TftpError::Io(std::io::Error::other("access denied")));
    }

    Ok(file_path)
}

/// One read session: fresh transfer ID, optional netascii pre-pass, and
/// the sender side of the transfer engine against the recorded client
/// address. The scratch file of a netascii session is removed on every
/// exit path.
async fn run_read_session(
    path: PathBuf,
    mode: TransferMode,
    client_addr: SocketAddr,
    audit_enabled: bool,
) -> Result<()> {
    let session = Uuid::new_v4();
    let started = Instant::now();

    let endpoint = Endpoint::bind_ephemeral().await?;
    info!(
        "session {} for {}: serving {} from {}",
        session,
        client_addr,
        path.display(),
        endpoint.local_addr()?
    );

    let scratch = matches!(mode, TransferMode::Netascii)
        .then(|| std::env::temp_dir().join(format!("kite-tftp-{}.netascii", session)));

    let result = serve_file(
        &endpoint,
        &path,
        scratch.as_deref(),
        client_addr,
        mode,
        audit_enabled,
    )
    .await;

    if let Some(scratch) = &scratch {
        let _ = tokio::fs::remove_file(scratch).await;
    }

    match &result {
        Ok(report) => {
            info!(
                "session {} complete: {} bytes in {} blocks",
                session, report.bytes, report.blocks
            );
            if audit_enabled {
                AuditLogger::transfer_completed(
                    client_addr,
                    &path.display().to_string(),
                    report.bytes,
                    report.blocks,
                    started.elapsed().as_millis() as u64,
                );
            }
        }
        Err(e) => {
            if audit_enabled {
                AuditLogger::transfer_failed(
                    client_addr,
                    &path.display().to_string(),
                    &e.to_string(),
                );
            }
        }
    }

    result.map(|_| ())
}

struct SessionReport {
    bytes: u64,
    blocks: u64,
}

async fn serve_file(
    endpoint: &Endpoint,
    path: &Path,
    scratch: Option<&Path>,
    client_addr: SocketAddr,
    mode: TransferMode,
    audit_enabled: bool,
) -> Result<SessionReport> {
    let serve_path = match scratch {
        Some(scratch) => {
            netascii::encode_file(path, scratch).await?;
            scratch
        }
        None => path,
    };

    let mut file = match BlockFile::open_read(serve_path, DATA_BLOCK_SIZE).await {
        Ok(file) => file,
        Err(e) => {
            // The listener checked existence, but the file can vanish in
            // between; the client still deserves an answer.
            if matches!(e, TftpError::FileNotFound(_)) {
                let packet = Packet::Error {
                    code: ErrorCode::FileNotFound,
                    message: "File Not Found.".to_string(),
                };
                let _ = endpoint.send_to(&packet.to_bytes(), client_addr).await;
            }
            return Err(e);
        }
    };

    let bytes = file.remaining();
    let blocks = bytes / DATA_BLOCK_SIZE as u64 + 1;
    if audit_enabled {
        AuditLogger::transfer_started(client_addr, &path.display().to_string(), bytes, mode);
    }

    let result = crate::transfer::send_file(endpoint, client_addr, &mut file).await;
    let close_result = file.close().await;
    result?;
    close_result?;

    Ok(SessionReport { bytes, blocks })
}
