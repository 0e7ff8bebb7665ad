//! The lockstep stop-and-wait transfer engine (RFC 1350).
//!
//! One state machine, two entry points. [`send_file`] drives the sender
//! side of a read session: DATA out, ACK in. [`receive_file`] drives the
//! receiver side: DATA in, ACK out. At most one packet is in flight in
//! either direction, and a session ends exactly when a DATA block shorter
//! than the full block size has been exchanged.
//!
//! Block numbers are 16-bit and wrap; they are compared as `u16` so that
//! transfers past 65535 blocks keep working.
//!
//! Retransmission and timeouts are deliberately not implemented: RFC 1350
//! asks for a retransmit of the last unacknowledged packet on a timeout,
//! and callers that need liveness bounds must impose them from outside.

use std::net::{IpAddr, SocketAddr};

use tracing::{debug, info, warn};

use crate::MAX_PACKET_SIZE;
use crate::endpoint::{Endpoint, tid_matches};
use crate::error::{Result, TftpError};
use crate::fblock::BlockFile;
use crate::packet::Packet;

/// Source validation for one session.
///
/// The receiver side starts out knowing only the server's IP: the server
/// answers from a fresh port, so the first datagram is accepted from any
/// port on that IP and its full (IP, port) becomes the session's peer
/// transfer ID. From then on, and on the sender side from the start, a
/// datagram whose source differs in IP or port is dropped without touching
/// the session state.
enum SourceGate {
    Locked { tid: SocketAddr },
    Awaiting { server_ip: IpAddr },
}

impl SourceGate {
    /// Receives the next datagram from the session peer, silently
    /// discarding datagrams from anybody else.
    async fn recv(&mut self, endpoint: &Endpoint, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        loop {
            let (len, src) = endpoint.recv_from(buf).await?;
            match *self {
                SourceGate::Locked { tid } => {
                    if tid_matches(tid, src) {
                        return Ok((len, src));
                    }
                    warn!("discarding datagram from unexpected source {}", src);
                }
                SourceGate::Awaiting { server_ip } => {
                    if src.ip() == server_ip {
                        info!("receiving packets from {}", src);
                        *self = SourceGate::Locked { tid: src };
                        return Ok((len, src));
                    }
                    warn!("discarding datagram from unexpected source {}", src);
                }
            }
        }
    }
}

/// Sender side: emits DATA blocks from `file` and awaits the matching ACKs.
///
/// The final block is the first one shorter than the block size, which is a
/// zero-length DATA when the file length is an exact multiple of it.
pub async fn send_file(endpoint: &Endpoint, peer: SocketAddr, file: &mut BlockFile) -> Result<()> {
    let mut gate = SourceGate::Locked { tid: peer };
    let mut next_block: u16 = 1;
    let mut data = vec![0u8; file.block_size()];
    let mut in_buf = [0u8; MAX_PACKET_SIZE];

    loop {
        let n = file.read_block(&mut data).await?;
        debug!("sending block {} ({} bytes)", next_block, n);
        let packet = Packet::Data {
            block: next_block,
            payload: data[..n].to_vec(),
        };
        endpoint.send_to(&packet.to_bytes(), peer).await?;

        let (len, _) = gate.recv(endpoint, &mut in_buf).await?;
        match Packet::decode(&in_buf[..len])? {
            Packet::Ack { block } => {
                if block != next_block {
                    return Err(TftpError::OutOfOrderBlock {
                        expected: next_block,
                        received: block,
                    });
                }
            }
            Packet::Error { code, message } => return Err(TftpError::Peer { code, message }),
            other => {
                return Err(TftpError::UnexpectedPacket {
                    expected: "ACK",
                    received: other.kind(),
                });
            }
        }

        next_block = next_block.wrapping_add(1);
        if n < file.block_size() {
            return Ok(());
        }
    }
}

/// Receiver side: awaits DATA blocks, writes them to `file` and answers
/// each with its ACK.
///
/// `server_ip` is the IP the read request was addressed to; see
/// [`SourceGate`] for how the peer transfer ID gets bound. A block number
/// other than the expected one terminates the session: duplicate
/// retransmits are not handled, matching the sender's lack of timeouts.
pub async fn receive_file(
    endpoint: &Endpoint,
    server_ip: IpAddr,
    file: &mut BlockFile,
) -> Result<()> {
    let mut gate = SourceGate::Awaiting { server_ip };
    let mut expected_block: u16 = 1;
    let mut in_buf = [0u8; MAX_PACKET_SIZE];

    loop {
        debug!("waiting for block {}", expected_block);
        let (len, peer) = gate.recv(endpoint, &mut in_buf).await?;
        match Packet::decode(&in_buf[..len])? {
            Packet::Data { block, payload } => {
                if block != expected_block {
                    return Err(TftpError::OutOfOrderBlock {
                        expected: expected_block,
                        received: block,
                    });
                }
                debug!("block {} has {} bytes", block, payload.len());
                if !payload.is_empty() {
                    file.write_block(&payload).await?;
                }
                endpoint
                    .send_to(&Packet::Ack { block }.to_bytes(), peer)
                    .await?;
                expected_block = expected_block.wrapping_add(1);
                if payload.len() < file.block_size() {
                    return Ok(());
                }
            }
            Packet::Error { code, message } => return Err(TftpError::Peer { code, message }),
            other => {
                return Err(TftpError::UnexpectedPacket {
                    expected: "DATA",
                    received: other.kind(),
                });
            }
        }
    }
}
