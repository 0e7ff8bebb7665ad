//! UDP endpoint of one TFTP session.
//!
//! RFC 1350: each end of a transfer is identified by its transfer ID, the
//! (IP, port) pair of its socket. The listener binds the well-known port;
//! every session binds a fresh port in the IANA dynamic range.

use std::net::{Ipv4Addr, SocketAddr};

use rand::Rng;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::debug;

use crate::error::{Result, TftpError};

/// IANA dynamic port range the sessions draw their transfer IDs from.
pub const EPHEMERAL_MIN: u16 = 49152;
pub const EPHEMERAL_MAX: u16 = 65535;

const MAX_BIND_ATTEMPTS: usize = 256;

/// Two transfer IDs match only when both IP and port are equal.
pub fn tid_matches(a: SocketAddr, b: SocketAddr) -> bool {
    a.ip() == b.ip() && a.port() == b.port()
}

#[derive(Debug)]
pub struct Endpoint {
    socket: UdpSocket,
}

impl Endpoint {
    /// Binds a fixed address, for the server listener. The socket is set up
    /// through socket2 so SO_REUSEADDR can be enabled before the bind.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let bind_err = |source| TftpError::Bind { addr, source };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP)).map_err(bind_err)?;
        socket.set_reuse_address(true).map_err(bind_err)?;
        socket.bind(&addr.into()).map_err(bind_err)?;
        socket.set_nonblocking(true).map_err(bind_err)?;
        let socket = UdpSocket::from_std(socket.into()).map_err(bind_err)?;
        Ok(Self { socket })
    }

    /// Binds a fresh transfer ID: a random first candidate in
    /// [[`EPHEMERAL_MIN`], [`EPHEMERAL_MAX`]], then a sequential scan, and
    /// [`TftpError::NoPort`] after 256 failed attempts.
    pub async fn bind_ephemeral() -> Result<Self> {
        let span = u32::from(EPHEMERAL_MAX - EPHEMERAL_MIN) + 1;
        let mut offset = rand::thread_rng().gen_range(0..span);
        for _ in 0..MAX_BIND_ATTEMPTS {
            let port = EPHEMERAL_MIN + offset as u16;
            match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)).await {
                Ok(socket) => {
                    debug!("bound ephemeral port {}", port);
                    return Ok(Self { socket });
                }
                Err(e) => {
                    debug!("port {} unavailable: {}", port, e);
                    offset = (offset + 1) % span;
                }
            }
        }
        Err(TftpError::NoPort {
            attempts: MAX_BIND_ATTEMPTS,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Sends one datagram; a partial send is an error.
    pub async fn send_to(&self, bytes: &[u8], peer: SocketAddr) -> Result<()> {
        let sent = self.socket.send_to(bytes, peer).await?;
        if sent != bytes.len() {
            return Err(TftpError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                format!("short datagram send: {} of {} bytes", sent, bytes.len()),
            )));
        }
        Ok(())
    }

    /// Receives one datagram and its source address.
    pub async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        Ok(self.socket.recv_from(buf).await?)
    }
}
