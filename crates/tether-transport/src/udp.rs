//! UDP channel with blocking, timeout-bounded I/O.
//!
//! Sockets are built through `socket2` so buffer sizes can be tuned, then
//! converted to `std::net::UdpSocket` for plain blocking operation. Receives
//! set the read timeout per call because the keepalive interval changes over
//! the lifetime of a socket.

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::Duration;

use crate::error::{BindError, RecvError, SendError};

/// Fixed maximum datagram size; anything larger is rejected on both paths.
pub const MAX_DATAGRAM_SIZE: usize = 2048;

/// Socket construction options.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Kernel receive buffer size
    pub recv_buffer_size: usize,
    /// Kernel send buffer size
    pub send_buffer_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            recv_buffer_size: 64 * 1024,
            send_buffer_size: 64 * 1024,
        }
    }
}

/// A received datagram with its source captured.
#[derive(Debug, Clone)]
pub struct Datagram {
    /// Payload bytes
    pub bytes: Vec<u8>,
    /// Peer the datagram arrived from
    pub source: SocketAddrV4,
}

/// An IPv4 UDP socket bound to a known local address.
#[derive(Debug)]
pub struct UdpChannel {
    socket: UdpSocket,
}

impl UdpChannel {
    /// Open a channel bound to `local_ip:local_port` with default options.
    ///
    /// Port 0 requests an ephemeral port; use [`UdpChannel::local_addr`] to
    /// learn what was assigned.
    ///
    /// # Errors
    ///
    /// Returns a classified [`BindError`]. Only startup treats this as
    /// fatal; runtime rebinds log and retry.
    pub fn open(local_ip: Ipv4Addr, local_port: u16) -> Result<Self, BindError> {
        Self::open_with_config(local_ip, local_port, &TransportConfig::default())
    }

    /// Open a channel with explicit socket options.
    ///
    /// # Errors
    ///
    /// Returns a classified [`BindError`].
    pub fn open_with_config(
        local_ip: Ipv4Addr,
        local_port: u16,
        config: &TransportConfig,
    ) -> Result<Self, BindError> {
        let local = SocketAddrV4::new(local_ip, local_port);

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(BindError::Other)?;
        socket
            .set_recv_buffer_size(config.recv_buffer_size)
            .map_err(BindError::Other)?;
        socket
            .set_send_buffer_size(config.send_buffer_size)
            .map_err(BindError::Other)?;

        socket
            .bind(&SocketAddr::V4(local).into())
            .map_err(|e| classify_bind_error(e, local))?;

        tracing::debug!(%local, "udp channel bound");
        Ok(Self {
            socket: socket.into(),
        })
    }

    /// Local address the socket is bound to.
    ///
    /// # Errors
    ///
    /// Returns the underlying socket error if the address cannot be read.
    pub fn local_addr(&self) -> io::Result<SocketAddrV4> {
        match self.socket.local_addr()? {
            SocketAddr::V4(a) => Ok(a),
            SocketAddr::V6(_) => Err(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                "IPv4 socket reported an IPv6 address",
            )),
        }
    }

    /// Send one datagram to `dst`.
    ///
    /// # Errors
    ///
    /// Rejects payloads above [`MAX_DATAGRAM_SIZE`]; otherwise surfaces the
    /// socket error. Callers log transient failures and continue.
    pub fn send(&self, buf: &[u8], dst: SocketAddrV4) -> Result<(), SendError> {
        if buf.len() > MAX_DATAGRAM_SIZE {
            return Err(SendError::TooLarge { len: buf.len() });
        }
        self.socket.send_to(buf, SocketAddr::V4(dst))?;
        Ok(())
    }

    /// Block until a datagram arrives or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// [`RecvError::Timeout`] when nothing arrived: the expected
    /// steady-state outcome, distinguishable from every fault variant.
    /// Oversized datagrams are consumed and rejected.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Datagram, RecvError> {
        // A zero timeout would put the socket in blocking-forever mode
        let timeout = timeout.max(Duration::from_millis(1));
        self.socket.set_read_timeout(Some(timeout))?;

        let mut buf = [0u8; MAX_DATAGRAM_SIZE + 1];
        match self.socket.recv_from(&mut buf) {
            Ok((n, src)) => {
                if n > MAX_DATAGRAM_SIZE {
                    return Err(RecvError::Oversize);
                }
                let source = match src {
                    SocketAddr::V4(a) => a,
                    SocketAddr::V6(_) => return Err(RecvError::NonIpv4Source),
                };
                Ok(Datagram {
                    bytes: buf[..n].to_vec(),
                    source,
                })
            }
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                Err(RecvError::Timeout)
            }
            Err(e) => Err(RecvError::Io(e)),
        }
    }
}

/// Probe whether a local address can currently be bound.
///
/// The NAT classifier uses this to test whether the externally mapped
/// address is actually local (no NAT): if the mapped address cannot be
/// rebound here, a NAT owns it.
#[must_use]
pub fn can_bind(addr: SocketAddrV4) -> bool {
    UdpSocket::bind(SocketAddr::V4(addr)).is_ok()
}

fn classify_bind_error(e: io::Error, local: SocketAddrV4) -> BindError {
    match e.kind() {
        io::ErrorKind::AddrInUse => BindError::AddrInUse(local),
        io::ErrorKind::AddrNotAvailable => BindError::AddrNotAvailable(local),
        _ => BindError::Other(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_channel() -> UdpChannel {
        UdpChannel::open(Ipv4Addr::LOCALHOST, 0).unwrap()
    }

    #[test]
    fn loopback_send_recv() {
        let a = loopback_channel();
        let b = loopback_channel();
        let b_addr = b.local_addr().unwrap();

        a.send(b"ping", b_addr).unwrap();
        let dgram = b.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(dgram.bytes, b"ping");
        assert_eq!(dgram.source, a.local_addr().unwrap());
    }

    #[test]
    fn timeout_is_first_class() {
        let ch = loopback_channel();
        let err = ch.recv_timeout(Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, RecvError::Timeout));
    }

    #[test]
    fn oversized_send_rejected() {
        let ch = loopback_channel();
        let dst = ch.local_addr().unwrap();
        let err = ch.send(&[0u8; MAX_DATAGRAM_SIZE + 1], dst).unwrap_err();
        assert!(matches!(err, SendError::TooLarge { .. }));
    }

    #[test]
    fn bind_conflict_is_classified() {
        let ch = loopback_channel();
        let addr = ch.local_addr().unwrap();
        let err = UdpChannel::open(*addr.ip(), addr.port()).unwrap_err();
        assert!(matches!(err, BindError::AddrInUse(_)));
    }

    #[test]
    fn can_bind_reflects_availability() {
        let ch = loopback_channel();
        let taken = ch.local_addr().unwrap();
        assert!(!can_bind(taken));
        drop(ch);
        assert!(can_bind(taken));
    }
}
