//! Socket error taxonomy.
//!
//! Bind failures are classified because the keepalive engine treats them
//! differently: during startup they abort the subsystem, at runtime (LAN
//! address changes) they are logged and retried on the next iteration. A
//! receive timeout is the expected steady-state outcome and gets its own
//! variant so callers can never confuse it with a transport fault.

use std::io;
use std::net::SocketAddrV4;
use thiserror::Error;

/// Failures opening a local UDP socket.
#[derive(Debug, Error)]
pub enum BindError {
    /// Local address already bound by another socket
    #[error("address in use: {0}")]
    AddrInUse(SocketAddrV4),

    /// Local address not assigned to any interface
    #[error("address not available: {0}")]
    AddrNotAvailable(SocketAddrV4),

    /// Any other socket-level failure
    #[error("bind failed: {0}")]
    Other(#[from] io::Error),
}

/// Failures sending a datagram.
#[derive(Debug, Error)]
pub enum SendError {
    /// Payload exceeds the fixed maximum datagram size
    #[error("datagram too large: {len} bytes")]
    TooLarge {
        /// Attempted payload size
        len: usize,
    },

    /// Socket-level send failure
    #[error("send failed: {0}")]
    Io(#[from] io::Error),
}

/// Failures (and the timeout outcome) receiving a datagram.
#[derive(Debug, Error)]
pub enum RecvError {
    /// No datagram arrived within the timeout. Not a fault.
    #[error("receive timed out")]
    Timeout,

    /// Datagram exceeded the fixed maximum size and was discarded
    #[error("oversized datagram discarded")]
    Oversize,

    /// Datagram from a non-IPv4 source on an IPv4 socket
    #[error("non-IPv4 source address")]
    NonIpv4Source,

    /// Socket-level receive failure
    #[error("receive failed: {0}")]
    Io(#[from] io::Error),
}
