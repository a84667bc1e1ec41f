//! # Tether Transport
//!
//! Blocking UDP transport for the Tether keepalive subsystem.
//!
//! This crate provides:
//! - `socket2`-constructed UDP sockets converted to `std::net::UdpSocket`
//! - Timed receives where a timeout is a first-class outcome, not an error
//! - A classified bind-failure taxonomy (in use / not available / other)
//! - A fixed maximum datagram size; oversized traffic is rejected
//!
//! The keepalive engine runs on plain OS threads with blocking reads as its
//! only suspension points, so everything here is synchronous.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod udp;

pub use error::{BindError, RecvError, SendError};
pub use udp::{can_bind, Datagram, TransportConfig, UdpChannel, MAX_DATAGRAM_SIZE};
