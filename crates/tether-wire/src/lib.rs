//! # Tether Wire
//!
//! Classic STUN (RFC 3489 style, no magic cookie) message codec for the
//! Tether keepalive subsystem.
//!
//! This crate provides:
//! - TLV attribute parsing and encoding with exact-length enforcement
//! - 20-byte header framing with a 128-bit transaction ID
//! - HMAC-SHA1 MESSAGE-INTEGRITY signing and verification
//! - The two TR-111 vendor attributes used for UDP connection requests
//!
//! Parsing is all-or-nothing: a message whose declared attribute length does
//! not match the buffer, or that carries a malformed or unrecognized
//! mandatory attribute, fails as a whole. There is no best-effort decoding.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cursor;
pub mod error;
pub mod integrity;
pub mod message;

pub use error::WireError;
pub use message::{
    verify_integrity, ChangeRequest, ErrorCode, MessageType, StunMessage, TransactionId,
    HEADER_SIZE, MAX_STRING_LEN,
};
