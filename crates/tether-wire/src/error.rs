//! Error types for the STUN wire codec.

use thiserror::Error;

/// Wire-level parse failures.
///
/// Every variant fails the whole parse; callers drop the datagram and log at
/// warning level. None of these are fatal to the subsystem.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    /// Buffer too short for the field being read
    #[error("message too short: expected at least {expected}, got {actual}")]
    TooShort {
        /// Minimum number of bytes needed
        expected: usize,
        /// Bytes actually available
        actual: usize,
    },

    /// Message type code not in the classic STUN set
    #[error("invalid message type: 0x{0:04X}")]
    InvalidMessageType(u16),

    /// Header length field disagrees with the buffer length
    #[error("declared attribute length {declared} does not match body length {actual}")]
    LengthMismatch {
        /// Length claimed by the header
        declared: usize,
        /// `buf.len() - 20`
        actual: usize,
    },

    /// Attribute value has the wrong length for its type
    #[error("attribute 0x{attr:04X} has invalid length {len}")]
    BadAttributeLength {
        /// Attribute type code
        attr: u16,
        /// Declared value length
        len: usize,
    },

    /// Mandatory-range attribute (<= 0x7FFF) the decoder does not know
    #[error("unrecognized mandatory attribute: 0x{0:04X}")]
    UnknownMandatoryAttribute(u16),

    /// Address attribute with a family other than IPv4
    #[error("invalid address family: 0x{0:02X}")]
    InvalidAddressFamily(u8),

    /// String attribute longer than the fixed maximum
    #[error("string attribute 0x{attr:04X} exceeds {max} bytes")]
    StringTooLong {
        /// Attribute type code
        attr: u16,
        /// Maximum permitted length
        max: usize,
    },

    /// String attribute that is not valid UTF-8
    #[error("invalid utf-8 in string attribute 0x{0:04X}")]
    InvalidString(u16),
}
