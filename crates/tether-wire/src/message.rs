//! Classic STUN message model, parser, and encoder.
//!
//! The header is 2 bytes of type, 2 bytes of attribute length, and a 16-byte
//! transaction ID (classic STUN carries no magic cookie). Attributes are TLV
//! with 2-byte type and length fields; string values are NUL-padded to a
//! 4-byte boundary on the wire.
//!
//! Attribute presence is modelled as one `Option` per attribute so presence
//! and payload cannot disagree.

use std::net::{Ipv4Addr, SocketAddrV4};

use crate::cursor::Reader;
use crate::error::WireError;
use crate::integrity;

/// STUN header size: type + length + 128-bit transaction ID.
pub const HEADER_SIZE: usize = 20;

/// Maximum accepted length for string attribute values.
pub const MAX_STRING_LEN: usize = 256;

/// Wire size of a MESSAGE-INTEGRITY TLV: 4-byte header + 20-byte digest.
const INTEGRITY_TLV_LEN: usize = 4 + integrity::DIGEST_LEN;

/// Address family code for IPv4, the only family this codec speaks.
const FAMILY_IPV4: u8 = 0x01;

/// Attribute type codes (classic STUN plus the TR-111 vendor pair).
pub mod attr {
    /// MAPPED-ADDRESS
    pub const MAPPED_ADDRESS: u16 = 0x0001;
    /// RESPONSE-ADDRESS
    pub const RESPONSE_ADDRESS: u16 = 0x0002;
    /// CHANGE-REQUEST
    pub const CHANGE_REQUEST: u16 = 0x0003;
    /// SOURCE-ADDRESS
    pub const SOURCE_ADDRESS: u16 = 0x0004;
    /// CHANGED-ADDRESS
    pub const CHANGED_ADDRESS: u16 = 0x0005;
    /// USERNAME
    pub const USERNAME: u16 = 0x0006;
    /// PASSWORD
    pub const PASSWORD: u16 = 0x0007;
    /// MESSAGE-INTEGRITY
    pub const MESSAGE_INTEGRITY: u16 = 0x0008;
    /// ERROR-CODE
    pub const ERROR_CODE: u16 = 0x0009;
    /// UNKNOWN-ATTRIBUTES
    pub const UNKNOWN_ATTRIBUTES: u16 = 0x000A;
    /// REFLECTED-FROM
    pub const REFLECTED_FROM: u16 = 0x000B;
    /// XOR-ONLY
    pub const XOR_ONLY: u16 = 0x0021;
    /// XOR-MAPPED-ADDRESS
    pub const XOR_MAPPED_ADDRESS: u16 = 0x8020;
    /// SERVER-NAME
    pub const SERVER_NAME: u16 = 0x8022;
    /// SECONDARY-ADDRESS
    pub const SECONDARY_ADDRESS: u16 = 0x8050;
    /// CONNECTION-REQUEST-BINDING (TR-111 vendor)
    pub const CONNECTION_REQUEST_BINDING: u16 = 0xC001;
    /// BINDING-CHANGE (TR-111 vendor, zero-length marker)
    pub const BINDING_CHANGE: u16 = 0xC002;
}

/// STUN message type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Binding Request (0x0001)
    BindRequest,
    /// Binding Response (0x0101)
    BindResponse,
    /// Binding Error Response (0x0111)
    BindErrorResponse,
    /// Shared Secret Request (0x0002)
    SharedSecretRequest,
    /// Shared Secret Response (0x0102)
    SharedSecretResponse,
}

impl MessageType {
    /// Wire code for this message type.
    #[must_use]
    pub fn code(self) -> u16 {
        match self {
            Self::BindRequest => 0x0001,
            Self::BindResponse => 0x0101,
            Self::BindErrorResponse => 0x0111,
            Self::SharedSecretRequest => 0x0002,
            Self::SharedSecretResponse => 0x0102,
        }
    }

    /// Decode a wire code.
    pub fn from_code(code: u16) -> Result<Self, WireError> {
        match code {
            0x0001 => Ok(Self::BindRequest),
            0x0101 => Ok(Self::BindResponse),
            0x0111 => Ok(Self::BindErrorResponse),
            0x0002 => Ok(Self::SharedSecretRequest),
            0x0102 => Ok(Self::SharedSecretResponse),
            other => Err(WireError::InvalidMessageType(other)),
        }
    }
}

/// 128-bit transaction ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionId(pub [u8; 16]);

impl TransactionId {
    /// Fresh random transaction ID.
    #[must_use]
    pub fn random() -> Self {
        use rand::RngCore;
        let mut id = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut id);
        Self(id)
    }
}

/// CHANGE-REQUEST flag pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChangeRequest {
    /// Ask the server to reply from its alternate IP
    pub change_ip: bool,
    /// Ask the server to reply from its alternate port
    pub change_port: bool,
}

impl ChangeRequest {
    const FLAG_CHANGE_IP: u32 = 0x0000_0004;
    const FLAG_CHANGE_PORT: u32 = 0x0000_0002;

    fn to_flags(self) -> u32 {
        let mut flags = 0;
        if self.change_ip {
            flags |= Self::FLAG_CHANGE_IP;
        }
        if self.change_port {
            flags |= Self::FLAG_CHANGE_PORT;
        }
        flags
    }

    fn from_flags(flags: u32) -> Self {
        Self {
            change_ip: flags & Self::FLAG_CHANGE_IP != 0,
            change_port: flags & Self::FLAG_CHANGE_PORT != 0,
        }
    }
}

/// ERROR-CODE attribute: class, number, and a reason phrase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorCode {
    /// Hundreds digit of the error code (3 bits on the wire)
    pub class: u8,
    /// Code modulo 100
    pub number: u8,
    /// Human-readable reason phrase
    pub reason: String,
}

impl ErrorCode {
    /// Build an error code from its numeric value, e.g. 401.
    #[must_use]
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            class: (code / 100) as u8,
            number: (code % 100) as u8,
            reason: reason.into(),
        }
    }

    /// Numeric value, e.g. 401.
    #[must_use]
    pub fn code(&self) -> u16 {
        u16::from(self.class) * 100 + u16::from(self.number)
    }
}

/// A decoded classic STUN message.
///
/// Each attribute is independently optional. `parse` and `encode` round-trip:
/// for a message with a wire-consistent attribute set,
/// `parse(&encode(&m, None)) == m`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StunMessage {
    /// Message type
    pub msg_type: MessageType,
    /// Transaction ID
    pub transaction_id: TransactionId,
    /// MAPPED-ADDRESS
    pub mapped_address: Option<SocketAddrV4>,
    /// RESPONSE-ADDRESS
    pub response_address: Option<SocketAddrV4>,
    /// CHANGE-REQUEST
    pub change_request: Option<ChangeRequest>,
    /// SOURCE-ADDRESS
    pub source_address: Option<SocketAddrV4>,
    /// CHANGED-ADDRESS
    pub changed_address: Option<SocketAddrV4>,
    /// USERNAME
    pub username: Option<String>,
    /// PASSWORD
    pub password: Option<String>,
    /// MESSAGE-INTEGRITY digest as received
    pub message_integrity: Option<[u8; 20]>,
    /// ERROR-CODE
    pub error_code: Option<ErrorCode>,
    /// UNKNOWN-ATTRIBUTES type list
    pub unknown_attributes: Option<Vec<u16>>,
    /// REFLECTED-FROM
    pub reflected_from: Option<SocketAddrV4>,
    /// XOR-ONLY marker
    pub xor_only: bool,
    /// XOR-MAPPED-ADDRESS
    pub xor_mapped_address: Option<SocketAddrV4>,
    /// SERVER-NAME
    pub server_name: Option<String>,
    /// SECONDARY-ADDRESS
    pub secondary_address: Option<SocketAddrV4>,
    /// CONNECTION-REQUEST-BINDING opaque marker string
    pub connection_request_binding: Option<String>,
    /// BINDING-CHANGE marker
    pub binding_change: bool,
}

impl StunMessage {
    /// New message of the given type with a random transaction ID and no
    /// attributes.
    #[must_use]
    pub fn new(msg_type: MessageType) -> Self {
        Self::with_transaction_id(msg_type, TransactionId::random())
    }

    /// New message with an explicit transaction ID.
    #[must_use]
    pub fn with_transaction_id(msg_type: MessageType, transaction_id: TransactionId) -> Self {
        Self {
            msg_type,
            transaction_id,
            mapped_address: None,
            response_address: None,
            change_request: None,
            source_address: None,
            changed_address: None,
            username: None,
            password: None,
            message_integrity: None,
            error_code: None,
            unknown_attributes: None,
            reflected_from: None,
            xor_only: false,
            xor_mapped_address: None,
            server_name: None,
            secondary_address: None,
            connection_request_binding: None,
            binding_change: false,
        }
    }

    /// Parse a datagram into a message.
    ///
    /// # Errors
    ///
    /// Fails the whole parse on a short buffer, a header length that does not
    /// equal `buf.len() - 20`, any malformed attribute, or a mandatory-range
    /// attribute the decoder does not recognize. Attributes above 0x7FFF that
    /// are not known are skipped per the reserved-range convention.
    pub fn parse(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < HEADER_SIZE {
            return Err(WireError::TooShort {
                expected: HEADER_SIZE,
                actual: buf.len(),
            });
        }

        let mut header = Reader::new(&buf[..HEADER_SIZE]);
        let msg_type = MessageType::from_code(header.read_u16()?)?;
        let declared = header.read_u16()? as usize;
        let body = &buf[HEADER_SIZE..];
        if declared != body.len() {
            return Err(WireError::LengthMismatch {
                declared,
                actual: body.len(),
            });
        }
        let mut transaction_id = [0u8; 16];
        transaction_id.copy_from_slice(header.read_bytes(16)?);

        let mut msg = Self::with_transaction_id(msg_type, TransactionId(transaction_id));

        let mut r = Reader::new(body);
        while !r.is_empty() {
            let attr_type = r.read_u16()?;
            let attr_len = r.read_u16()? as usize;
            let value = r.read_bytes(attr_len)?;
            msg.apply_attribute(attr_type, value)?;
        }

        Ok(msg)
    }

    fn apply_attribute(&mut self, attr_type: u16, value: &[u8]) -> Result<(), WireError> {
        match attr_type {
            attr::MAPPED_ADDRESS => self.mapped_address = Some(parse_address(attr_type, value)?),
            attr::RESPONSE_ADDRESS => {
                self.response_address = Some(parse_address(attr_type, value)?);
            }
            attr::CHANGE_REQUEST => {
                if value.len() != 4 {
                    return Err(WireError::BadAttributeLength {
                        attr: attr_type,
                        len: value.len(),
                    });
                }
                let flags = Reader::new(value).read_u32()?;
                self.change_request = Some(ChangeRequest::from_flags(flags));
            }
            attr::SOURCE_ADDRESS => self.source_address = Some(parse_address(attr_type, value)?),
            attr::CHANGED_ADDRESS => self.changed_address = Some(parse_address(attr_type, value)?),
            attr::USERNAME => self.username = Some(parse_string(attr_type, value)?),
            attr::PASSWORD => self.password = Some(parse_string(attr_type, value)?),
            attr::MESSAGE_INTEGRITY => {
                if value.len() != integrity::DIGEST_LEN {
                    return Err(WireError::BadAttributeLength {
                        attr: attr_type,
                        len: value.len(),
                    });
                }
                let mut digest = [0u8; 20];
                digest.copy_from_slice(value);
                self.message_integrity = Some(digest);
            }
            attr::ERROR_CODE => {
                if value.len() < 4 || (value.len() - 4) % 4 != 0 {
                    return Err(WireError::BadAttributeLength {
                        attr: attr_type,
                        len: value.len(),
                    });
                }
                if value.len() - 4 > MAX_STRING_LEN {
                    return Err(WireError::StringTooLong {
                        attr: attr_type,
                        max: MAX_STRING_LEN,
                    });
                }
                let class = value[2] & 0x07;
                let number = value[3];
                let reason = decode_padded_string(attr_type, &value[4..])?;
                self.error_code = Some(ErrorCode {
                    class,
                    number,
                    reason,
                });
            }
            attr::UNKNOWN_ATTRIBUTES => {
                if value.len() % 4 != 0 {
                    return Err(WireError::BadAttributeLength {
                        attr: attr_type,
                        len: value.len(),
                    });
                }
                let mut r = Reader::new(value);
                let mut types = Vec::with_capacity(value.len() / 2);
                while !r.is_empty() {
                    types.push(r.read_u16()?);
                }
                self.unknown_attributes = Some(types);
            }
            attr::REFLECTED_FROM => self.reflected_from = Some(parse_address(attr_type, value)?),
            attr::XOR_ONLY => {
                if !value.is_empty() {
                    return Err(WireError::BadAttributeLength {
                        attr: attr_type,
                        len: value.len(),
                    });
                }
                self.xor_only = true;
            }
            attr::XOR_MAPPED_ADDRESS => {
                self.xor_mapped_address = Some(parse_address(attr_type, value)?);
            }
            attr::SERVER_NAME => self.server_name = Some(parse_string(attr_type, value)?),
            attr::SECONDARY_ADDRESS => {
                self.secondary_address = Some(parse_address(attr_type, value)?);
            }
            attr::CONNECTION_REQUEST_BINDING => {
                self.connection_request_binding = Some(parse_string(attr_type, value)?);
            }
            attr::BINDING_CHANGE => {
                if !value.is_empty() {
                    return Err(WireError::BadAttributeLength {
                        attr: attr_type,
                        len: value.len(),
                    });
                }
                self.binding_change = true;
            }
            // Mandatory range: an unknown type fails the parse. Above it,
            // skip per the reserved-range convention.
            t if t <= 0x7FFF => return Err(WireError::UnknownMandatoryAttribute(t)),
            _ => {}
        }
        Ok(())
    }

    /// Encode the message, optionally signing it.
    ///
    /// Attributes are written in canonical (numeric) order with the header
    /// length back-patched. When `secret` is given, a MESSAGE-INTEGRITY
    /// attribute is appended last, computed as HMAC-SHA1 over every byte
    /// written before it (with the header length already counting the
    /// integrity TLV, so the signed region is self-consistent); any stored
    /// `message_integrity` value is ignored in that case.
    #[must_use]
    pub fn encode(&self, secret: Option<&[u8]>) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128);
        buf.extend_from_slice(&self.msg_type.code().to_be_bytes());
        buf.extend_from_slice(&[0u8; 2]);
        buf.extend_from_slice(&self.transaction_id.0);

        if let Some(a) = &self.mapped_address {
            push_address(&mut buf, attr::MAPPED_ADDRESS, a);
        }
        if let Some(a) = &self.response_address {
            push_address(&mut buf, attr::RESPONSE_ADDRESS, a);
        }
        if let Some(cr) = self.change_request {
            push_attr_header(&mut buf, attr::CHANGE_REQUEST, 4);
            buf.extend_from_slice(&cr.to_flags().to_be_bytes());
        }
        if let Some(a) = &self.source_address {
            push_address(&mut buf, attr::SOURCE_ADDRESS, a);
        }
        if let Some(a) = &self.changed_address {
            push_address(&mut buf, attr::CHANGED_ADDRESS, a);
        }
        if let Some(s) = &self.username {
            push_string(&mut buf, attr::USERNAME, s);
        }
        if let Some(s) = &self.password {
            push_string(&mut buf, attr::PASSWORD, s);
        }
        if let Some(ec) = &self.error_code {
            let padded = padded_len(ec.reason.len());
            push_attr_header(&mut buf, attr::ERROR_CODE, (4 + padded) as u16);
            buf.extend_from_slice(&[0, 0, ec.class & 0x07, ec.number]);
            push_padded(&mut buf, ec.reason.as_bytes());
        }
        if let Some(types) = &self.unknown_attributes {
            // An odd count repeats the last entry to hold 4-byte alignment
            let count = if types.len() % 2 == 0 {
                types.len()
            } else {
                types.len() + 1
            };
            push_attr_header(&mut buf, attr::UNKNOWN_ATTRIBUTES, (count * 2) as u16);
            for t in types {
                buf.extend_from_slice(&t.to_be_bytes());
            }
            if types.len() % 2 != 0 {
                if let Some(last) = types.last() {
                    buf.extend_from_slice(&last.to_be_bytes());
                }
            }
        }
        if let Some(a) = &self.reflected_from {
            push_address(&mut buf, attr::REFLECTED_FROM, a);
        }
        if self.xor_only {
            push_attr_header(&mut buf, attr::XOR_ONLY, 0);
        }
        if let Some(a) = &self.xor_mapped_address {
            push_address(&mut buf, attr::XOR_MAPPED_ADDRESS, a);
        }
        if let Some(s) = &self.server_name {
            push_string(&mut buf, attr::SERVER_NAME, s);
        }
        if let Some(a) = &self.secondary_address {
            push_address(&mut buf, attr::SECONDARY_ADDRESS, a);
        }
        if let Some(s) = &self.connection_request_binding {
            push_string(&mut buf, attr::CONNECTION_REQUEST_BINDING, s);
        }
        if self.binding_change {
            push_attr_header(&mut buf, attr::BINDING_CHANGE, 0);
        }
        if secret.is_none() {
            if let Some(digest) = &self.message_integrity {
                push_attr_header(&mut buf, attr::MESSAGE_INTEGRITY, 20);
                buf.extend_from_slice(digest);
            }
        }

        let mut attr_len = buf.len() - HEADER_SIZE;
        if secret.is_some() {
            attr_len += INTEGRITY_TLV_LEN;
        }
        buf[2..4].copy_from_slice(&(attr_len as u16).to_be_bytes());

        if let Some(key) = secret {
            let digest = integrity::hmac_sha1(key, &buf);
            push_attr_header(&mut buf, attr::MESSAGE_INTEGRITY, 20);
            buf.extend_from_slice(&digest);
        }

        buf
    }
}

/// Verify the MESSAGE-INTEGRITY attribute of a raw signed datagram.
///
/// Expects the integrity attribute in trailing position, as `encode` emits it
/// and as signed responses carry it. Returns `false` for unsigned, truncated,
/// or tampered buffers; never an error.
#[must_use]
pub fn verify_integrity(buf: &[u8], secret: &[u8]) -> bool {
    if buf.len() < HEADER_SIZE + INTEGRITY_TLV_LEN {
        return false;
    }
    let tlv_start = buf.len() - INTEGRITY_TLV_LEN;
    let header_ok = buf[tlv_start..tlv_start + 2] == attr::MESSAGE_INTEGRITY.to_be_bytes()
        && buf[tlv_start + 2..tlv_start + 4] == (integrity::DIGEST_LEN as u16).to_be_bytes();
    if !header_ok {
        return false;
    }
    let expected = &buf[tlv_start + 4..];
    let digest = integrity::hmac_sha1(secret, &buf[..tlv_start]);
    digest[..] == *expected
}

fn push_attr_header(buf: &mut Vec<u8>, attr_type: u16, len: u16) {
    buf.extend_from_slice(&attr_type.to_be_bytes());
    buf.extend_from_slice(&len.to_be_bytes());
}

fn push_address(buf: &mut Vec<u8>, attr_type: u16, addr: &SocketAddrV4) {
    push_attr_header(buf, attr_type, 8);
    buf.push(0);
    buf.push(FAMILY_IPV4);
    buf.extend_from_slice(&addr.port().to_be_bytes());
    buf.extend_from_slice(&addr.ip().octets());
}

fn padded_len(len: usize) -> usize {
    len.div_ceil(4) * 4
}

fn push_padded(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(bytes);
    for _ in bytes.len()..padded_len(bytes.len()) {
        buf.push(0);
    }
}

fn push_string(buf: &mut Vec<u8>, attr_type: u16, s: &str) {
    push_attr_header(buf, attr_type, padded_len(s.len()) as u16);
    push_padded(buf, s.as_bytes());
}

fn parse_address(attr_type: u16, value: &[u8]) -> Result<SocketAddrV4, WireError> {
    if value.len() != 8 {
        return Err(WireError::BadAttributeLength {
            attr: attr_type,
            len: value.len(),
        });
    }
    let mut r = Reader::new(value);
    let _ignored = r.read_u8()?;
    let family = r.read_u8()?;
    if family != FAMILY_IPV4 {
        return Err(WireError::InvalidAddressFamily(family));
    }
    let port = r.read_u16()?;
    let ip = Ipv4Addr::from(r.read_u32()?);
    Ok(SocketAddrV4::new(ip, port))
}

fn decode_padded_string(attr_type: u16, value: &[u8]) -> Result<String, WireError> {
    let trimmed = match value.iter().rposition(|&b| b != 0) {
        Some(last) => &value[..=last],
        None => &[],
    };
    String::from_utf8(trimmed.to_vec()).map_err(|_| WireError::InvalidString(attr_type))
}

fn parse_string(attr_type: u16, value: &[u8]) -> Result<String, WireError> {
    if value.len() % 4 != 0 {
        return Err(WireError::BadAttributeLength {
            attr: attr_type,
            len: value.len(),
        });
    }
    if value.len() > MAX_STRING_LEN {
        return Err(WireError::StringTooLong {
            attr: attr_type,
            max: MAX_STRING_LEN,
        });
    }
    decode_padded_string(attr_type, value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddrV4 {
        s.parse().unwrap()
    }

    #[test]
    fn bind_request_roundtrip() {
        let mut msg = StunMessage::new(MessageType::BindRequest);
        msg.username = Some("cpe-0044".into());
        msg.change_request = Some(ChangeRequest {
            change_ip: true,
            change_port: false,
        });
        msg.connection_request_binding = Some("dslforum.org/TR-111 ".into());

        let bytes = msg.encode(None);
        let parsed = StunMessage::parse(&bytes).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn response_roundtrip_with_addresses() {
        let mut msg = StunMessage::new(MessageType::BindResponse);
        msg.mapped_address = Some(addr("203.0.113.9:30000"));
        msg.source_address = Some(addr("198.51.100.1:3478"));
        msg.changed_address = Some(addr("198.51.100.2:3479"));
        msg.error_code = None;

        let bytes = msg.encode(None);
        let parsed = StunMessage::parse(&bytes).unwrap();
        assert_eq!(parsed.mapped_address, msg.mapped_address);
        assert_eq!(parsed.changed_address, msg.changed_address);
        assert_eq!(parsed, msg);
    }

    #[test]
    fn error_response_roundtrip() {
        let mut msg = StunMessage::new(MessageType::BindErrorResponse);
        msg.error_code = Some(ErrorCode::new(401, "Unauthorized"));
        msg.unknown_attributes = Some(vec![0x0030, 0x0031]);

        let bytes = msg.encode(None);
        let parsed = StunMessage::parse(&bytes).unwrap();
        assert_eq!(parsed.error_code.as_ref().unwrap().code(), 401);
        assert_eq!(parsed.error_code.as_ref().unwrap().reason, "Unauthorized");
        assert_eq!(
            parsed.unknown_attributes.as_ref().unwrap(),
            &vec![0x0030, 0x0031]
        );
    }

    #[test]
    fn header_length_must_match_buffer() {
        let msg = StunMessage::new(MessageType::BindRequest);
        let mut bytes = msg.encode(None);
        bytes[3] = bytes[3].wrapping_add(4);
        let err = StunMessage::parse(&bytes).unwrap_err();
        assert!(matches!(err, WireError::LengthMismatch { .. }));

        // Truncating the body without fixing the header also fails
        let mut msg2 = StunMessage::new(MessageType::BindRequest);
        msg2.xor_only = true;
        let bytes2 = msg2.encode(None);
        let err = StunMessage::parse(&bytes2[..bytes2.len() - 4]).unwrap_err();
        assert!(matches!(err, WireError::LengthMismatch { .. }));
    }

    #[test]
    fn short_buffer_rejected() {
        let err = StunMessage::parse(&[0u8; 12]).unwrap_err();
        assert_eq!(
            err,
            WireError::TooShort {
                expected: 20,
                actual: 12
            }
        );
    }

    #[test]
    fn unknown_mandatory_attribute_fails_parse() {
        let msg = StunMessage::new(MessageType::BindRequest);
        let mut bytes = msg.encode(None);
        // Append a fabricated attribute in the mandatory range
        bytes.extend_from_slice(&0x0030_u16.to_be_bytes());
        bytes.extend_from_slice(&4_u16.to_be_bytes());
        bytes.extend_from_slice(&[0u8; 4]);
        let attr_len = (bytes.len() - HEADER_SIZE) as u16;
        bytes[2..4].copy_from_slice(&attr_len.to_be_bytes());

        assert_eq!(
            StunMessage::parse(&bytes).unwrap_err(),
            WireError::UnknownMandatoryAttribute(0x0030)
        );
    }

    #[test]
    fn unknown_optional_attribute_skipped() {
        let msg = StunMessage::new(MessageType::BindRequest);
        let mut bytes = msg.encode(None);
        bytes.extend_from_slice(&0x8030_u16.to_be_bytes());
        bytes.extend_from_slice(&4_u16.to_be_bytes());
        bytes.extend_from_slice(&[0xAB; 4]);
        let attr_len = (bytes.len() - HEADER_SIZE) as u16;
        bytes[2..4].copy_from_slice(&attr_len.to_be_bytes());

        let parsed = StunMessage::parse(&bytes).unwrap();
        assert_eq!(parsed.transaction_id, msg.transaction_id);
    }

    #[test]
    fn address_length_enforced() {
        let msg = StunMessage::new(MessageType::BindResponse);
        let mut bytes = msg.encode(None);
        bytes.extend_from_slice(&attr::MAPPED_ADDRESS.to_be_bytes());
        bytes.extend_from_slice(&6_u16.to_be_bytes());
        bytes.extend_from_slice(&[0u8; 6]);
        let attr_len = (bytes.len() - HEADER_SIZE) as u16;
        bytes[2..4].copy_from_slice(&attr_len.to_be_bytes());

        assert_eq!(
            StunMessage::parse(&bytes).unwrap_err(),
            WireError::BadAttributeLength {
                attr: attr::MAPPED_ADDRESS,
                len: 6
            }
        );
    }

    #[test]
    fn string_padding_is_nul_and_aligned() {
        let mut msg = StunMessage::new(MessageType::BindRequest);
        msg.username = Some("abc".into());
        let bytes = msg.encode(None);
        // 20 header + 4 TLV header + 4 padded value
        assert_eq!(bytes.len(), 28);
        assert_eq!(&bytes[24..28], b"abc\0");

        let parsed = StunMessage::parse(&bytes).unwrap();
        assert_eq!(parsed.username.as_deref(), Some("abc"));
    }

    #[test]
    fn signed_message_verifies() {
        let mut msg = StunMessage::new(MessageType::BindRequest);
        msg.username = Some("cpe-0044".into());
        let bytes = msg.encode(Some(b"shared-secret"));

        assert!(verify_integrity(&bytes, b"shared-secret"));
        assert!(!verify_integrity(&bytes, b"wrong-secret"));

        // Signed messages still parse, with the digest surfaced
        let parsed = StunMessage::parse(&bytes).unwrap();
        assert!(parsed.message_integrity.is_some());
        assert_eq!(parsed.username.as_deref(), Some("cpe-0044"));
    }

    #[test]
    fn bit_flip_in_signed_region_fails_verification() {
        let mut msg = StunMessage::new(MessageType::BindRequest);
        msg.username = Some("cpe-0044".into());
        let bytes = msg.encode(Some(b"shared-secret"));

        for i in 0..bytes.len() - INTEGRITY_TLV_LEN {
            let mut tampered = bytes.clone();
            tampered[i] ^= 0x01;
            assert!(
                !verify_integrity(&tampered, b"shared-secret"),
                "flip at byte {i} went undetected"
            );
        }
    }

    #[test]
    fn unsigned_message_does_not_verify() {
        let msg = StunMessage::new(MessageType::BindRequest);
        let bytes = msg.encode(None);
        assert!(!verify_integrity(&bytes, b"shared-secret"));
    }

    #[test]
    fn binding_change_marker_roundtrip() {
        let mut msg = StunMessage::new(MessageType::BindRequest);
        msg.binding_change = true;
        msg.xor_only = true;
        let bytes = msg.encode(None);
        let parsed = StunMessage::parse(&bytes).unwrap();
        assert!(parsed.binding_change);
        assert!(parsed.xor_only);
    }

    #[test]
    fn invalid_message_type_rejected() {
        let mut bytes = StunMessage::new(MessageType::BindRequest).encode(None);
        bytes[0] = 0x7F;
        assert!(matches!(
            StunMessage::parse(&bytes).unwrap_err(),
            WireError::InvalidMessageType(_)
        ));
    }
}
