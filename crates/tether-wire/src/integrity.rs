//! HMAC-SHA1 computation and hex digest comparison.
//!
//! Used by the codec to sign and verify MESSAGE-INTEGRITY, and by the wake
//! request validator to check inbound connection-request signatures. A digest
//! mismatch is never an error here: verification returns `false` and the
//! caller decides whether to drop or still log the event.
//!
//! SHA1 is weak for general cryptography but is what the STUN and TR-111
//! connection-request wire formats mandate; it is used only for protocol
//! compliance.

use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// Length of an HMAC-SHA1 digest in bytes.
pub const DIGEST_LEN: usize = 20;

/// Compute HMAC-SHA1 over `message` with `key`.
#[must_use]
pub fn hmac_sha1(key: &[u8], message: &[u8]) -> [u8; DIGEST_LEN] {
    let mut mac = HmacSha1::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(message);
    mac.finalize().into_bytes().into()
}

/// Lowercase hex rendering of a digest, fixed width, no separators.
#[must_use]
pub fn hex_digest(digest: &[u8]) -> String {
    hex::encode(digest)
}

/// Case-insensitive comparison of a hex-encoded digest against raw bytes.
///
/// Returns `false` on any length or character mismatch; the caller treats
/// that as "unauthenticated", not as a fatal condition.
#[must_use]
pub fn digest_matches(expected_hex: &str, digest: &[u8]) -> bool {
    if expected_hex.len() != digest.len() * 2 {
        return false;
    }
    expected_hex.eq_ignore_ascii_case(&hex::encode(digest))
}
