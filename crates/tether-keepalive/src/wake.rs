//! Inbound wake-request validation.
//!
//! A datagram arriving on the keepalive socket may be an HTTP-GET-shaped
//! query string instead of a STUN message:
//!
//! ```text
//! GET ?ts=<u64>&id=<u64>&un=<user>&cn=<nonce>&sig=<40-hex HMAC-SHA1> HTTP/1.1
//! ```
//!
//! The signature covers `ts || id || un || cn` keyed with the shared
//! connection-request password. A failed check is "unauthenticated", never a
//! fault: the datagram is dropped and the loop continues.

use tether_wire::integrity;
use zeroize::Zeroizing;

/// Parsed wake-request fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeRequest {
    /// Sender timestamp, must increase across requests
    pub ts: u64,
    /// Message ID, must differ from the last accepted one at equal `ts`
    pub id: u64,
    /// Username, must match the configured connection-request username
    pub username: String,
    /// Client nonce, covered by the signature
    pub cnonce: String,
    /// Hex HMAC-SHA1 signature
    pub signature: String,
}

/// Outcome of validating one wake request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeOutcome {
    /// Authentic, fresh request; caller proceeds to rate limiting
    Accepted,
    /// Username does not match the configured value
    BadUsername,
    /// Signature mismatch
    BadSignature,
    /// `(ts, id)` already processed
    Replayed,
}

/// Try to read a datagram as a wake request.
///
/// Returns `None` for anything that is not a well-formed query string with
/// all five fields present; such datagrams fall through to the STUN parser.
#[must_use]
pub fn parse_wake_request(bytes: &[u8]) -> Option<WakeRequest> {
    let text = std::str::from_utf8(bytes).ok()?;
    let rest = text.strip_prefix("GET ")?;
    let query_end = rest.find(char::is_whitespace).unwrap_or(rest.len());
    let target = &rest[..query_end];
    let query = &target[target.find('?')? + 1..];

    let mut ts = None;
    let mut id = None;
    let mut un = None;
    let mut cn = None;
    let mut sig = None;
    for pair in query.split('&') {
        let (key, value) = pair.split_once('=')?;
        match key {
            "ts" => ts = value.parse().ok(),
            "id" => id = value.parse().ok(),
            "un" => un = Some(value.to_string()),
            "cn" => cn = Some(value.to_string()),
            "sig" => sig = Some(value.to_string()),
            // Unknown query fields are tolerated
            _ => {}
        }
    }

    Some(WakeRequest {
        ts: ts?,
        id: id?,
        username: un?,
        cnonce: cn?,
        signature: sig?,
    })
}

/// Stateful validator: authenticates signatures and rejects replays.
pub struct WakeValidator {
    username: String,
    password: Zeroizing<String>,
    last_accepted: Option<(u64, u64)>,
}

impl WakeValidator {
    /// Validator for the configured connection-request credentials.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Zeroizing::new(password.into()),
            last_accepted: None,
        }
    }

    /// Replace credentials after a configuration change.
    pub fn set_credentials(&mut self, username: impl Into<String>, password: impl Into<String>) {
        self.username = username.into();
        self.password = Zeroizing::new(password.into());
    }

    /// Validate one request, updating replay state only on acceptance.
    pub fn validate(&mut self, req: &WakeRequest) -> WakeOutcome {
        if req.username != self.username {
            return WakeOutcome::BadUsername;
        }

        let signed = format!("{}{}{}{}", req.ts, req.id, req.username, req.cnonce);
        let digest = integrity::hmac_sha1(self.password.as_bytes(), signed.as_bytes());
        if !integrity::digest_matches(&req.signature, &digest) {
            return WakeOutcome::BadSignature;
        }

        if let Some((last_ts, last_id)) = self.last_accepted {
            let stale = req.ts < last_ts || (req.ts == last_ts && req.id == last_id);
            if stale {
                return WakeOutcome::Replayed;
            }
        }

        self.last_accepted = Some((req.ts, req.id));
        WakeOutcome::Accepted
    }
}
