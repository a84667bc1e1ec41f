//! Fuzz the STUN message parser: must never panic, and anything it accepts
//! must survive a re-encode and re-parse.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tether_wire::StunMessage;

fuzz_target!(|data: &[u8]| {
    if let Ok(msg) = StunMessage::parse(data) {
        let wire = msg.encode(None);
        let _ = StunMessage::parse(&wire);
    }
    let _ = tether_wire::verify_integrity(data, b"fuzz-secret");
});
