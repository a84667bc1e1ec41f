//! Fuzz the wake-request line parser: arbitrary datagram bytes must never
//! panic it.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tether_keepalive::wake::parse_wake_request;

fuzz_target!(|data: &[u8]| {
    let _ = parse_wake_request(data);
});
