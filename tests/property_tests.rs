//! Property-based tests over the wire codec and the validation helpers.

use proptest::prelude::*;
use std::net::{Ipv4Addr, SocketAddrV4};

use tether_keepalive::ratelimit::{ConnectionFrequencyLog, LOG_CAPACITY};
use tether_keepalive::wake::parse_wake_request;
use tether_wire::{
    verify_integrity, ChangeRequest, ErrorCode, MessageType, StunMessage, TransactionId,
    HEADER_SIZE,
};

fn addr_strategy() -> impl Strategy<Value = SocketAddrV4> {
    (any::<u32>(), any::<u16>())
        .prop_map(|(ip, port)| SocketAddrV4::new(Ipv4Addr::from(ip), port))
}

// Attribute strings are NUL-padded on the wire, so the strategy avoids NUL
fn text_strategy() -> impl Strategy<Value = String> {
    "[A-Za-z0-9 ._:/-]{0,64}"
}

fn message_type_strategy() -> impl Strategy<Value = MessageType> {
    prop_oneof![
        Just(MessageType::BindRequest),
        Just(MessageType::BindResponse),
        Just(MessageType::BindErrorResponse),
        Just(MessageType::SharedSecretRequest),
        Just(MessageType::SharedSecretResponse),
    ]
}

prop_compose! {
    fn message_strategy()(
        msg_type in message_type_strategy(),
        txid in any::<[u8; 16]>(),
        mapped in proptest::option::of(addr_strategy()),
        response in proptest::option::of(addr_strategy()),
        change in proptest::option::of((any::<bool>(), any::<bool>())),
        source in proptest::option::of(addr_strategy()),
        changed in proptest::option::of(addr_strategy()),
        username in proptest::option::of(text_strategy()),
        password in proptest::option::of(text_strategy()),
        error in proptest::option::of((0u8..8, 0u8..100, text_strategy())),
        // Even counts only: odd lists are legitimately re-padded on the wire
        unknown in proptest::option::of(
            proptest::collection::vec(0x8000u16.., 0..4).prop_map(|mut v| {
                if v.len() % 2 != 0 { v.pop(); }
                v
            })
        ),
        reflected in proptest::option::of(addr_strategy()),
        xor_only in any::<bool>(),
        server_name in proptest::option::of(text_strategy()),
        secondary in proptest::option::of(addr_strategy()),
        crb in proptest::option::of(text_strategy()),
        binding_change in any::<bool>(),
    ) -> StunMessage {
        let mut msg = StunMessage::with_transaction_id(msg_type, TransactionId(txid));
        msg.mapped_address = mapped;
        msg.response_address = response;
        msg.change_request = change.map(|(change_ip, change_port)| ChangeRequest {
            change_ip,
            change_port,
        });
        msg.source_address = source;
        msg.changed_address = changed;
        msg.username = username;
        msg.password = password;
        msg.error_code = error.map(|(class, number, reason)| ErrorCode {
            class,
            number,
            reason,
        });
        msg.unknown_attributes = unknown;
        msg.reflected_from = reflected;
        msg.xor_only = xor_only;
        msg.server_name = server_name;
        msg.secondary_address = secondary;
        msg.connection_request_binding = crb;
        msg.binding_change = binding_change;
        msg
    }
}

proptest! {
    #[test]
    fn encode_parse_round_trip(msg in message_strategy()) {
        let wire = msg.encode(None);
        let parsed = StunMessage::parse(&wire).unwrap();
        prop_assert_eq!(parsed, msg);
    }

    #[test]
    fn signed_message_verifies_and_parses(
        msg in message_strategy(),
        secret in proptest::collection::vec(any::<u8>(), 1..32),
    ) {
        let wire = msg.encode(Some(&secret));
        prop_assert!(verify_integrity(&wire, &secret));

        let parsed = StunMessage::parse(&wire).unwrap();
        prop_assert!(parsed.message_integrity.is_some());
        prop_assert_eq!(parsed.transaction_id, msg.transaction_id);
    }

    #[test]
    fn tampered_signed_message_fails_verification(
        msg in message_strategy(),
        secret in proptest::collection::vec(any::<u8>(), 1..32),
        position in any::<prop::sample::Index>(),
    ) {
        let mut wire = msg.encode(Some(&secret));
        // Flip one bit inside the signed region, before the integrity TLV
        let signed_len = wire.len() - 24;
        let idx = position.index(signed_len);
        wire[idx] ^= 0x01;
        prop_assert!(!verify_integrity(&wire, &secret));
    }

    #[test]
    fn parse_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
        let _ = StunMessage::parse(&bytes);
    }

    #[test]
    fn truncated_message_never_parses(msg in message_strategy(), cut in any::<prop::sample::Index>()) {
        let wire = msg.encode(None);
        prop_assume!(wire.len() > HEADER_SIZE);
        // Any proper prefix breaks the header/body length agreement
        let len = cut.index(wire.len() - 1).max(1);
        prop_assert!(StunMessage::parse(&wire[..len]).is_err());
    }

    #[test]
    fn wake_parser_never_panics(text in "\\PC{0,128}") {
        let _ = parse_wake_request(text.as_bytes());
    }

    #[test]
    fn wake_parser_reads_back_formatted_line(
        ts in any::<u64>(),
        id in any::<u64>(),
        un in "[a-z0-9]{1,16}",
        cn in "[a-z0-9]{1,16}",
        sig in "[0-9a-f]{40}",
    ) {
        let line = format!("GET ?ts={ts}&id={id}&un={un}&cn={cn}&sig={sig} HTTP/1.1");
        let req = parse_wake_request(line.as_bytes()).unwrap();
        prop_assert_eq!(req.ts, ts);
        prop_assert_eq!(req.id, id);
        prop_assert_eq!(req.username, un);
        prop_assert_eq!(req.cnonce, cn);
        prop_assert_eq!(req.signature, sig);
    }

    #[test]
    fn frequency_log_never_exceeds_capacity(stamps in proptest::collection::vec(any::<i64>(), 0..300)) {
        let mut log = ConnectionFrequencyLog::new();
        for ts in stamps {
            log.record(ts);
        }
        prop_assert!(log.len() <= LOG_CAPACITY);
    }
}
