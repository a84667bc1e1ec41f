//! End-to-end tests: a real engine talking to a scripted STUN server over
//! loopback sockets.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use tether_integration_tests::{init_tracing, wait_for, ServerScript, StunTestServer};
use tether_keepalive::params::names;
use tether_keepalive::{EngineConfig, KeepaliveEngine, MemoryStore, ParameterStore};
use tether_transport::UdpChannel;
use tether_wire::integrity;

const STUN_SECRET: &str = "stun-secret";
const CR_SECRET: &str = "cr-secret";

fn seeded_store(server: SocketAddrV4) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.seed(names::STUN_ENABLE, "1");
    store.seed(names::STUN_SERVER_ADDRESS, &server.ip().to_string());
    store.seed(names::STUN_SERVER_PORT, &server.port().to_string());
    store.seed(names::STUN_USERNAME, "openstb");
    store.seed(names::STUN_PASSWORD, STUN_SECRET);
    store.seed(names::CONNECTION_REQUEST_USERNAME, "openstb");
    store.seed(names::CONNECTION_REQUEST_PASSWORD, CR_SECRET);
    store.seed(names::LAN_IP, "127.0.0.1");
    // Equal periods keep timeout discovery out of these conversations
    store.seed(names::STUN_MIN_KEEPALIVE, "1");
    store.seed(names::STUN_MAX_KEEPALIVE, "1");
    store
}

fn wake_line(ts: u64, id: u64, cnonce: &str) -> Vec<u8> {
    let signed = format!("{ts}{id}openstb{cnonce}");
    let digest = integrity::hmac_sha1(CR_SECRET.as_bytes(), signed.as_bytes());
    format!(
        "GET ?ts={ts}&id={id}&un=openstb&cn={cnonce}&sig={} HTTP/1.1",
        integrity::hex_digest(&digest)
    )
    .into_bytes()
}

fn reported_address(store: &MemoryStore) -> Option<SocketAddrV4> {
    store
        .get_parameter(names::UDP_CONNECTION_REQUEST_ADDRESS)
        .and_then(|v| v.parse().ok())
}

#[test]
fn keepalive_reports_reachability_and_signals_change() {
    init_tracing();
    let server = StunTestServer::spawn(ServerScript::Reflect {
        mapped_override: None,
    });
    let store = seeded_store(server.addr());

    let handle =
        KeepaliveEngine::start(store.clone() as Arc<dyn ParameterStore>, EngineConfig::default())
            .unwrap();

    let mapped = wait_for(Duration::from_secs(10), || reported_address(&store));
    assert_eq!(*mapped.ip(), Ipv4Addr::LOCALHOST);

    // Reflected source equals the LAN address, so no NAT in the path
    wait_for(Duration::from_secs(5), || {
        (store.get_parameter(names::NAT_DETECTED).as_deref() == Some("0")).then_some(())
    });

    // The server saw authenticated requests and the post-change signal
    wait_for(Duration::from_secs(5), || {
        let requests = server.requests();
        (requests
            .iter()
            .any(|r| r.username.as_deref() == Some("openstb"))
            && requests.iter().any(|r| r.binding_change))
        .then_some(())
    });

    handle.shutdown();
}

#[test]
fn mapped_override_sets_nat_detected() {
    init_tracing();
    let mapped = "203.0.113.5:42424".parse().unwrap();
    let server = StunTestServer::spawn(ServerScript::Reflect {
        mapped_override: Some(mapped),
    });
    let store = seeded_store(server.addr());

    let handle =
        KeepaliveEngine::start(store.clone() as Arc<dyn ParameterStore>, EngineConfig::default())
            .unwrap();

    let reported = wait_for(Duration::from_secs(10), || reported_address(&store));
    assert_eq!(reported, mapped);
    wait_for(Duration::from_secs(5), || {
        (store.get_parameter(names::NAT_DETECTED).as_deref() == Some("1")).then_some(())
    });

    handle.shutdown();
}

#[test]
fn wake_request_triggers_one_session_and_survives_junk() {
    init_tracing();
    let server = StunTestServer::spawn(ServerScript::Reflect {
        mapped_override: None,
    });
    let store = seeded_store(server.addr());

    let handle =
        KeepaliveEngine::start(store.clone() as Arc<dyn ParameterStore>, EngineConfig::default())
            .unwrap();

    // The reported address is a real loopback role socket we can reach
    let target = wait_for(Duration::from_secs(10), || reported_address(&store));
    let client = UdpChannel::open(Ipv4Addr::LOCALHOST, 0).unwrap();

    client.send(&wake_line(100, 1, "alpha"), target).unwrap();
    wait_for(Duration::from_secs(5), || {
        (store.session_requests().len() == 1).then_some(())
    });

    // Replaying the identical request is dropped without a session
    client.send(&wake_line(100, 1, "alpha"), target).unwrap();
    // Garbage must not disturb the loop either
    client.send(b"\x00\x01\xff\xff garbage", target).unwrap();
    std::thread::sleep(Duration::from_millis(500));
    assert_eq!(store.session_requests().len(), 1);

    // A fresh timestamp still gets through afterwards
    client.send(&wake_line(101, 2, "beta"), target).unwrap();
    wait_for(Duration::from_secs(5), || {
        (store.session_requests().len() == 2).then_some(())
    });

    handle.shutdown();
}

#[test]
fn unsigned_request_rejected_then_signed_retry_succeeds() {
    init_tracing();
    let server = StunTestServer::spawn(ServerScript::RequireIntegrity {
        secret: STUN_SECRET.as_bytes().to_vec(),
    });
    let store = seeded_store(server.addr());

    let handle =
        KeepaliveEngine::start(store.clone() as Arc<dyn ParameterStore>, EngineConfig::default())
            .unwrap();

    // Credential re-proof converges on a signed request the server accepts
    wait_for(Duration::from_secs(10), || reported_address(&store));
    let requests = server.requests();
    assert!(requests.iter().any(|r| !r.signed));
    assert!(requests.iter().any(|r| r.signed));

    handle.shutdown();
}

#[test]
fn disabled_stun_refuses_to_start() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    store.seed(names::STUN_ENABLE, "0");
    let result =
        KeepaliveEngine::start(store as Arc<dyn ParameterStore>, EngineConfig::default());
    assert!(result.is_err());
}
