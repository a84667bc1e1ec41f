//! NAT type classification.
//!
//! A fixed battery of STUN binding tests run over two sockets on consecutive
//! local ports:
//!
//! - test I: plain binding request to the primary server address
//! - test II: binding request asking the server to answer from its
//!   alternate port
//! - test III: binding request asking for the alternate port and IP
//! - test I₂: once the first mapped address is known, a plain request to
//!   the server's changed address, sent from the same socket as test I so
//!   the local endpoint (and thus the NAT mapping under test) stays fixed
//!
//! Unanswered probes are resent every round, up to the configured round
//! count. The decision table is a pure function over the collected results
//! so it can be tested without a network.

use std::net::{Ipv4Addr, SocketAddrV4};

use tether_transport::{can_bind, BindError, RecvError, UdpChannel};
use tether_wire::{ChangeRequest, MessageType, StunMessage, TransactionId};

use crate::config::ClassifierConfig;

/// NAT classification outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NatType {
    /// No response to any plain probe; UDP is blocked outright
    Blocked,
    /// Public address, no NAT, inbound traffic unrestricted
    Open,
    /// Public address but a filter drops unsolicited inbound traffic
    Firewall,
    /// NAT with endpoint-independent filtering (full cone)
    IndependentFilter,
    /// NAT filtering by remote address
    DependentFilter,
    /// NAT filtering by remote address and port
    PortDependentFilter,
    /// NAT assigning a different mapping per destination (symmetric)
    DependentMapping,
    /// Probes produced an inconsistent or incomplete picture
    Unknown,
    /// The battery could not run (socket failure)
    Failure,
}

impl std::fmt::Display for NatType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blocked => write!(f, "UDP blocked"),
            Self::Open => write!(f, "Open (no NAT)"),
            Self::Firewall => write!(f, "Symmetric firewall"),
            Self::IndependentFilter => write!(f, "NAT, independent filtering"),
            Self::DependentFilter => write!(f, "NAT, address-dependent filtering"),
            Self::PortDependentFilter => write!(f, "NAT, port-dependent filtering"),
            Self::DependentMapping => write!(f, "NAT, dependent mapping"),
            Self::Unknown => write!(f, "Unknown"),
            Self::Failure => write!(f, "Detection failure"),
        }
    }
}

/// Raw results of one probe battery run.
#[derive(Debug, Clone, Default)]
pub struct ProbeResults {
    /// Mapped address from the plain probe (test I)
    pub mapped: Option<SocketAddrV4>,
    /// Mapped address from the probe to the changed address (test I₂)
    pub alternate_mapped: Option<SocketAddrV4>,
    /// Whether the change-port probe (test II) was answered
    pub change_port_answered: bool,
    /// Whether the change-port+IP probe (test III) was answered
    pub change_both_answered: bool,
    /// Whether the mapped address could be bound locally (no NAT owns it)
    pub rebind_ok: bool,
}

/// Decision table over collected probe results.
///
/// Tolerates any subset of probes having timed out; an incomplete picture
/// that cannot be classified yields [`NatType::Unknown`].
#[must_use]
pub fn classify_results(results: &ProbeResults) -> NatType {
    let Some(mapped) = results.mapped else {
        return NatType::Blocked;
    };

    if results.rebind_ok {
        // The mapped address is ours: no NAT in the path
        if results.change_port_answered {
            return NatType::Open;
        }
        return NatType::Firewall;
    }

    match results.alternate_mapped {
        Some(alt) if alt == mapped => {
            if results.change_port_answered {
                NatType::IndependentFilter
            } else if results.change_both_answered {
                NatType::DependentFilter
            } else {
                NatType::PortDependentFilter
            }
        }
        Some(_) => NatType::DependentMapping,
        None => NatType::Unknown,
    }
}

/// Classify the NAT between `local_ip` and `server`.
///
/// Standalone diagnostic: no state outlives the call. Socket failures while
/// running the battery yield [`NatType::Failure`].
#[must_use]
pub fn classify(server: SocketAddrV4, local_ip: Ipv4Addr, config: &ClassifierConfig) -> NatType {
    match run_probes(server, local_ip, config) {
        Ok(results) => {
            let nat_type = classify_results(&results);
            tracing::info!(%nat_type, ?results, "NAT classification complete");
            nat_type
        }
        Err(e) => {
            tracing::warn!(error = %e, "NAT probe battery failed");
            NatType::Failure
        }
    }
}

struct ProbeSet {
    plain: TransactionId,
    change_port: TransactionId,
    change_both: TransactionId,
    alternate: TransactionId,
}

/// Run the probe battery and collect raw results.
///
/// # Errors
///
/// Fails only on socket-level problems (bind/send); timeouts are data, not
/// errors.
pub fn run_probes(
    server: SocketAddrV4,
    local_ip: Ipv4Addr,
    config: &ClassifierConfig,
) -> Result<ProbeResults, BindError> {
    let (primary, secondary) = open_consecutive_pair(local_ip)?;
    let local_addr = primary.local_addr().map_err(BindError::Other)?;

    let txids = ProbeSet {
        plain: TransactionId::random(),
        change_port: TransactionId::random(),
        change_both: TransactionId::random(),
        alternate: TransactionId::random(),
    };

    let mut results = ProbeResults::default();
    let mut changed_addr: Option<SocketAddrV4> = None;

    for round in 0..config.rounds {
        if results.mapped.is_none() {
            send_probe(&primary, server, txids.plain, None);
        }
        if !results.change_port_answered {
            send_probe(
                &primary,
                server,
                txids.change_port,
                Some(ChangeRequest {
                    change_ip: false,
                    change_port: true,
                }),
            );
        }
        if !results.change_both_answered {
            send_probe(
                &primary,
                server,
                txids.change_both,
                Some(ChangeRequest {
                    change_ip: true,
                    change_port: true,
                }),
            );
        }
        // Test I₂ must leave from the same local endpoint as test I, or a
        // per-endpoint mapping would differ even on a cone NAT
        if results.mapped.is_some() && results.alternate_mapped.is_none() {
            if let Some(ca) = changed_addr {
                send_probe(&primary, ca, txids.alternate, None);
            }
        }

        let per_socket = config.poll_interval / 2;
        for channel in [&primary, &secondary] {
            let deadline = std::time::Instant::now() + per_socket;
            loop {
                let now = std::time::Instant::now();
                if now >= deadline {
                    break;
                }
                match channel.recv_timeout(deadline - now) {
                    Ok(dgram) => {
                        if let Ok(msg) = StunMessage::parse(&dgram.bytes) {
                            record_answer(&mut results, &mut changed_addr, &txids, &msg);
                        }
                    }
                    Err(RecvError::Timeout) => break,
                    Err(e) => {
                        tracing::debug!(error = %e, round, "probe receive error");
                        break;
                    }
                }
            }
        }

        let done = results.mapped.is_some()
            && results.alternate_mapped.is_some()
            && results.change_port_answered
            && results.change_both_answered;
        if done {
            break;
        }
    }

    if let Some(mapped) = results.mapped {
        results.rebind_ok = mapped == local_addr || can_bind(mapped);
    }

    Ok(results)
}

/// Two sockets on consecutive local ports, as the battery requires.
fn open_consecutive_pair(local_ip: Ipv4Addr) -> Result<(UdpChannel, UdpChannel), BindError> {
    let mut last_err = None;
    for _ in 0..10 {
        let first = UdpChannel::open(local_ip, 0)?;
        let port = first.local_addr().map_err(BindError::Other)?.port();
        let Some(next_port) = port.checked_add(1) else {
            continue;
        };
        match UdpChannel::open(local_ip, next_port) {
            Ok(second) => return Ok((first, second)),
            Err(e @ BindError::Other(_)) => return Err(e),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err
        .unwrap_or_else(|| BindError::Other(std::io::Error::other("no consecutive port pair"))))
}

fn send_probe(
    channel: &UdpChannel,
    dst: SocketAddrV4,
    txid: TransactionId,
    change: Option<ChangeRequest>,
) {
    let mut msg = StunMessage::with_transaction_id(MessageType::BindRequest, txid);
    msg.change_request = change;
    if let Err(e) = channel.send(&msg.encode(None), dst) {
        tracing::debug!(error = %e, %dst, "probe send failed");
    }
}

fn record_answer(
    results: &mut ProbeResults,
    changed_addr: &mut Option<SocketAddrV4>,
    txids: &ProbeSet,
    msg: &StunMessage,
) {
    if msg.transaction_id == txids.plain {
        if results.mapped.is_none() {
            results.mapped = msg.mapped_address;
        }
        if changed_addr.is_none() {
            *changed_addr = msg.changed_address;
        }
    } else if msg.transaction_id == txids.change_port {
        results.change_port_answered = true;
    } else if msg.transaction_id == txids.change_both {
        results.change_both_answered = true;
    } else if msg.transaction_id == txids.alternate && results.alternate_mapped.is_none() {
        results.alternate_mapped = msg.mapped_address;
    }
}
