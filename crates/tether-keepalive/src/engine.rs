//! The keepalive state machine.
//!
//! Three cooperating roles, one OS thread each:
//!
//! - **Role A** (binding loop) keeps the primary NAT binding alive, detects
//!   WAN address changes, and starts timeout discovery once.
//! - **Role B** (discovery management) runs the same conversation on its own
//!   sockets and restarts timeout discovery when the WAN binding moves,
//!   cancelling a running search instead of stacking a second one.
//! - **Role C** (timeout discovery, [`crate::discovery`]) self-terminates on
//!   convergence and writes its result into the shared interval field.
//!
//! The only shared-mutable region is [`DiscoveryShared`] behind one mutex
//! per engine, held for field reads and updates only, never across a socket
//! call or sleep. Every blocking receive uses the current keepalive interval
//! as its timeout; a timeout is the expected steady-state outcome.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tether_transport::{Datagram, RecvError, UdpChannel};
use tether_wire::{verify_integrity, MessageType, StunMessage, TransactionId};
use zeroize::Zeroizing;

use crate::classify;
use crate::config::EngineConfig;
use crate::discovery::{discover_timeout, DiscoveryProbe};
use crate::error::KeepaliveError;
use crate::params::{self, names, ParameterStore, ParameterType};
use crate::ratelimit::{ConnectionFrequencyLog, RatePolicy};
use crate::wake::{parse_wake_request, WakeOutcome, WakeValidator};

/// Marker value carried in the CONNECTION-REQUEST-BINDING attribute.
const CONNECTION_REQUEST_BINDING_MARKER: &str = "dslforum.org/TR-111 ";

/// Entity name passed to the store when a wake request is accepted.
const WAKE_ENTITY: &str = "udp-connection-request";

/// Runtime STUN configuration pulled from the parameter store.
#[derive(Debug, Clone)]
pub struct StunSettings {
    /// STUN server address
    pub server: SocketAddrV4,
    /// Long-lived STUN username
    pub username: String,
    /// Long-lived STUN password (integrity key)
    pub password: Zeroizing<String>,
    /// Smallest permitted keepalive period, seconds
    pub min_keepalive: u32,
    /// Largest permitted keepalive period, seconds
    pub max_keepalive: u32,
    /// LAN-side address the client sockets bind to
    pub lan_ip: Ipv4Addr,
    /// Username expected on inbound wake requests
    pub cr_username: String,
    /// Shared secret for wake-request signatures
    pub cr_password: Zeroizing<String>,
    /// ACS URL, reported alongside reachability changes
    pub acs_url: String,
}

impl StunSettings {
    /// Load settings, blocking with a fixed backoff until the values this
    /// subsystem cannot default (credentials, server address, LAN IP) are
    /// provisioned.
    ///
    /// # Errors
    ///
    /// [`KeepaliveError::Disabled`] when the STUN enable flag is off.
    pub fn load(store: &dyn ParameterStore, config: &EngineConfig) -> Result<Self, KeepaliveError> {
        let enabled = store
            .get_parameter(names::STUN_ENABLE)
            .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));
        if !enabled {
            return Err(KeepaliveError::Disabled);
        }

        let backoff = config.init_retry_backoff;
        let host = params::blocking_get(store, names::STUN_SERVER_ADDRESS, backoff);
        let port = params::get_or_default(store, names::STUN_SERVER_PORT, 3478_u16);
        let server = resolve_server(&host, port, backoff);

        let username = params::blocking_get(store, names::STUN_USERNAME, backoff);
        let password = Zeroizing::new(params::blocking_get(store, names::STUN_PASSWORD, backoff));
        let cr_username =
            params::blocking_get(store, names::CONNECTION_REQUEST_USERNAME, backoff);
        let cr_password = Zeroizing::new(params::blocking_get(
            store,
            names::CONNECTION_REQUEST_PASSWORD,
            backoff,
        ));
        let lan_ip = blocking_lan_ip(store, backoff);

        let min_keepalive =
            params::get_or_default(store, names::STUN_MIN_KEEPALIVE, config.default_keepalive_secs);
        let max_keepalive =
            params::get_or_default(store, names::STUN_MAX_KEEPALIVE, 3600_u32).max(min_keepalive);
        let acs_url = store.get_parameter(names::ACS_URL).unwrap_or_default();

        Ok(Self {
            server,
            username,
            password,
            min_keepalive,
            max_keepalive,
            lan_ip,
            cr_username,
            cr_password,
            acs_url,
        })
    }
}

fn resolve_server(host: &str, port: u16, backoff: Duration) -> SocketAddrV4 {
    loop {
        let resolved = (host, port).to_socket_addrs().ok().and_then(|mut addrs| {
            addrs.find_map(|a| match a {
                SocketAddr::V4(v4) => Some(v4),
                SocketAddr::V6(_) => None,
            })
        });
        if let Some(addr) = resolved {
            return addr;
        }
        tracing::warn!(host, port, "STUN server does not resolve to IPv4, retrying");
        std::thread::sleep(backoff);
    }
}

fn blocking_lan_ip(store: &dyn ParameterStore, backoff: Duration) -> Ipv4Addr {
    loop {
        let value = params::blocking_get(store, names::LAN_IP, backoff);
        match value.parse() {
            Ok(ip) => return ip,
            Err(_) => {
                tracing::warn!(value, "LAN IP parameter is not an IPv4 address, retrying");
                std::thread::sleep(backoff);
            }
        }
    }
}

fn load_rate_policy(store: &dyn ParameterStore) -> RatePolicy {
    let defaults = RatePolicy::default();
    RatePolicy {
        max_requests: params::get_or_default(
            store,
            names::MAX_UDP_CONNECTION_REQUESTS,
            defaults.max_requests,
        ),
        period_seconds: params::get_or_default(
            store,
            names::UDP_CONNECTION_REQUEST_PERIOD,
            defaults.period_seconds,
        ),
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// External-notification progress for the discovered WAN address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NotifyState {
    /// No WAN address learned or reported yet
    NotNotified,
    /// Store informed of the current reachability string
    Notified,
    /// Reported address held through a full iteration; discovery may start
    Validated,
}

/// Fields shared between Roles A/B and Role C. One mutex per engine.
#[derive(Default)]
struct DiscoveryShared {
    /// Discovered keepalive interval, seconds
    interval: Option<u32>,
    /// A discovery search has been started at least once
    started: bool,
    /// A search thread is currently alive
    running: bool,
    /// Ask the running search to stop at its next window boundary
    cancel: bool,
    /// Transaction ID of the in-flight discovery probe
    expected_txid: Option<TransactionId>,
    /// A response to the in-flight probe arrived during the window
    response_seen: bool,
    /// Search thread handle; the search clears it as it exits
    handle: Option<JoinHandle<()>>,
}

/// Which conversation a context is driving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    /// Role A
    Binding,
    /// Role B
    DiscoveryManagement,
}

impl Role {
    fn name(self) -> &'static str {
        match self {
            Self::Binding => "binding",
            Self::DiscoveryManagement => "discovery-mgmt",
        }
    }
}

/// Per-role long-lived state: socket, credentials, last WAN observation,
/// wake-request gate, and the shared discovery region.
struct KeepaliveContext {
    role: Role,
    channel: UdpChannel,
    settings: StunSettings,
    store: Arc<dyn ParameterStore>,
    config: EngineConfig,
    last_received: Option<MessageType>,
    wan: Option<SocketAddrV4>,
    nat_detected: bool,
    notify_state: NotifyState,
    wake: WakeValidator,
    freq_log: ConnectionFrequencyLog,
    rate: RatePolicy,
    discovery: Arc<Mutex<DiscoveryShared>>,
    discovery_spawned_for: Option<SocketAddrV4>,
    stop: Arc<AtomicBool>,
}

impl KeepaliveContext {
    fn new(
        role: Role,
        settings: StunSettings,
        store: Arc<dyn ParameterStore>,
        config: EngineConfig,
        discovery: Arc<Mutex<DiscoveryShared>>,
        stop: Arc<AtomicBool>,
    ) -> Result<Self, KeepaliveError> {
        // Startup bind failure is the one fatal condition in this subsystem
        let channel = UdpChannel::open(settings.lan_ip, 0)?;
        let wake = WakeValidator::new(settings.cr_username.as_str(), settings.cr_password.as_str());
        let rate = load_rate_policy(store.as_ref());
        Ok(Self {
            role,
            channel,
            settings,
            store,
            config,
            last_received: None,
            wan: None,
            nat_detected: false,
            notify_state: NotifyState::NotNotified,
            wake,
            freq_log: ConnectionFrequencyLog::new(),
            rate,
            discovery,
            discovery_spawned_for: None,
            stop,
        })
    }

    /// Current keepalive interval: the discovered value once Role C has
    /// converged, the configured minimum before that.
    fn current_interval(&self) -> u32 {
        let discovered = self.discovery.lock().unwrap().interval;
        discovered
            .unwrap_or(self.settings.min_keepalive)
            .max(1)
    }

    /// Build the next outbound keepalive request. After a binding error
    /// response the request is integrity-signed as credential re-proof.
    fn next_request(&self) -> Vec<u8> {
        let mut msg = StunMessage::new(MessageType::BindRequest);
        msg.username = Some(self.settings.username.clone());
        msg.connection_request_binding = Some(CONNECTION_REQUEST_BINDING_MARKER.to_string());
        if self.last_received == Some(MessageType::BindErrorResponse) {
            msg.encode(Some(self.settings.password.as_bytes()))
        } else {
            msg.encode(None)
        }
    }

    /// One full iteration of the binding conversation.
    fn iteration(&mut self) {
        self.refresh_lan_ip();

        // The reported address survived a full iteration: discovery may start
        if self.notify_state == NotifyState::Notified && self.wan.is_some() {
            self.notify_state = NotifyState::Validated;
        }

        let request = self.next_request();
        if let Err(e) = self.channel.send(&request, self.settings.server) {
            tracing::warn!(role = self.role.name(), error = %e, "keepalive send failed");
        }

        let timeout = Duration::from_secs(u64::from(self.current_interval()));
        match self.channel.recv_timeout(timeout) {
            Ok(dgram) => self.handle_datagram(&dgram),
            Err(RecvError::Timeout) => {
                tracing::trace!(role = self.role.name(), "keepalive window idle");
            }
            Err(e) => {
                tracing::warn!(role = self.role.name(), error = %e, "keepalive receive failed");
            }
        }

        match self.role {
            Role::Binding => self.maybe_start_discovery(),
            Role::DiscoveryManagement => self.maybe_restart_discovery(),
        }
    }

    fn run(mut self) {
        tracing::info!(role = self.role.name(), server = %self.settings.server, "role started");
        while !self.stop.load(Ordering::Relaxed) {
            self.iteration();
        }
        tracing::info!(role = self.role.name(), "role stopped");
    }

    /// Re-read the LAN IP and reopen the socket when it moved. A failed
    /// reopen keeps the old socket and retries next iteration.
    fn refresh_lan_ip(&mut self) {
        let Some(value) = self.store.get_parameter(names::LAN_IP) else {
            return;
        };
        let Ok(ip) = value.parse::<Ipv4Addr>() else {
            return;
        };
        if ip == self.settings.lan_ip {
            return;
        }
        match UdpChannel::open(ip, 0) {
            Ok(channel) => {
                tracing::info!(role = self.role.name(), old = %self.settings.lan_ip, new = %ip, "LAN IP changed, socket reopened");
                self.channel = channel;
                self.settings.lan_ip = ip;
            }
            Err(e) => {
                tracing::warn!(role = self.role.name(), new = %ip, error = %e, "LAN IP changed but rebind failed");
            }
        }
    }

    /// Dispatch one received datagram: wake request, STUN message, or junk.
    fn handle_datagram(&mut self, dgram: &Datagram) {
        if let Some(req) = parse_wake_request(&dgram.bytes) {
            self.handle_wake(&req);
            return;
        }
        match StunMessage::parse(&dgram.bytes) {
            Ok(msg) => self.handle_stun(&dgram.bytes, msg),
            Err(e) => {
                tracing::warn!(role = self.role.name(), source = %dgram.source, error = %e, "malformed datagram dropped");
            }
        }
    }

    fn handle_stun(&mut self, raw: &[u8], msg: StunMessage) {
        // Responses to in-flight discovery probes are bookkeeping only
        {
            let mut shared = self.discovery.lock().unwrap();
            if shared.expected_txid == Some(msg.transaction_id) {
                shared.response_seen = true;
                drop(shared);
                tracing::debug!(role = self.role.name(), "discovery probe response recorded");
                return;
            }
        }

        if msg.message_integrity.is_some()
            && !verify_integrity(raw, self.settings.password.as_bytes())
        {
            tracing::warn!(role = self.role.name(), "integrity check failed, response untrusted");
            return;
        }

        match msg.msg_type {
            MessageType::BindResponse => {
                self.last_received = Some(MessageType::BindResponse);
                if let Some(mapped) = msg.mapped_address {
                    if self.wan != Some(mapped) {
                        self.apply_wan_change(mapped);
                    }
                }
            }
            MessageType::BindErrorResponse => {
                self.last_received = Some(MessageType::BindErrorResponse);
                let code = msg.error_code.map_or(0, |ec| ec.code());
                tracing::info!(role = self.role.name(), code, "binding error, re-proving credentials");
            }
            other => {
                tracing::debug!(role = self.role.name(), ?other, "unexpected message type ignored");
            }
        }
    }

    /// The mapped address moved: report reachability, signal the server,
    /// and recompute NAT presence.
    fn apply_wan_change(&mut self, mapped: SocketAddrV4) {
        tracing::info!(
            role = self.role.name(),
            old = ?self.wan,
            new = %mapped,
            acs = %self.settings.acs_url,
            "WAN binding changed"
        );
        self.wan = Some(mapped);

        let reachability = mapped.to_string();
        self.store.set_parameter(
            names::UDP_CONNECTION_REQUEST_ADDRESS,
            ParameterType::String,
            &reachability,
        );
        self.notify_state = NotifyState::Notified;

        let mut probe = StunMessage::new(MessageType::BindRequest);
        probe.username = Some(self.settings.username.clone());
        probe.binding_change = true;
        if let Err(e) = self.channel.send(&probe.encode(None), self.settings.server) {
            tracing::warn!(role = self.role.name(), error = %e, "binding-change probe send failed");
        }

        self.nat_detected = *mapped.ip() != self.settings.lan_ip;
        self.store.set_parameter(
            names::NAT_DETECTED,
            ParameterType::Boolean,
            if self.nat_detected { "1" } else { "0" },
        );
    }

    /// Authenticate an inbound wake request and, budget permitting, ask the
    /// agent for a management session. Rejections and throttled requests
    /// are dropped silently per policy.
    fn handle_wake(&mut self, req: &crate::wake::WakeRequest) {
        match self.wake.validate(req) {
            WakeOutcome::Accepted => {
                let now = unix_now();
                if self.freq_log.is_limit_reached(&self.rate, now) {
                    tracing::debug!(role = self.role.name(), "wake request over rate limit, dropped");
                    return;
                }
                self.freq_log.record(now);
                tracing::info!(role = self.role.name(), ts = req.ts, id = req.id, "wake request accepted");
                if let Err(fault) = self.store.request_management_session(WAKE_ENTITY) {
                    tracing::warn!(role = self.role.name(), error = %fault, "management session refused");
                }
            }
            outcome => {
                tracing::debug!(role = self.role.name(), ?outcome, "wake request rejected");
            }
        }
    }

    fn discovery_enabled(&self) -> bool {
        self.settings.min_keepalive < self.settings.max_keepalive
    }

    /// Role A: start timeout discovery exactly once.
    fn maybe_start_discovery(&mut self) {
        if self.notify_state != NotifyState::Validated || !self.discovery_enabled() {
            return;
        }
        {
            let mut shared = self.discovery.lock().unwrap();
            if shared.started {
                return;
            }
            shared.started = true;
            shared.running = true;
            shared.cancel = false;
        }
        if self.spawn_discovery_thread() {
            self.discovery_spawned_for = self.wan;
        } else {
            let mut shared = self.discovery.lock().unwrap();
            shared.started = false;
            shared.running = false;
        }
    }

    /// Role B: restart discovery when the WAN binding moved. A running
    /// search is cancelled first and replaced on a later iteration.
    fn maybe_restart_discovery(&mut self) {
        if self.notify_state != NotifyState::Validated || !self.discovery_enabled() {
            return;
        }
        if self.discovery_spawned_for == self.wan {
            return;
        }
        {
            let mut shared = self.discovery.lock().unwrap();
            if shared.running {
                shared.cancel = true;
                tracing::debug!(role = self.role.name(), "cancelling stale discovery search");
                return;
            }
            shared.started = true;
            shared.running = true;
            shared.cancel = false;
        }
        if self.spawn_discovery_thread() {
            self.discovery_spawned_for = self.wan;
        } else {
            let mut shared = self.discovery.lock().unwrap();
            shared.running = false;
        }
    }

    /// Spawn Role C. Returns `false` (and logs) when its socket or thread
    /// could not be created; the caller resets the lifecycle flags.
    fn spawn_discovery_thread(&mut self) -> bool {
        let Some(wan) = self.wan else {
            return false;
        };
        let channel = match UdpChannel::open(self.settings.lan_ip, 0) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "discovery socket bind failed");
                return false;
            }
        };

        let shared = Arc::clone(&self.discovery);
        let server = self.settings.server;
        let username = self.settings.username.clone();
        let (min, max) = (self.settings.min_keepalive, self.settings.max_keepalive);
        let discovery_config = self.config.discovery.clone();

        let spawned = std::thread::Builder::new()
            .name("tether-discovery".into())
            .spawn(move || {
                let mut probe = BindingProbe {
                    channel,
                    server,
                    response_target: wan,
                    username,
                    shared: Arc::clone(&shared),
                };
                let reported = discover_timeout(&mut probe, min, max, &discovery_config);
                let mut s = shared.lock().unwrap();
                if s.cancel {
                    tracing::debug!("discovery search cancelled, result discarded");
                } else {
                    s.interval = Some(reported);
                }
                s.running = false;
                s.expected_txid = None;
                s.handle = None;
            });

        match spawned {
            Ok(handle) => {
                let mut s = self.discovery.lock().unwrap();
                // The search may already have finished and cleared itself
                if s.running {
                    s.handle = Some(handle);
                }
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "discovery thread spawn failed");
                false
            }
        }
    }
}

/// Production [`DiscoveryProbe`]: a bind request whose RESPONSE-ADDRESS
/// points back at the WAN binding, so the answer only arrives if the NAT
/// entry for that binding survived the window.
struct BindingProbe {
    channel: UdpChannel,
    server: SocketAddrV4,
    response_target: SocketAddrV4,
    username: String,
    shared: Arc<Mutex<DiscoveryShared>>,
}

impl DiscoveryProbe for BindingProbe {
    fn send_probe(&mut self) -> bool {
        let mut msg = StunMessage::new(MessageType::BindRequest);
        msg.username = Some(self.username.clone());
        msg.response_address = Some(self.response_target);
        {
            let mut s = self.shared.lock().unwrap();
            s.expected_txid = Some(msg.transaction_id);
            s.response_seen = false;
        }
        match self.channel.send(&msg.encode(None), self.server) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "discovery probe send failed");
                false
            }
        }
    }

    fn await_window(&mut self, interval_secs: u32) -> bool {
        std::thread::sleep(Duration::from_secs(u64::from(interval_secs)));
        self.shared.lock().unwrap().response_seen
    }

    fn cancelled(&self) -> bool {
        self.shared.lock().unwrap().cancel
    }
}

/// Engine facade: loads settings, runs the startup NAT diagnostic, and
/// spawns the Role A and Role B threads.
pub struct KeepaliveEngine;

impl KeepaliveEngine {
    /// Start the subsystem.
    ///
    /// Blocks until the required parameters are provisioned, then binds the
    /// role sockets and spawns the role threads.
    ///
    /// # Errors
    ///
    /// [`KeepaliveError::Disabled`] when STUN is switched off,
    /// [`KeepaliveError::StartupBind`] when a role socket cannot be bound,
    /// [`KeepaliveError::Spawn`] when a role thread cannot be created.
    pub fn start(
        store: Arc<dyn ParameterStore>,
        config: EngineConfig,
    ) -> Result<KeepaliveHandle, KeepaliveError> {
        let settings = StunSettings::load(store.as_ref(), &config)?;

        let nat_type = classify::classify(settings.server, settings.lan_ip, &config.classifier);
        tracing::info!(%nat_type, server = %settings.server, "startup NAT diagnostic");

        let stop = Arc::new(AtomicBool::new(false));
        let discovery = Arc::new(Mutex::new(DiscoveryShared::default()));

        let ctx_a = KeepaliveContext::new(
            Role::Binding,
            settings.clone(),
            Arc::clone(&store),
            config.clone(),
            Arc::clone(&discovery),
            Arc::clone(&stop),
        )?;
        let ctx_b = KeepaliveContext::new(
            Role::DiscoveryManagement,
            settings,
            store,
            config,
            discovery,
            Arc::clone(&stop),
        )?;

        let binding = std::thread::Builder::new()
            .name("tether-binding".into())
            .spawn(move || ctx_a.run())?;
        let management = std::thread::Builder::new()
            .name("tether-discovery-mgmt".into())
            .spawn(move || ctx_b.run())?;

        Ok(KeepaliveHandle {
            stop,
            threads: vec![binding, management],
        })
    }
}

/// Handle to the running role threads.
///
/// Roles run for the process lifetime in normal operation; `shutdown` exists
/// for orderly process exit and tests.
pub struct KeepaliveHandle {
    stop: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl KeepaliveHandle {
    /// Signal all roles to stop and wait for them. Each role notices the
    /// flag within one keepalive interval.
    pub fn shutdown(self) {
        self.stop.store(true, Ordering::Relaxed);
        for thread in self.threads {
            let _ = thread.join();
        }
    }
}
