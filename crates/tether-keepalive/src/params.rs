//! Parameter-store seam.
//!
//! The keepalive subsystem does not own configuration or persistence; it
//! consumes a get/set-by-name interface from the surrounding management
//! agent and asks it to open management sessions. Everything crosses this
//! trait as strings, matching the agent's parameter model.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;

/// Data type hint for `set_parameter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterType {
    /// Free-form string
    String,
    /// Unsigned integer
    Unsigned,
    /// Boolean ("0"/"1")
    Boolean,
}

/// Fault returned when a management session cannot be requested.
#[derive(Debug, Error)]
#[error("management session request refused: {reason}")]
pub struct SessionFault {
    /// Collaborator-supplied refusal reason
    pub reason: String,
}

/// Interface to the management agent's parameter store.
pub trait ParameterStore: Send + Sync {
    /// Fetch a parameter value by full path name.
    fn get_parameter(&self, name: &str) -> Option<String>;

    /// Store a parameter value. Returns `false` if the store refused it.
    fn set_parameter(&self, name: &str, ty: ParameterType, value: &str) -> bool;

    /// Ask the agent to start a management session toward the ACS on behalf
    /// of `entity`.
    ///
    /// # Errors
    ///
    /// Returns a [`SessionFault`] when the agent refuses.
    fn request_management_session(&self, entity: &str) -> Result<(), SessionFault>;
}

/// Parameter paths consumed by this subsystem (TR-069 ManagementServer
/// subtree plus the LAN-side address).
pub mod names {
    /// STUN enable flag
    pub const STUN_ENABLE: &str = "InternetGatewayDevice.ManagementServer.STUNEnable";
    /// STUN server host
    pub const STUN_SERVER_ADDRESS: &str =
        "InternetGatewayDevice.ManagementServer.STUNServerAddress";
    /// STUN server port
    pub const STUN_SERVER_PORT: &str = "InternetGatewayDevice.ManagementServer.STUNServerPort";
    /// Long-lived STUN username
    pub const STUN_USERNAME: &str = "InternetGatewayDevice.ManagementServer.STUNUsername";
    /// Long-lived STUN password
    pub const STUN_PASSWORD: &str = "InternetGatewayDevice.ManagementServer.STUNPassword";
    /// Smallest keepalive period the ACS permits
    pub const STUN_MIN_KEEPALIVE: &str =
        "InternetGatewayDevice.ManagementServer.STUNMinimumKeepAlivePeriod";
    /// Largest keepalive period the ACS permits
    pub const STUN_MAX_KEEPALIVE: &str =
        "InternetGatewayDevice.ManagementServer.STUNMaximumKeepAlivePeriod";
    /// Reported NAT presence
    pub const NAT_DETECTED: &str = "InternetGatewayDevice.ManagementServer.NATDetected";
    /// Reported UDP reachability ("ip:port")
    pub const UDP_CONNECTION_REQUEST_ADDRESS: &str =
        "InternetGatewayDevice.ManagementServer.UDPConnectionRequestAddress";
    /// Username expected on inbound wake requests
    pub const CONNECTION_REQUEST_USERNAME: &str =
        "InternetGatewayDevice.ManagementServer.ConnectionRequestUsername";
    /// Shared secret for inbound wake-request signatures
    pub const CONNECTION_REQUEST_PASSWORD: &str =
        "InternetGatewayDevice.ManagementServer.ConnectionRequestPassword";
    /// ACS URL
    pub const ACS_URL: &str = "InternetGatewayDevice.ManagementServer.URL";
    /// LAN-side IP the client sockets bind to
    pub const LAN_IP: &str =
        "InternetGatewayDevice.LANDevice.1.LANHostConfigManagement.IPInterface.1.IPInterfaceIPAddress";
    /// Wake requests accepted per period before throttling
    pub const MAX_UDP_CONNECTION_REQUESTS: &str =
        "InternetGatewayDevice.ManagementServer.X_TETHER_MaxUDPConnectionRequests";
    /// Throttling window in seconds
    pub const UDP_CONNECTION_REQUEST_PERIOD: &str =
        "InternetGatewayDevice.ManagementServer.X_TETHER_UDPConnectionRequestPeriod";
}

/// Block until `name` is present, retrying with a fixed backoff.
///
/// Used for the parameters this subsystem cannot default (credentials,
/// server address): configuration-missing at startup is not an error, the
/// initializer waits for the ACS to provision the value.
pub fn blocking_get(store: &dyn ParameterStore, name: &str, backoff: Duration) -> String {
    loop {
        if let Some(value) = store.get_parameter(name) {
            if !value.is_empty() {
                return value;
            }
        }
        tracing::warn!(parameter = name, "required parameter absent, retrying");
        std::thread::sleep(backoff);
    }
}

/// Fetch and parse a parameter, falling back to `default` when it is absent
/// or malformed.
pub fn get_or_default<T: FromStr + Copy>(store: &dyn ParameterStore, name: &str, default: T) -> T {
    store
        .get_parameter(name)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// In-memory store for tests and bench harnesses.
///
/// Records every management-session request so scenarios can assert how
/// many times a wake request actually got through.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
    sessions: Mutex<Vec<String>>,
}

impl MemoryStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a parameter value.
    pub fn seed(&self, name: &str, value: &str) {
        self.values
            .lock()
            .unwrap()
            .insert(name.to_string(), value.to_string());
    }

    /// Entities that requested a management session, in order.
    #[must_use]
    pub fn session_requests(&self) -> Vec<String> {
        self.sessions.lock().unwrap().clone()
    }
}

impl ParameterStore for MemoryStore {
    fn get_parameter(&self, name: &str) -> Option<String> {
        self.values.lock().unwrap().get(name).cloned()
    }

    fn set_parameter(&self, name: &str, _ty: ParameterType, value: &str) -> bool {
        self.values
            .lock()
            .unwrap()
            .insert(name.to_string(), value.to_string());
        true
    }

    fn request_management_session(&self, entity: &str) -> Result<(), SessionFault> {
        self.sessions.lock().unwrap().push(entity.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_get_set() {
        let store = MemoryStore::new();
        assert_eq!(store.get_parameter(names::STUN_USERNAME), None);
        assert!(store.set_parameter(names::STUN_USERNAME, ParameterType::String, "openstb"));
        assert_eq!(
            store.get_parameter(names::STUN_USERNAME).as_deref(),
            Some("openstb")
        );
    }

    #[test]
    fn get_or_default_parses_and_falls_back() {
        let store = MemoryStore::new();
        store.seed(names::STUN_SERVER_PORT, "3478");
        assert_eq!(get_or_default(&store, names::STUN_SERVER_PORT, 0_u16), 3478);
        assert_eq!(get_or_default(&store, names::STUN_MIN_KEEPALIVE, 30_u32), 30);
        store.seed(names::STUN_MIN_KEEPALIVE, "not-a-number");
        assert_eq!(get_or_default(&store, names::STUN_MIN_KEEPALIVE, 30_u32), 30);
    }

    #[test]
    fn blocking_get_returns_seeded_value() {
        let store = MemoryStore::new();
        store.seed(names::STUN_SERVER_ADDRESS, "stun.example.net");
        let v = blocking_get(&store, names::STUN_SERVER_ADDRESS, Duration::from_millis(1));
        assert_eq!(v, "stun.example.net");
    }

    #[test]
    fn session_requests_recorded_in_order() {
        let store = MemoryStore::new();
        store.request_management_session("a").unwrap();
        store.request_management_session("b").unwrap();
        assert_eq!(store.session_requests(), vec!["a", "b"]);
    }
}
