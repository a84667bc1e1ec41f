//! Error types for the keepalive engine.

use tether_transport::BindError;
use thiserror::Error;

/// Engine-level errors.
///
/// Nothing in this subsystem terminates the process except a startup bind
/// failure; every other fault is logged inside the role loops and the next
/// iteration carries on.
#[derive(Debug, Error)]
pub enum KeepaliveError {
    /// The initial client socket could not be bound. Fatal: the subsystem
    /// cannot run without it.
    #[error("startup bind failed: {0}")]
    StartupBind(#[from] BindError),

    /// STUN support is administratively disabled in the parameter store.
    #[error("STUN is disabled by configuration")]
    Disabled,

    /// A role thread could not be spawned at startup.
    #[error("thread spawn failed: {0}")]
    Spawn(#[from] std::io::Error),
}
