//! # Tether Keepalive
//!
//! The NAT-traversal keepalive engine of a CPE management agent.
//!
//! This crate provides:
//! - NAT type classification over a two-socket STUN probe battery
//! - The three-role keepalive state machine (binding loop, discovery
//!   management, timeout discovery) running on plain OS threads
//! - Inbound UDP wake-request validation and rate limiting
//! - The parameter-store seam to the rest of the management agent
//!
//! ## Roles
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Role A - binding loop                                        │
//! │   keeps the primary NAT binding alive, detects WAN changes   │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Role B - discovery management                                │
//! │   parallel conversation on its own sockets, starts Role C    │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Role C - timeout discovery                                   │
//! │   stepped interval search for the NAT idle-binding timeout,  │
//! │   self-terminates on convergence                             │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Roles A and B read the discovered interval; Role C writes it. That
//! shared region lives behind a single per-context mutex held only for the
//! read or update, never across a socket call or sleep.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod classify;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod params;
pub mod ratelimit;
pub mod wake;

pub use classify::{classify, NatType};
pub use config::{ClassifierConfig, DiscoveryConfig, EngineConfig};
pub use discovery::{discover_timeout, DiscoveryProbe};
pub use engine::{KeepaliveEngine, KeepaliveHandle};
pub use error::KeepaliveError;
pub use params::{MemoryStore, ParameterStore, ParameterType, SessionFault};
pub use ratelimit::{ConnectionFrequencyLog, RatePolicy};
pub use wake::{parse_wake_request, WakeOutcome, WakeRequest, WakeValidator};
