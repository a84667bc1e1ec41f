//! Engine configuration.
//!
//! The probe polling and discovery margin values are empirically chosen and
//! carried here as configurable constants; the defaults are the values the
//! deployed fleet runs with.

use std::time::Duration;

/// NAT classifier probe battery settings.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Probe rounds before giving up on unanswered tests
    pub rounds: u32,
    /// Poll interval per round
    pub poll_interval: Duration,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            rounds: 7,
            poll_interval: Duration::from_millis(150),
        }
    }
}

/// Timeout-discovery search settings.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// The min..max span is divided into this many steps
    pub search_divisions: u32,
    /// Safety margin, in steps, subtracted from the discovered timeout
    pub margin_steps: f64,
    /// Additional flat safety margin in seconds
    pub margin_base_secs: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            search_divisions: 20,
            margin_steps: 2.5,
            margin_base_secs: 5,
        }
    }
}

impl DiscoveryConfig {
    /// Search step for a configured keepalive period span.
    #[must_use]
    pub fn step(&self, min: u32, max: u32) -> u32 {
        ((max.saturating_sub(min)) / self.search_divisions).max(1)
    }

    /// Margin subtracted from the discovered timeout so the reported
    /// interval stays clear of the NAT's idle-timeout edge.
    #[must_use]
    pub fn margin(&self, step: u32) -> u32 {
        (f64::from(step) * self.margin_steps).round() as u32 + self.margin_base_secs
    }
}

/// Top-level engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Backoff between retries while required parameters are absent
    pub init_retry_backoff: Duration,
    /// Keepalive interval used before discovery has produced one
    pub default_keepalive_secs: u32,
    /// Classifier settings
    pub classifier: ClassifierConfig,
    /// Discovery settings
    pub discovery: DiscoveryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            init_retry_backoff: Duration::from_secs(5),
            default_keepalive_secs: 30,
            classifier: ClassifierConfig::default(),
            discovery: DiscoveryConfig::default(),
        }
    }
}
