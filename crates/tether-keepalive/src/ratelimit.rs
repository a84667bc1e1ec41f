//! Inbound connection-rate limiter.
//!
//! A fixed-capacity ring of recent wake-request timestamps, most recent
//! first. `record` always shifts and inserts; it has no rejecting behavior
//! of its own, so callers must check [`ConnectionFrequencyLog::is_limit_reached`]
//! first and only record requests they decided to accept.

/// Ring capacity. A hard invariant: the log never grows past this.
pub const LOG_CAPACITY: usize = 100;

/// Rate policy: at most `max_requests` within any `period_seconds` window.
#[derive(Debug, Clone, Copy)]
pub struct RatePolicy {
    /// Accepted requests per window; clamped to [`LOG_CAPACITY`]
    pub max_requests: usize,
    /// Window length in seconds
    pub period_seconds: i64,
}

impl Default for RatePolicy {
    fn default() -> Self {
        Self {
            max_requests: 50,
            period_seconds: 60,
        }
    }
}

impl RatePolicy {
    /// Effective request cap: the configured value bounded by what the ring
    /// can actually hold.
    #[must_use]
    pub fn effective_max(&self) -> usize {
        self.max_requests.min(LOG_CAPACITY)
    }
}

/// Fixed-size log of accepted wake-request times (Unix seconds).
#[derive(Debug, Clone)]
pub struct ConnectionFrequencyLog {
    stamps: [i64; LOG_CAPACITY],
    len: usize,
}

impl Default for ConnectionFrequencyLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionFrequencyLog {
    /// Empty log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stamps: [0; LOG_CAPACITY],
            len: 0,
        }
    }

    /// Number of recorded entries (saturates at capacity).
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when nothing has been recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert `now` at the front, evicting the oldest entry when full.
    pub fn record(&mut self, now: i64) {
        self.stamps.copy_within(0..LOG_CAPACITY - 1, 1);
        self.stamps[0] = now;
        self.len = (self.len + 1).min(LOG_CAPACITY);
    }

    /// Whether the accept budget for the window ending at `now` is spent.
    #[must_use]
    pub fn is_limit_reached(&self, policy: &RatePolicy, now: i64) -> bool {
        let in_window = self.stamps[..self.len]
            .iter()
            .filter(|&&ts| now - ts < policy.period_seconds)
            .count();
        in_window >= policy.effective_max()
    }
}
