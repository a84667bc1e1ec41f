//! NAT binding-timeout discovery (Role C).
//!
//! A stepped interval search: starting at the minimum keepalive period, send
//! a lightweight probe, wait out the candidate interval, and check whether
//! the probe's response made it back through the NAT binding. Each survived
//! interval extends the candidate by one step; the first silent window (or
//! exceeding the maximum) ends the search. The reported interval backs off
//! from the discovered edge by a configured safety margin.
//!
//! The search runs over a [`DiscoveryProbe`] so the engine can plug in the
//! real socket conversation while tests drive it with a simulated responder
//! and no real sleeps.

use crate::config::DiscoveryConfig;

/// One probe/wait conversation used by the interval search.
pub trait DiscoveryProbe {
    /// Emit one discovery probe. Returns `false` when sending failed and
    /// the search should stop with what it has.
    fn send_probe(&mut self) -> bool;

    /// Wait out `interval_secs`, then report whether a response to the
    /// probe was recorded during the window.
    fn await_window(&mut self, interval_secs: u32) -> bool;

    /// Whether the search was cancelled from outside (checked between
    /// windows, never mid-sleep).
    fn cancelled(&self) -> bool {
        false
    }
}

/// Run the interval search and return the keepalive interval to report.
///
/// With `min == max` discovery is administratively disabled and `min` is
/// returned untouched. Otherwise the search walks `min, min+step, ...`
/// until a window goes unanswered or the candidate exceeds `max`, then
/// subtracts the safety margin and clamps into `[min, max]`.
pub fn discover_timeout(
    probe: &mut dyn DiscoveryProbe,
    min: u32,
    max: u32,
    config: &DiscoveryConfig,
) -> u32 {
    if min >= max {
        tracing::debug!(min, max, "timeout discovery disabled by configuration");
        return min;
    }

    let step = config.step(min, max);
    let mut timeout = min;

    loop {
        if probe.cancelled() || !probe.send_probe() {
            break;
        }
        let answered = probe.await_window(timeout);
        if probe.cancelled() {
            break;
        }
        if !answered {
            tracing::debug!(timeout, "binding expired inside window");
            break;
        }
        timeout += step;
        if timeout > max {
            break;
        }
    }

    let margin = config.margin(step);
    let reported = timeout.saturating_sub(margin).clamp(min, max);
    tracing::info!(discovered = timeout, step, margin, reported, "timeout discovery converged");
    reported
}
