//! Heartbeat and liveness policy.
//!
//! The engine pings every registered connection once per interval. Any
//! decoded message from a peer counts as proof of life. A connection that
//! stays silent for more than `missed_pings_before_close` intervals is
//! considered dead even if the transport never reported it closed.

use std::time::Duration;

/// Default ping period.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// Default number of silent intervals tolerated before closing.
pub const DEFAULT_MISSED_PINGS: u32 = 3;

/// Heartbeat parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatPolicy {
    /// Ping period.
    pub interval: Duration,
    /// Silent intervals tolerated before a connection is closed.
    /// Zero turns liveness closing off; only transport close events count.
    pub missed_pings_before_close: u32,
}

impl Default for HeartbeatPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_HEARTBEAT_INTERVAL,
            missed_pings_before_close: DEFAULT_MISSED_PINGS,
        }
    }
}

impl HeartbeatPolicy {
    /// How long a peer may stay silent, or `None` if liveness closing is off.
    pub fn silence_limit(&self) -> Option<Duration> {
        match self.missed_pings_before_close {
            0 => None,
            n => Some(self.interval.saturating_mul(n)),
        }
    }
}
