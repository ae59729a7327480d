//! Reconnection backoff for the local transport session.
//!
//! This recovers the local endpoint's own attachment to the transport
//! fabric, not individual peer connections. The policy is pure: it decides
//! whether and when to retry, the engine owns the timer.
//!
//! Delay for attempt `n` (1-based): `min(base * 2^n, max) + jitter`.
//! With the defaults that is 2s, 4s, 8s, 16s, 30s, then give up.

use std::time::Duration;

/// Default number of automatic retries before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Default base delay.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);
/// Default delay cap (before jitter).
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30_000);

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Retries allowed before giving up.
    pub max_attempts: u32,
    /// Base delay, doubled per attempt.
    pub base_delay: Duration,
    /// Cap on the doubled delay.
    pub max_delay: Duration,
    /// Upper bound of random jitter added to each delay (zero disables).
    pub max_jitter: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_jitter: Duration::ZERO,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (1-based), without jitter.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay before retry number `attempt`, with jitter applied.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay_for(attempt) + random_jitter(self.max_jitter)
    }
}

/// What to do after a session failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Schedule a retry after `delay`.
    Retry {
        /// Which retry this is (1-based).
        attempt: u32,
        /// How long to wait.
        delay: Duration,
    },
    /// Stop retrying; manual re-initialization required.
    GiveUp {
        /// Failures counted so far.
        attempts: u32,
    },
}

/// Attempt counter driven by session failures and successes.
#[derive(Debug, Clone)]
pub struct Reconnector {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl Reconnector {
    /// Create a counter at zero attempts.
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    /// Count a failure and decide whether to retry.
    pub fn on_failure(&mut self) -> ReconnectDecision {
        self.attempts = self.attempts.saturating_add(1);
        if self.attempts <= self.policy.max_attempts {
            ReconnectDecision::Retry {
                attempt: self.attempts,
                delay: self.policy.delay_for(self.attempts),
            }
        } else {
            ReconnectDecision::GiveUp {
                attempts: self.attempts,
            }
        }
    }

    /// The session re-attached; start counting from zero again.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Failures counted since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// The policy in force.
    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }
}

impl Default for Reconnector {
    fn default() -> Self {
        Self::new(ReconnectPolicy::default())
    }
}

/// Random jitter in `0..=max`, at millisecond resolution.
fn random_jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    let mut bytes = [0u8; 8];
    getrandom::getrandom(&mut bytes).expect("getrandom failed");
    Duration::from_millis(u64::from_le_bytes(bytes) % (max_ms + 1))
}
