//! Retry policy
//!
//! The attempt ceiling and every backoff interval used by the call
//! orchestrator, expressed as data so the protocol is testable without
//! real timers. The orchestrator owns the actual sleeping.

use rand::Rng;
use std::time::Duration;

/// Backoff and retry parameters for one `generate` call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempt ceiling before giving up
    pub max_attempts: u32,
    /// Base wait when every key is cooling down
    pub no_key_base: Duration,
    /// Lower bound of the jitter added to the base wait
    pub no_key_jitter_min: Duration,
    /// Upper bound of the jitter added to the base wait
    pub no_key_jitter_max: Duration,
    /// Assumed provider delay when a 429 carries no retry hint
    pub default_throttle_delay: Duration,
    /// Wait after a transport-level fault
    pub transport_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            no_key_base: Duration::from_secs(10),
            no_key_jitter_min: Duration::from_secs(2),
            no_key_jitter_max: Duration::from_secs(8),
            default_throttle_delay: Duration::from_secs(15),
            transport_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Jittered wait used when no key is available: base plus a uniform
    /// draw from the jitter range. The jitter keeps concurrent processes
    /// from re-polling the ledger in lockstep.
    pub fn no_key_delay(&self, rng: &mut impl Rng) -> Duration {
        let jitter = rng.gen_range(
            self.no_key_jitter_min.as_secs_f64()..self.no_key_jitter_max.as_secs_f64(),
        );
        self.no_key_base + Duration::from_secs_f64(jitter)
    }

    /// Wait after a throttled attempt: half the provider's suggested delay
    /// (or half the default when no hint was sent). The other key indices
    /// are still live, so a partial wait before rotating is enough.
    #[must_use]
    pub fn throttle_delay(&self, hint_secs: Option<f64>) -> Duration {
        let secs = hint_secs.unwrap_or(self.default_throttle_delay.as_secs_f64());
        Duration::from_secs_f64(secs.max(0.0) / 2.0)
    }
}
