//! Clock abstraction
//!
//! Every time-dependent decision in the broker (staleness resets, cache
//! expiry, backoff sleeps) goes through this trait so the retry and quota
//! paths can run under a virtual clock in tests.

use async_trait::async_trait;
use chrono::Local;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of time for the broker.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Seconds since the Unix epoch.
    fn now(&self) -> f64;

    /// Local calendar date as `%Y-%m-%d` (the ledger's daily-reset key).
    fn today(&self) -> String;

    /// Suspend the calling task for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Wall-clock implementation backed by tokio timers.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }

    fn today(&self) -> String {
        Local::now().format("%Y-%m-%d").to_string()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
