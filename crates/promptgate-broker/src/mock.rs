//! Test doubles: queued mock provider and a manual clock
//!
//! Shipped (not test-gated) so downstream callers can drive the broker in
//! their own tests without touching the network or real timers.

use crate::clock::Clock;
use crate::gemini::{ProviderOutcome, TextProvider};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// MockProvider
// ============================================================================

/// A provider that returns queued outcomes, then default successes.
///
/// Every call is logged as `(api_key, prompt)` for assertions on key
/// rotation and call counts.
#[derive(Default)]
pub struct MockProvider {
    outcomes: Arc<Mutex<VecDeque<ProviderOutcome>>>,
    calls: Arc<Mutex<Vec<(String, String)>>>,
}

impl MockProvider {
    /// Create a mock with an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next outcome.
    pub fn push(&self, outcome: ProviderOutcome) {
        self.outcomes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(outcome);
    }

    /// All `(api_key, prompt)` pairs seen so far.
    #[must_use]
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of provider calls issued.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl TextProvider for MockProvider {
    async fn generate(
        &self,
        api_key: &str,
        prompt: &str,
        _temperature: f32,
        _max_output_tokens: u32,
    ) -> ProviderOutcome {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((api_key.to_string(), prompt.to_string()));

        let queued = self
            .outcomes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        queued.unwrap_or_else(|| ProviderOutcome::Success("mock response".to_string()))
    }
}

// ============================================================================
// ManualClock
// ============================================================================

/// Deterministic clock: manual time, virtual sleeps.
///
/// `sleep` records the requested duration and advances the virtual time,
/// so backoff loops resolve instantly in tests.
pub struct ManualClock {
    now: Mutex<f64>,
    today: Mutex<String>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    /// Create a clock at `now` epoch seconds on calendar date `today`.
    #[must_use]
    pub fn new(now: f64, today: &str) -> Self {
        Self {
            now: Mutex::new(now),
            today: Mutex::new(today.to_string()),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    /// Advance the virtual time.
    pub fn advance(&self, secs: f64) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) += secs;
    }

    /// Change the calendar date.
    pub fn set_today(&self, today: &str) {
        *self.today.lock().unwrap_or_else(|e| e.into_inner()) = today.to_string();
    }

    /// Durations passed to `sleep` so far.
    #[must_use]
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn today(&self) -> String {
        self.today
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(duration);
        self.advance(duration.as_secs_f64());
    }
}
