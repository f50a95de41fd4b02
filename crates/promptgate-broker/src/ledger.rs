//! Quota Ledger - persistent per-key usage counters
//!
//! One [`KeyState`] per configured key, persisted as a JSON map keyed by
//! the key index rendered as a string, shared by every worker process.
//! Selection applies staleness resets (daily date roll, stale minute
//! window) to its loaded snapshot and enforces three rules: the daily
//! limit, a per-key spacing interval standing in for a sliding minute
//! window, and the minute limit. The spacing rule under-utilizes a key
//! that could legally burst; staying under the provider's ceiling wins
//! over throughput here.

use crate::clock::Clock;
use crate::config::BrokerConfig;
use crate::storage::{update_best_effort, StateStore};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

// ============================================================================
// Types
// ============================================================================

/// Usage counters for a single key, as persisted in the ledger file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyState {
    /// Requests recorded in the current minute window
    pub requests_this_minute: u32,
    /// Epoch seconds of the most recent attempt (success or failure)
    pub last_request_time: f64,
    /// Requests recorded since the last daily reset
    pub total_requests_today: u32,
    /// Date (`%Y-%m-%d`) the daily counter was last reset
    pub last_reset_date: String,
}

impl KeyState {
    fn fresh(today: &str) -> Self {
        Self {
            requests_this_minute: 0,
            last_request_time: 0.0,
            total_requests_today: 0,
            last_reset_date: today.to_string(),
        }
    }
}

type LedgerStates = HashMap<String, KeyState>;

// ============================================================================
// QuotaLedger
// ============================================================================

/// Persistent, cross-process ledger answering "is key *i* usable now".
pub struct QuotaLedger {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    key_count: usize,
    minute_limit: u32,
    daily_limit: u32,
    key_spacing_secs: f64,
    minute_window_secs: f64,
}

impl QuotaLedger {
    /// Create a ledger over `store` for `key_count` configured keys.
    pub fn new(
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
        key_count: usize,
        config: &BrokerConfig,
    ) -> Self {
        Self {
            store,
            clock,
            key_count,
            minute_limit: config.minute_limit,
            daily_limit: config.daily_limit,
            key_spacing_secs: config.key_spacing.as_secs_f64(),
            minute_window_secs: config.minute_window.as_secs_f64(),
        }
    }

    /// Load persisted states; missing or corrupt storage degrades to a
    /// fresh zero-state for every configured key index, dated today.
    fn load(&self) -> LedgerStates {
        if let Some(raw) = self.store.read() {
            match serde_json::from_str(&raw) {
                Ok(states) => return states,
                Err(e) => warn!(error = %e, "quota ledger unreadable, starting fresh"),
            }
        }
        self.fresh_states()
    }

    fn fresh_states(&self) -> LedgerStates {
        let today = self.clock.today();
        (0..self.key_count)
            .map(|i| (i.to_string(), KeyState::fresh(&today)))
            .collect()
    }

    /// Pick a usable key index, trying indices in randomized order so
    /// concurrent non-coordinating processes spread across the pool.
    ///
    /// Returns `None` when every key is at a limit. Staleness resets are
    /// applied to the evaluated snapshot only; persisted counters catch up
    /// on the next record operation.
    pub fn select_available_key(&self) -> Option<usize> {
        let states = self.load();
        let now = self.clock.now();
        let today = self.clock.today();

        let mut indices: Vec<usize> = (0..self.key_count).collect();
        indices.shuffle(&mut rand::thread_rng());

        for i in indices {
            // Indices absent from a persisted ledger are not selectable
            let Some(persisted) = states.get(&i.to_string()) else {
                continue;
            };
            let mut state = persisted.clone();

            if state.last_reset_date != today {
                state.total_requests_today = 0;
                state.last_reset_date = today.clone();
            }
            if now - state.last_request_time > self.minute_window_secs {
                state.requests_this_minute = 0;
            }

            if state.total_requests_today >= self.daily_limit {
                continue;
            }
            // Spacing enforces the minute ceiling without a sliding window
            if now - state.last_request_time < self.key_spacing_secs {
                continue;
            }
            if state.requests_this_minute >= self.minute_limit {
                continue;
            }

            debug!(key = i, "key selected");
            return Some(i);
        }

        None
    }

    /// Record an attempt on key `index`.
    ///
    /// Always stamps `last_request_time`; a 429 additionally forces the
    /// minute counter to the limit, disqualifying the key until the
    /// minute-staleness window elapses. The daily counter is untouched:
    /// throttled calls do not consume daily quota.
    pub fn record_attempt(&self, index: usize, status: u16) {
        let now = self.clock.now();
        let minute_limit = self.minute_limit;
        let fresh = self.fresh_states();

        update_best_effort(self.store.as_ref(), "quota-ledger", &mut |current| {
            let mut states = parse_or_fresh(current, &fresh);
            let state = states.get_mut(&index.to_string())?;
            state.last_request_time = now;
            if status == 429 {
                state.requests_this_minute = minute_limit;
            }
            serde_json::to_string_pretty(&states).ok()
        });
    }

    /// Record a successful call on key `index`: bumps both counters and
    /// stamps `last_request_time`.
    pub fn record_success(&self, index: usize) {
        let now = self.clock.now();
        let fresh = self.fresh_states();

        update_best_effort(self.store.as_ref(), "quota-ledger", &mut |current| {
            let mut states = parse_or_fresh(current, &fresh);
            let state = states.get_mut(&index.to_string())?;
            state.requests_this_minute += 1;
            state.total_requests_today += 1;
            state.last_request_time = now;
            serde_json::to_string_pretty(&states).ok()
        });
    }
}

fn parse_or_fresh(current: Option<&str>, fresh: &LedgerStates) -> LedgerStates {
    current
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_else(|| fresh.clone())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ManualClock;
    use crate::storage::MemoryStore;

    const NOON: f64 = 1_700_000_000.0;

    fn ledger_with(
        keys: usize,
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
    ) -> QuotaLedger {
        QuotaLedger::new(store, clock, keys, &BrokerConfig::default())
    }

    fn seeded_store(states: &[(usize, KeyState)]) -> Arc<MemoryStore> {
        let map: LedgerStates = states
            .iter()
            .map(|(i, s)| (i.to_string(), s.clone()))
            .collect();
        Arc::new(MemoryStore::with_contents(
            serde_json::to_string_pretty(&map).unwrap(),
        ))
    }

    #[test]
    fn test_fresh_ledger_selects_a_key() {
        let clock = Arc::new(ManualClock::new(NOON, "2026-08-04"));
        let ledger = ledger_with(3, Arc::new(MemoryStore::new()), clock);
        let selected = ledger.select_available_key().unwrap();
        assert!(selected < 3);
    }

    #[test]
    fn test_zero_keys_selects_nothing() {
        let clock = Arc::new(ManualClock::new(NOON, "2026-08-04"));
        let ledger = ledger_with(0, Arc::new(MemoryStore::new()), clock);
        assert_eq!(ledger.select_available_key(), None);
    }

    #[test]
    fn test_corrupt_ledger_degrades_to_fresh() {
        let store = Arc::new(MemoryStore::with_contents("{not json"));
        let clock = Arc::new(ManualClock::new(NOON, "2026-08-04"));
        let ledger = ledger_with(2, store, clock);
        assert!(ledger.select_available_key().is_some());
    }

    #[test]
    fn test_daily_limit_blocks_selection() {
        let store = seeded_store(&[(
            0,
            KeyState {
                requests_this_minute: 0,
                last_request_time: 0.0,
                total_requests_today: 1000,
                last_reset_date: "2026-08-04".to_string(),
            },
        )]);
        let clock = Arc::new(ManualClock::new(NOON, "2026-08-04"));
        let ledger = ledger_with(1, store, clock);
        assert_eq!(ledger.select_available_key(), None);
    }

    #[test]
    fn test_daily_counter_resets_on_date_roll() {
        // 999 requests yesterday: usable today, the counter evaluates as 0
        let store = seeded_store(&[(
            0,
            KeyState {
                requests_this_minute: 0,
                last_request_time: 0.0,
                total_requests_today: 999,
                last_reset_date: "2026-08-03".to_string(),
            },
        )]);
        let clock = Arc::new(ManualClock::new(NOON, "2026-08-04"));
        let ledger = ledger_with(1, store, clock);
        assert_eq!(ledger.select_available_key(), Some(0));
    }

    #[test]
    fn test_spacing_blocks_recent_key() {
        let store = seeded_store(&[(
            0,
            KeyState {
                requests_this_minute: 1,
                last_request_time: NOON - 3.0,
                total_requests_today: 1,
                last_reset_date: "2026-08-04".to_string(),
            },
        )]);
        let clock = Arc::new(ManualClock::new(NOON, "2026-08-04"));
        let ledger = ledger_with(1, store, clock);
        assert_eq!(ledger.select_available_key(), None);
    }

    #[test]
    fn test_minute_limit_blocks_until_window_elapses() {
        let store = seeded_store(&[(
            0,
            KeyState {
                requests_this_minute: 10,
                last_request_time: NOON - 30.0,
                total_requests_today: 50,
                last_reset_date: "2026-08-04".to_string(),
            },
        )]);
        let clock = Arc::new(ManualClock::new(NOON, "2026-08-04"));
        let ledger = ledger_with(1, Arc::clone(&store), Arc::clone(&clock));

        // 30s since last request: spacing passes, minute counter blocks
        assert_eq!(ledger.select_available_key(), None);

        // Past the 60s window the counter evaluates as 0
        clock.advance(31.0);
        assert_eq!(ledger.select_available_key(), Some(0));
    }

    #[test]
    fn test_429_disqualifies_key_immediately() {
        let clock = Arc::new(ManualClock::new(NOON, "2026-08-04"));
        let store = Arc::new(MemoryStore::new());
        let ledger = ledger_with(1, Arc::clone(&store), Arc::clone(&clock));

        assert_eq!(ledger.select_available_key(), Some(0));
        ledger.record_attempt(0, 429);

        // Not selectable again within the minute window, even once the
        // 6s spacing has passed
        clock.advance(10.0);
        assert_eq!(ledger.select_available_key(), None);
        clock.advance(20.0);
        assert_eq!(ledger.select_available_key(), None);

        // Selectable again after the window elapses
        clock.advance(31.0);
        assert_eq!(ledger.select_available_key(), Some(0));
    }

    #[test]
    fn test_429_does_not_consume_daily_quota() {
        let clock = Arc::new(ManualClock::new(NOON, "2026-08-04"));
        let store = Arc::new(MemoryStore::new());
        let ledger = ledger_with(1, Arc::clone(&store), clock);

        ledger.record_attempt(0, 429);

        let states: LedgerStates = serde_json::from_str(&store.read().unwrap()).unwrap();
        assert_eq!(states["0"].total_requests_today, 0);
        assert_eq!(states["0"].requests_this_minute, 10);
        assert!((states["0"].last_request_time - NOON).abs() < f64::EPSILON);
    }

    #[test]
    fn test_record_success_bumps_both_counters() {
        let clock = Arc::new(ManualClock::new(NOON, "2026-08-04"));
        let store = Arc::new(MemoryStore::new());
        let ledger = ledger_with(2, Arc::clone(&store), clock);

        ledger.record_success(1);
        ledger.record_success(1);

        let states: LedgerStates = serde_json::from_str(&store.read().unwrap()).unwrap();
        assert_eq!(states["1"].requests_this_minute, 2);
        assert_eq!(states["1"].total_requests_today, 2);
        assert_eq!(states["0"].requests_this_minute, 0);
    }

    #[test]
    fn test_hard_failure_attempt_stamps_time_only() {
        let clock = Arc::new(ManualClock::new(NOON, "2026-08-04"));
        let store = Arc::new(MemoryStore::new());
        let ledger = ledger_with(1, Arc::clone(&store), clock);

        ledger.record_attempt(0, 400);

        let states: LedgerStates = serde_json::from_str(&store.read().unwrap()).unwrap();
        assert_eq!(states["0"].requests_this_minute, 0);
        assert_eq!(states["0"].total_requests_today, 0);
        assert!((states["0"].last_request_time - NOON).abs() < f64::EPSILON);
    }

    #[test]
    fn test_selection_skips_indices_missing_from_persisted_ledger() {
        // Persisted file predates the second key; only index 0 exists and
        // it is exhausted for the day
        let store = seeded_store(&[(
            0,
            KeyState {
                requests_this_minute: 0,
                last_request_time: 0.0,
                total_requests_today: 1000,
                last_reset_date: "2026-08-04".to_string(),
            },
        )]);
        let clock = Arc::new(ManualClock::new(NOON, "2026-08-04"));
        let ledger = ledger_with(2, store, clock);
        assert_eq!(ledger.select_available_key(), None);
    }

    #[test]
    fn test_never_selects_key_at_daily_limit() {
        let today = "2026-08-04";
        let states: Vec<(usize, KeyState)> = (0..4)
            .map(|i| {
                (
                    i,
                    KeyState {
                        requests_this_minute: 0,
                        last_request_time: 0.0,
                        total_requests_today: if i % 2 == 0 { 1000 } else { 0 },
                        last_reset_date: today.to_string(),
                    },
                )
            })
            .collect();
        let store = seeded_store(&states);
        let clock = Arc::new(ManualClock::new(NOON, today));
        let ledger = ledger_with(4, store, clock);

        // Randomized order: sample repeatedly, exhausted keys never appear
        for _ in 0..50 {
            let selected = ledger.select_available_key().unwrap();
            assert!(selected % 2 == 1, "selected exhausted key {}", selected);
        }
    }

    #[test]
    fn test_record_on_unknown_index_leaves_store_untouched() {
        let store = seeded_store(&[(
            0,
            KeyState {
                requests_this_minute: 0,
                last_request_time: 0.0,
                total_requests_today: 0,
                last_reset_date: "2026-08-04".to_string(),
            },
        )]);
        let before = store.read();
        let clock = Arc::new(ManualClock::new(NOON, "2026-08-04"));
        let ledger = ledger_with(1, Arc::clone(&store), clock);

        ledger.record_success(7);
        assert_eq!(store.read(), before);
    }
}
