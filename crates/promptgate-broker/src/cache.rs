//! Response cache
//!
//! Avoids re-billing for repeated prompts: a JSON map from prompt
//! fingerprint to `{timestamp, response}`, shared across processes through
//! a [`StateStore`]. Entries expire by age and the store caps its entry
//! count, evicting oldest-first on overflow. Corrupt or missing storage is
//! always a miss, never an error.

use crate::clock::Clock;
use crate::config::BrokerConfig;
use crate::storage::{update_best_effort, StateStore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// One cached provider response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Epoch seconds the entry was written
    pub timestamp: f64,
    /// The cached response text
    pub response: String,
}

type CacheMap = HashMap<String, CacheEntry>;

/// Fingerprint-keyed response cache with age expiry and capped size.
pub struct ResponseCache {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    ttl_secs: f64,
    capacity: usize,
    evict_batch: usize,
}

impl ResponseCache {
    /// Create a cache over `store`.
    pub fn new(store: Arc<dyn StateStore>, clock: Arc<dyn Clock>, config: &BrokerConfig) -> Self {
        Self {
            store,
            clock,
            ttl_secs: config.cache_ttl.as_secs_f64(),
            capacity: config.cache_capacity,
            evict_batch: config.cache_evict_batch,
        }
    }

    /// Cached response for `fingerprint`, if present and younger than the
    /// TTL. Expired entries are left on disk; they fall out via eviction.
    pub fn lookup(&self, fingerprint: &str) -> Option<String> {
        let raw = self.store.read()?;
        let cache: CacheMap = serde_json::from_str(&raw).ok()?;
        let entry = cache.get(fingerprint)?;
        if self.clock.now() - entry.timestamp < self.ttl_secs {
            Some(entry.response.clone())
        } else {
            None
        }
    }

    /// Write (or overwrite) the entry for `fingerprint`, evicting the
    /// oldest entries first when the store grows past its capacity.
    pub fn store(&self, fingerprint: &str, response: &str) {
        let now = self.clock.now();
        let capacity = self.capacity;
        let target = self.capacity.saturating_sub(self.evict_batch);

        update_best_effort(self.store.as_ref(), "response-cache", &mut |current| {
            let mut cache: CacheMap = current
                .and_then(|raw| serde_json::from_str(raw).ok())
                .unwrap_or_default();

            cache.insert(
                fingerprint.to_string(),
                CacheEntry {
                    timestamp: now,
                    response: response.to_string(),
                },
            );

            if cache.len() > capacity {
                let mut by_age: Vec<(String, f64)> = cache
                    .iter()
                    .map(|(k, e)| (k.clone(), e.timestamp))
                    .collect();
                by_age.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

                let excess = cache.len() - target;
                for (key, _) in by_age.into_iter().take(excess) {
                    cache.remove(&key);
                }
                debug!(evicted = excess, remaining = cache.len(), "cache evicted oldest entries");
            }

            serde_json::to_string_pretty(&cache).ok()
        });
    }
}
