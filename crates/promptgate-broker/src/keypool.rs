//! Key Pool - the ordered set of configured API keys
//!
//! Keys are loaded once from a single environment variable holding a
//! comma-separated list and are immutable for the process lifetime. An
//! empty pool is a valid (if terminal) state: the broker reports
//! unavailability instead of panicking.

use crate::util::mask_api_key;
use std::fmt;
use tracing::{info, warn};

/// Environment variable holding the comma-separated API key list
pub const KEYS_ENV_VAR: &str = "GOOGLE_API_KEY";

/// Ordered, immutable set of provider API keys.
#[derive(Clone, Default)]
pub struct KeyPool {
    keys: Vec<String>,
}

// Credentials never appear in Debug output
impl fmt::Debug for KeyPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let masked: Vec<String> = self.keys.iter().map(|k| mask_api_key(k)).collect();
        f.debug_struct("KeyPool").field("keys", &masked).finish()
    }
}

impl KeyPool {
    /// Create a pool from an explicit key list.
    #[must_use]
    pub fn new(keys: Vec<String>) -> Self {
        Self { keys }
    }

    /// Parse a comma-separated key list: entries are whitespace-trimmed
    /// and empty entries dropped.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let keys: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect();
        Self { keys }
    }

    /// Load the pool from [`KEYS_ENV_VAR`].
    ///
    /// A missing or empty variable yields an empty pool.
    #[must_use]
    pub fn from_env() -> Self {
        let pool = match std::env::var(KEYS_ENV_VAR) {
            Ok(raw) => Self::parse(&raw),
            Err(_) => Self::default(),
        };
        if pool.is_empty() {
            warn!(
                var = KEYS_ENV_VAR,
                "no API keys configured, broker will be unavailable"
            );
        } else {
            info!(keys = pool.len(), "API key pool loaded");
        }
        pool
    }

    /// Number of configured keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` when no keys are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Key at `index`, if configured.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&str> {
        self.keys.get(index).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trims_and_drops_empties() {
        let pool = KeyPool::parse(" key-one , ,key-two,  ,key-three ");
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.get(0), Some("key-one"));
        assert_eq!(pool.get(1), Some("key-two"));
        assert_eq!(pool.get(2), Some("key-three"));
    }

    #[test]
    fn test_parse_empty_string() {
        let pool = KeyPool::parse("");
        assert!(pool.is_empty());
        assert_eq!(pool.get(0), None);
    }

    #[test]
    fn test_parse_only_separators() {
        let pool = KeyPool::parse(" , ,, ");
        assert!(pool.is_empty());
    }

    #[test]
    fn test_debug_masks_keys() {
        let pool = KeyPool::new(vec!["AIzaSyA-very-secret-key-0123".to_string()]);
        let rendered = format!("{:?}", pool);
        assert!(!rendered.contains("very-secret"));
        assert!(rendered.contains("AIza...0123"));
    }
}
