//! Broker configuration
//!
//! All tunables live here: per-key rate limits, cache sizing, retry
//! ceiling, provider endpoint, and the directory holding the shared state
//! files. `from_env` builds the production configuration; the `with_*`
//! builders let callers (and tests) override any field.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default provider model
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Default API base URL
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default state directory under the home directory
const DEFAULT_DATA_DIR: &str = ".promptgate";

/// Quota ledger file name
const LEDGER_FILE: &str = "quota_states.json";

/// Response cache file name
const CACHE_FILE: &str = "response_cache.json";

/// Broker configuration
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Requests per minute allowed on a single key
    pub minute_limit: u32,
    /// Requests per day allowed on a single key
    pub daily_limit: u32,
    /// Minimum spacing between attempts on the same key
    pub key_spacing: Duration,
    /// Idle window after which a key's minute counter goes stale
    pub minute_window: Duration,
    /// Age past which a cache entry is treated as absent
    pub cache_ttl: Duration,
    /// Cache entry count that triggers eviction
    pub cache_capacity: usize,
    /// Entries evicted per overflow
    pub cache_evict_batch: usize,
    /// Attempt ceiling for one `generate` call
    pub max_attempts: u32,
    /// Provider model name
    pub model: String,
    /// Provider base URL
    pub base_url: String,
    /// Provider request timeout
    pub timeout: Duration,
    /// Directory holding the ledger and cache files
    pub data_dir: PathBuf,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        let data_dir = dirs::home_dir()
            .map(|h| h.join(DEFAULT_DATA_DIR))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

        Self {
            minute_limit: 10,
            daily_limit: 1000,
            key_spacing: Duration::from_secs(6),
            minute_window: Duration::from_secs(60),
            cache_ttl: Duration::from_secs(48 * 60 * 60),
            cache_capacity: 2000,
            cache_evict_batch: 100,
            max_attempts: 20,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
            data_dir,
        }
    }
}

impl BrokerConfig {
    /// Build the production configuration, honoring `GEMINI_MODEL` and
    /// `GEMINI_BASE_URL` overrides when present.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(model) = std::env::var("GEMINI_MODEL") {
            config.model = model;
        }
        if let Ok(base_url) = std::env::var("GEMINI_BASE_URL") {
            config.base_url = base_url;
        }
        config
    }

    /// Set the state directory
    #[must_use]
    pub fn with_data_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.data_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the provider model
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the provider base URL
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the provider request timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the per-key rate limits
    #[must_use]
    pub fn with_limits(mut self, minute_limit: u32, daily_limit: u32) -> Self {
        self.minute_limit = minute_limit;
        self.daily_limit = daily_limit;
        self
    }

    /// Set the attempt ceiling
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the cache sizing (capacity and eviction batch)
    #[must_use]
    pub fn with_cache_capacity(mut self, capacity: usize, evict_batch: usize) -> Self {
        self.cache_capacity = capacity;
        self.cache_evict_batch = evict_batch;
        self
    }

    /// Path of the quota ledger file
    #[must_use]
    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join(LEDGER_FILE)
    }

    /// Path of the response cache file
    #[must_use]
    pub fn cache_path(&self) -> PathBuf {
        self.data_dir.join(CACHE_FILE)
    }
}
