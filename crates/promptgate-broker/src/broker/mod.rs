//! Call Orchestrator
//!
//! The externally visible operation: cache-first, quota-aware
//! prompt completion with bounded retry. One broker instance is built per
//! caller (no process-global state); everything it touches is injected so
//! tests can swap in memory stores, a mock provider, and a manual clock.

use crate::cache::ResponseCache;
use crate::clock::{Clock, SystemClock};
use crate::config::BrokerConfig;
use crate::error::{Error, Result};
use crate::gemini::{GeminiClient, ProviderOutcome, TextProvider};
use crate::keypool::KeyPool;
use crate::ledger::QuotaLedger;
use crate::retry::RetryPolicy;
use crate::storage::{JsonFileStore, StateStore};
use crate::util::fingerprint;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Quota-aware access broker over a pool of provider API keys.
pub struct Broker {
    pool: KeyPool,
    ledger: QuotaLedger,
    cache: ResponseCache,
    provider: Arc<dyn TextProvider>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl Broker {
    /// Production wiring from the environment: keys from
    /// [`KEYS_ENV_VAR`](crate::keypool::KEYS_ENV_VAR), disk-backed state
    /// files under the default data dir, the Gemini wire client, and the
    /// system clock.
    pub fn from_env() -> Result<Self> {
        Self::new(BrokerConfig::from_env(), KeyPool::from_env())
    }

    /// Production wiring with an explicit configuration and key pool.
    pub fn new(config: BrokerConfig, pool: KeyPool) -> Result<Self> {
        let provider = Arc::new(GeminiClient::new(&config)?);
        let ledger_store = Arc::new(JsonFileStore::new(config.ledger_path()));
        let cache_store = Arc::new(JsonFileStore::new(config.cache_path()));
        Ok(Self::with_parts(
            &config,
            pool,
            ledger_store,
            cache_store,
            provider,
            Arc::new(SystemClock),
        ))
    }

    /// Fully injected construction; the seam tests use.
    pub fn with_parts(
        config: &BrokerConfig,
        pool: KeyPool,
        ledger_store: Arc<dyn StateStore>,
        cache_store: Arc<dyn StateStore>,
        provider: Arc<dyn TextProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ledger = QuotaLedger::new(ledger_store, Arc::clone(&clock), pool.len(), config);
        let cache = ResponseCache::new(cache_store, Arc::clone(&clock), config);
        let policy = RetryPolicy {
            max_attempts: config.max_attempts,
            ..RetryPolicy::default()
        };
        Self {
            pool,
            ledger,
            cache,
            provider,
            policy,
            clock,
        }
    }

    /// Complete `prompt`, consulting the cache first and rotating across
    /// the key pool under quota.
    ///
    /// Blocks (asynchronously) through key-unavailability and throttling
    /// backoff; total latency is bounded by the attempt ceiling and the
    /// per-request timeout. Only hard provider failures and exhaustion
    /// surface as errors.
    pub async fn generate(
        &self,
        prompt: &str,
        temperature: f32,
        max_output_tokens: u32,
    ) -> Result<String> {
        let fp = fingerprint(prompt);
        if let Some(cached) = self.cache.lookup(&fp) {
            debug!(fingerprint = %&fp[..12], "serving from cache");
            return Ok(cached);
        }

        if self.pool.is_empty() {
            return Err(Error::NotConfigured);
        }

        for attempt in 0..self.policy.max_attempts {
            let Some(index) = self.ledger.select_available_key() else {
                let delay = self.policy.no_key_delay(&mut rand::thread_rng());
                info!(
                    attempt,
                    delay_secs = delay.as_secs_f64(),
                    "all keys cooling down, waiting"
                );
                self.clock.sleep(delay).await;
                continue;
            };
            let Some(api_key) = self.pool.get(index) else {
                continue;
            };

            match self
                .provider
                .generate(api_key, prompt, temperature, max_output_tokens)
                .await
            {
                ProviderOutcome::Success(text) => {
                    self.ledger.record_success(index);
                    self.cache.store(&fp, &text);
                    debug!(key = index, attempt, "generation succeeded");
                    return Ok(text);
                }
                ProviderOutcome::Throttled { retry_hint } => {
                    self.ledger.record_attempt(index, 429);
                    let delay = self.policy.throttle_delay(retry_hint);
                    warn!(
                        key = index,
                        attempt,
                        delay_secs = delay.as_secs_f64(),
                        "key throttled, rotating"
                    );
                    self.clock.sleep(delay).await;
                }
                ProviderOutcome::Failed { status, message } => {
                    self.ledger.record_attempt(index, status);
                    error!(key = index, status, "provider rejected request");
                    return Err(Error::Api { status, message });
                }
                ProviderOutcome::Transport(message) => {
                    // Key usability unknown: the ledger stays untouched
                    warn!(key = index, error = %message, "transport fault, retrying");
                    self.clock.sleep(self.policy.transport_delay).await;
                }
            }
        }

        error!(
            attempts = self.policy.max_attempts,
            "retry ceiling exhausted"
        );
        Err(Error::Exhausted {
            attempts: self.policy.max_attempts,
        })
    }
}
