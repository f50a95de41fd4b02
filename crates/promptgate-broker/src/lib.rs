//! Promptgate Broker - quota-aware access to a generative text API
//!
//! Many independent worker processes share one pool of provider API keys,
//! one persisted quota ledger, and one persisted response cache. This
//! crate brokers their prompt-completion calls:
//! - Key Pool: the ordered credential list loaded from the environment
//! - Quota Ledger: cross-process per-key counters enforcing the
//!   provider's requests-per-minute and requests-per-day limits
//! - Response Cache: fingerprint-keyed answers with age expiry, so a
//!   repeated prompt is never re-billed
//! - Broker: the call orchestrator — cache-first, key rotation under
//!   quota, provider-directed backoff on throttling, bounded retry
//!
//! The ledger and cache are whole-file JSON documents mutated under
//! advisory file locks. Two processes can still race between selecting a
//! key and recording its use, transiently overshooting a limit by one
//! request per racing pair; the provider's own enforcement is the
//! backstop.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod broker;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod gemini;
pub mod keypool;
pub mod ledger;
pub mod mock;
pub mod retry;
pub mod storage;
pub mod util;

pub use broker::Broker;
pub use cache::{CacheEntry, ResponseCache};
pub use clock::{Clock, SystemClock};
pub use config::BrokerConfig;
pub use error::{Error, Result};
pub use gemini::{GeminiClient, ProviderOutcome, TextProvider};
pub use keypool::{KeyPool, KEYS_ENV_VAR};
pub use ledger::{KeyState, QuotaLedger};
pub use retry::RetryPolicy;
pub use storage::{JsonFileStore, MemoryStore, StateStore};
