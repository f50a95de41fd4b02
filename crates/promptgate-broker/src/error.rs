//! Error types for promptgate-broker

use thiserror::Error;

/// Broker error type.
///
/// This is the closed set of failures a caller can observe from
/// [`Broker::generate`](crate::Broker::generate); every other condition
/// (throttling, transport faults, unreadable state files) is absorbed and
/// retried or defaulted internally.
#[derive(Debug, Error)]
pub enum Error {
    /// No API keys configured — the broker is permanently unavailable
    #[error("no api keys configured")]
    NotConfigured,

    /// Hard provider failure (non-2xx status other than 429); never retried
    #[error("api error {status}: {message}")]
    Api {
        /// HTTP status returned by the provider
        status: u16,
        /// Sanitized provider error message
        message: String,
    },

    /// Retry ceiling reached without a successful call
    #[error("no successful call after {attempts} attempts")]
    Exhausted {
        /// Number of attempts consumed
        attempts: u32,
    },

    /// HTTP client could not be constructed (broker construction only;
    /// never returned from `generate`)
    #[error("network error: {0}")]
    Network(String),

    /// State file could not be written (absorbed by the ledger and cache,
    /// surfaced only through logs)
    #[error("storage error: {0}")]
    Storage(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
