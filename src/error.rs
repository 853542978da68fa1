//! Error type shared by the key codec, store adapters and index.

use std::io;

use thiserror::Error;
use tracing::error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AggError>;

/// Errors surfaced by the aggregation index and its store adapters.
#[derive(Debug, Error)]
pub enum AggError {
    /// The transaction could not commit because a concurrent writer touched
    /// data it read. Retried by [`crate::store::transact`] until the retry
    /// policy is exhausted.
    #[error("transaction conflict after {attempts} attempt(s)")]
    Conflict {
        /// Number of attempts made before giving up.
        attempts: u32,
    },
    /// A structural invariant of the index was violated. Never retried.
    #[error("invariant violation: {0}")]
    Invariant(String),
    /// Index options or a request are incompatible with the configuration.
    #[error("configuration error: {0}")]
    Config(String),
    /// Query bounds are malformed.
    #[error("range error: {0}")]
    Range(String),
    /// Stored bytes could not be decoded.
    #[error("codec error: {0}")]
    Codec(&'static str),
    /// I/O failure while loading configuration.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// TOML configuration could not be parsed.
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl AggError {
    /// Returns true when the failed unit of work may be retried from scratch.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AggError::Conflict { .. })
    }

    pub(crate) fn invariant(message: impl Into<String>) -> Self {
        let message = message.into();
        error!(%message, "index invariant violated");
        AggError::Invariant(message)
    }
}
