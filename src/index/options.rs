#![forbid(unsafe_code)]
//! Index configuration: level layout, namespace, arity and retry policy.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AggError, Result};
use crate::store::RetryPolicy;

/// Configuration fixed when an [`super::AggIndex`] is opened.
///
/// Loadable from TOML:
///
/// ```toml
/// max_level = 6
/// fanout_exponent = 4
/// prefix = "sales"
/// key_arity = 3
///
/// [retry]
/// max_attempts = 10
/// initial_backoff_ms = 1
/// max_backoff_ms = 100
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexOptions {
    /// Highest level above level 0.
    pub max_level: u8,
    /// Each level keeps roughly `1 / 2^fanout_exponent` of the keys below it.
    pub fanout_exponent: u8,
    /// Namespace prepended to every stored key so several indexes can share a store.
    pub prefix: String,
    /// Required tuple arity for inserted keys, if fixed.
    pub key_arity: Option<usize>,
    /// Conflict retry policy applied to every insert and query.
    pub retry: RetryPolicy,
    /// Upper bound on traversal steps for a single query.
    pub max_traversal_steps: u64,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            max_level: 6,
            fanout_exponent: 4,
            prefix: String::new(),
            key_arity: None,
            retry: RetryPolicy::default(),
            max_traversal_steps: 100_000_000,
        }
    }
}

impl IndexOptions {
    /// Creates options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the highest level.
    pub fn max_level(mut self, level: u8) -> Self {
        self.max_level = level;
        self
    }

    /// Sets the per-level fanout exponent.
    pub fn fanout_exponent(mut self, exponent: u8) -> Self {
        self.fanout_exponent = exponent;
        self
    }

    /// Sets the key namespace.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Requires every key to have exactly `arity` components.
    pub fn key_arity(mut self, arity: usize) -> Self {
        self.key_arity = Some(arity);
        self
    }

    /// Sets the conflict retry policy.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Sets the traversal step bound.
    pub fn max_traversal_steps(mut self, steps: u64) -> Self {
        self.max_traversal_steps = steps;
        self
    }

    /// Parses and validates options from a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let options: IndexOptions = toml::from_str(text)?;
        options.validate()?;
        Ok(options)
    }

    /// Reads, parses and validates options from a TOML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Checks that the level layout and retry policy are usable.
    pub fn validate(&self) -> Result<()> {
        if self.max_level == 0 {
            return Err(AggError::Config("max_level must be at least 1".into()));
        }
        if self.fanout_exponent == 0 {
            return Err(AggError::Config("fanout_exponent must be at least 1".into()));
        }
        let mask_bits = u32::from(self.max_level) * u32::from(self.fanout_exponent);
        if mask_bits > 64 {
            return Err(AggError::Config(format!(
                "max_level * fanout_exponent = {mask_bits} exceeds the 64-bit promotion hash"
            )));
        }
        if self.key_arity == Some(0) {
            return Err(AggError::Config("key_arity must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(AggError::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.max_traversal_steps == 0 {
            return Err(AggError::Config("max_traversal_steps must be at least 1".into()));
        }
        Ok(())
    }
}
