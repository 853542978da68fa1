#![forbid(unsafe_code)]
//! Ordered transactional key-value store contract consumed by the index.
//!
//! The index only needs point reads and writes, selector-bounded range scans
//! (with a snapshot variant that does not register read conflicts), a range
//! clear, and a retrying unit of work. [`MemStore`] is the in-process backend;
//! any ordered store offering optimistic transactions can implement
//! [`KvStore`].

use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{AggError, Result};

mod conflict;
mod mem;

pub use conflict::KeyRange;
pub use mem::{MemStore, MemTransaction};

/// A stored key and its value.
pub type KeyValue = (Vec<u8>, Vec<u8>);

/// A range-scan bound resolved against the keys present in the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeySelector {
    /// The first stored key `>=` the target. Also the "exact key" bound.
    FirstGreaterOrEqual(Vec<u8>),
    /// The first stored key `>` the target.
    FirstGreaterThan(Vec<u8>),
    /// The last stored key `<` the target (the start of the store if none).
    LastLessThan(Vec<u8>),
    /// The last stored key `<=` the target (the start of the store if none).
    LastLessOrEqual(Vec<u8>),
}

impl KeySelector {
    /// Selector for an exact key: as a begin bound it includes the key, as an
    /// end bound it excludes it.
    pub fn exact(key: impl Into<Vec<u8>>) -> Self {
        KeySelector::FirstGreaterOrEqual(key.into())
    }

    /// The key the selector is anchored on.
    pub fn anchor(&self) -> &[u8] {
        match self {
            KeySelector::FirstGreaterOrEqual(k)
            | KeySelector::FirstGreaterThan(k)
            | KeySelector::LastLessThan(k)
            | KeySelector::LastLessOrEqual(k) => k,
        }
    }
}

/// Options applied to a range scan.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RangeOptions {
    /// Maximum number of pairs to return.
    pub limit: Option<usize>,
    /// Return pairs in descending key order (the limit applies from the end).
    pub reverse: bool,
}

impl RangeOptions {
    /// Limits the scan to `n` pairs.
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Scans in descending order.
    pub fn reverse(mut self) -> Self {
        self.reverse = true;
        self
    }
}

/// One optimistic transaction against a [`KvStore`].
///
/// Reads observe a single consistent version plus the transaction's own
/// buffered writes. Nothing is visible to other transactions before
/// [`KvTransaction::commit`]; dropping an uncommitted transaction discards it.
pub trait KvTransaction {
    /// Reads one key, registering a read conflict on it.
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Buffers a write.
    fn set(&mut self, key: &[u8], value: &[u8]);

    /// Buffers removal of every key in `[begin, end)`.
    fn clear_range(&mut self, begin: &[u8], end: &[u8]);

    /// Returns stored pairs with `resolve(begin) <= key < resolve(end)`,
    /// registering the scanned span as a read conflict.
    fn get_range(
        &mut self,
        begin: &KeySelector,
        end: &KeySelector,
        opts: RangeOptions,
    ) -> Result<Vec<KeyValue>>;

    /// Same as [`KvTransaction::get_range`] without registering conflicts.
    fn snapshot_get_range(
        &mut self,
        begin: &KeySelector,
        end: &KeySelector,
        opts: RangeOptions,
    ) -> Result<Vec<KeyValue>>;

    /// Explicitly registers `[begin, end)` as read by this transaction.
    fn add_read_conflict_range(&mut self, begin: &[u8], end: &[u8]);

    /// Attempts to commit. Fails with [`AggError::Conflict`] when a
    /// concurrently committed transaction wrote into this one's read set.
    fn commit(self) -> Result<()>;
}

/// A store able to start transactions.
pub trait KvStore: Send + Sync {
    /// Transaction type handed to units of work.
    type Tx: KvTransaction;

    /// Starts a transaction at the latest committed version.
    fn begin(&self) -> Result<Self::Tx>;
}

/// Retry and backoff policy for conflicting transactions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts (first try included) before a conflict is surfaced.
    pub max_attempts: u32,
    /// Sleep before the first retry; doubles on each further retry.
    pub initial_backoff_ms: u64,
    /// Upper bound on a single backoff sleep.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff_ms: 1,
            max_backoff_ms: 100,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Backoff to apply after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Runs `body` inside a transaction, committing on success.
///
/// Conflicts restart the whole unit of work from a fresh transaction until
/// `policy.max_attempts` is reached, at which point
/// [`AggError::Conflict`] carries the number of attempts made. Any other
/// error aborts immediately.
pub fn transact<S, T, F>(store: &S, policy: &RetryPolicy, mut body: F) -> Result<T>
where
    S: KvStore + ?Sized,
    F: FnMut(&mut S::Tx) -> Result<T>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let mut tx = store.begin()?;
        let outcome = body(&mut tx).and_then(|value| tx.commit().map(|()| value));
        match outcome {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let pause = policy.backoff(attempt);
                warn!(attempt, backoff_ms = pause.as_millis() as u64, "transaction conflict, retrying");
                if !pause.is_zero() {
                    thread::sleep(pause);
                }
            }
            Err(AggError::Conflict { .. }) => return Err(AggError::Conflict { attempts: attempt }),
            Err(err) => return Err(err),
        }
    }
}
