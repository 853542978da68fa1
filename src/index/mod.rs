#![forbid(unsafe_code)]
//! The leveled aggregation index.
//!
//! Level 0 stores every key with its value. Each higher level stores a
//! deterministic, hash-selected subset of the keys below it; an entry at level
//! `L` holds the reduction of the level `L-1` entries from its key up to the
//! next key present at level `L`. Range aggregates are answered by consuming
//! the coarsest entries that fit inside the requested span.

use std::cell::Cell;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{AggError, Result};
use crate::key::{IndexKey, Key};
use crate::reduce::{Reducer, Sum};
use crate::store::{transact, KvStore, KvTransaction};

mod collate;
mod insert;
mod layout;
mod metrics;
mod options;
mod promote;
mod query;
mod verify;

use layout::{Layout, LevelTx};

pub use metrics::{default_metrics, CounterMetrics, IndexMetrics, NoopMetrics};
pub use options::IndexOptions;
pub use promote::{is_promoted, key_hash64, top_level};
pub use query::{QueryOpts, QueryPath, QueryRow, QueryTrace, ScanRecord};
pub use verify::{VerifyFinding, VerifyReport};

/// A leveled aggregation index stored in an ordered transactional store.
///
/// Every operation runs in one store transaction, retried on conflict
/// according to [`IndexOptions::retry`].
pub struct AggIndex<S: KvStore, R: Reducer = Sum<i64>> {
    store: S,
    reducer: R,
    options: IndexOptions,
    layout: Layout,
    metrics: Arc<dyn IndexMetrics>,
}

impl<S: KvStore, R: Reducer> AggIndex<S, R> {
    /// Opens the index described by `options` in `store`, creating the
    /// per-level sentinels if they are missing.
    pub fn open(store: S, reducer: R, options: IndexOptions) -> Result<Self> {
        options.validate()?;
        let layout = Layout::new(&options.prefix);
        let index = Self {
            store,
            reducer,
            options,
            layout,
            metrics: default_metrics(),
        };
        index.run(|lt| index.seed_sentinels(lt))?;
        info!(
            prefix = %index.options.prefix,
            max_level = index.options.max_level,
            fanout_exponent = index.options.fanout_exponent,
            "aggregation index opened"
        );
        Ok(index)
    }

    /// Routes activity counters to `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<dyn IndexMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// The options the index was opened with.
    pub fn options(&self) -> &IndexOptions {
        &self.options
    }

    /// The reducer combining values.
    pub fn reducer(&self) -> &R {
        &self.reducer
    }

    /// The backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Adds `value` under `key`, merging with any value already stored there.
    ///
    /// Returns the highest level the key owns an entry at.
    pub fn insert(&self, key: &Key, value: R::Value) -> Result<u8> {
        self.check_arity(key)?;
        let top = self.run(|lt| {
            insert::apply_insert(
                lt,
                self.options.max_level,
                self.options.fanout_exponent,
                key,
                &value,
            )
        })?;
        debug!(key = %key, top_level = top, "insert committed");
        self.metrics.insert_committed(top);
        Ok(top)
    }

    /// Inserts every pair in one transaction; either all land or none do.
    pub fn insert_many<'k, I>(&self, items: I) -> Result<usize>
    where
        I: IntoIterator<Item = (&'k Key, R::Value)>,
    {
        let items: Vec<(&Key, R::Value)> = items.into_iter().collect();
        for (key, _) in &items {
            self.check_arity(key)?;
        }
        let tops = self.run(|lt| {
            items
                .iter()
                .map(|(key, value)| {
                    insert::apply_insert(
                        lt,
                        self.options.max_level,
                        self.options.fanout_exponent,
                        key,
                        value,
                    )
                })
                .collect::<Result<Vec<u8>>>()
        })?;
        for &top in &tops {
            self.metrics.insert_committed(top);
        }
        debug!(count = tops.len(), "batch insert committed");
        Ok(tops.len())
    }

    /// Answers `opts` from one consistent view of the index.
    pub fn query(&self, opts: &QueryOpts) -> Result<Vec<QueryRow<R::Value>>> {
        self.query_traced(opts).map(|(rows, _)| rows)
    }

    /// Like [`AggIndex::query`], also returning which levels served which spans.
    pub fn query_traced(&self, opts: &QueryOpts) -> Result<(Vec<QueryRow<R::Value>>, QueryTrace)> {
        let limits = query::Limits {
            max_level: self.options.max_level,
            key_arity: self.options.key_arity,
            max_steps: self.options.max_traversal_steps,
        };
        query::validate(opts, &limits)?;
        let (rows, trace) = self.run(|lt| query::run(lt, opts, &limits))?;
        for scan in &trace.scans {
            self.metrics.range_scan(scan.level);
        }
        self.metrics.query_completed(trace.steps);
        debug!(path = ?trace.path, steps = trace.steps, rows = rows.len(), "query answered");
        Ok((rows, trace))
    }

    /// Removes every entry of the index and restores the empty state.
    pub fn clear(&self) -> Result<()> {
        self.run(|lt| {
            lt.clear_all();
            self.seed_sentinels(lt)
        })?;
        info!(prefix = %self.options.prefix, "aggregation index cleared");
        Ok(())
    }

    /// Every entry stored at `level`, the minimum sentinel first.
    pub fn level_entries(&self, level: u8) -> Result<Vec<(IndexKey, R::Value)>> {
        self.check_level(level)?;
        let entries = self.run(|lt| lt.scan_level(level))?;
        Ok(entries.into_iter().map(|e| (e.key, e.value)).collect())
    }

    /// The real keys stored at `level`.
    pub fn level_keys(&self, level: u8) -> Result<Vec<Key>> {
        Ok(self
            .level_entries(level)?
            .into_iter()
            .filter_map(|(key, _)| key.into_key())
            .collect())
    }

    /// Levels `key` owns an entry at if inserted, level 0 first.
    pub fn promoted_levels(&self, key: &Key) -> Vec<u8> {
        let top = promote::top_level(key, self.options.max_level, self.options.fanout_exponent);
        (0..=top).collect()
    }

    /// Checks every level against level 0 and reports all violations found.
    pub fn verify(&self) -> Result<VerifyReport<R::Value>> {
        self.run(|lt| verify::verify(lt, self.options.max_level, self.options.fanout_exponent))
    }

    /// Fails with [`AggError::Invariant`] on the first violation [`AggIndex::verify`] finds.
    pub fn check_invariants(&self) -> Result<()> {
        let report = self.verify()?;
        match report.findings.first() {
            None => Ok(()),
            Some(finding) => Err(AggError::invariant(format!(
                "level {}: {}",
                finding.level, finding.message
            ))),
        }
    }

    fn seed_sentinels<T: KvTransaction>(&self, lt: &mut LevelTx<'_, T, R>) -> Result<()> {
        let identity = self.reducer.identity();
        for level in 0..=self.options.max_level {
            if lt.get(level, &IndexKey::Min)?.is_none() {
                lt.set(level, &IndexKey::Min, &identity);
            }
        }
        Ok(())
    }

    fn check_arity(&self, key: &Key) -> Result<()> {
        match self.options.key_arity {
            Some(arity) if key.arity() != arity => Err(AggError::Config(format!(
                "key {key} has {} components, index requires {arity}",
                key.arity()
            ))),
            _ if key.arity() == 0 => Err(AggError::Config("empty keys cannot be stored".into())),
            _ => Ok(()),
        }
    }

    fn check_level(&self, level: u8) -> Result<()> {
        if level > self.options.max_level {
            return Err(AggError::Config(format!(
                "level {level} exceeds max_level {}",
                self.options.max_level
            )));
        }
        Ok(())
    }

    /// Runs `body` in a retried transaction, reporting retried attempts.
    fn run<T, F>(&self, mut body: F) -> Result<T>
    where
        F: FnMut(&mut LevelTx<'_, S::Tx, R>) -> Result<T>,
    {
        let attempts = Cell::new(0u64);
        let outcome = transact(&self.store, &self.options.retry, |tx| {
            attempts.set(attempts.get() + 1);
            let mut lt = LevelTx::new(tx, &self.layout, &self.reducer);
            body(&mut lt)
        });
        let retried = attempts.get().saturating_sub(1);
        if retried > 0 {
            self.metrics.conflicts_retried(retried);
        }
        outcome
    }
}
