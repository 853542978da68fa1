#![forbid(unsafe_code)]
//! Activity counters for inserts, scans, queries and conflict retries.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Hooks for observing index activity.
pub trait IndexMetrics: Send + Sync {
    /// An insert committed; `top_level` is the highest level the key owns.
    fn insert_committed(&self, top_level: u8);

    /// A range scan was issued against `level` during a query.
    fn range_scan(&self, level: u8);

    /// A query completed after `steps` traversal steps.
    fn query_completed(&self, steps: u64);

    /// `count` transaction attempts failed on conflict and were retried.
    fn conflicts_retried(&self, count: u64);
}

/// Discards every observation.
#[derive(Default)]
pub struct NoopMetrics;

impl IndexMetrics for NoopMetrics {
    fn insert_committed(&self, _top_level: u8) {}
    fn range_scan(&self, _level: u8) {}
    fn query_completed(&self, _steps: u64) {}
    fn conflicts_retried(&self, _count: u64) {}
}

/// Atomic counters over index activity.
#[derive(Default)]
pub struct CounterMetrics {
    /// Committed inserts.
    pub inserts: AtomicU64,
    /// Committed inserts whose key owns an entry above level 0.
    pub promoted_inserts: AtomicU64,
    /// Range scans issued by queries, across all levels.
    pub range_scans: AtomicU64,
    /// Range scans issued by queries above level 0.
    pub upper_level_scans: AtomicU64,
    /// Completed queries.
    pub queries: AtomicU64,
    /// Traversal steps summed over completed queries.
    pub query_steps: AtomicU64,
    /// Transaction attempts retried after a conflict.
    pub conflict_retries: AtomicU64,
}

impl CounterMetrics {
    /// Reads a counter with relaxed ordering.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

impl IndexMetrics for CounterMetrics {
    fn insert_committed(&self, top_level: u8) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
        if top_level > 0 {
            self.promoted_inserts.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn range_scan(&self, level: u8) {
        self.range_scans.fetch_add(1, Ordering::Relaxed);
        if level > 0 {
            self.upper_level_scans.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn query_completed(&self, steps: u64) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        self.query_steps.fetch_add(steps, Ordering::Relaxed);
    }

    fn conflicts_retried(&self, count: u64) {
        self.conflict_retries.fetch_add(count, Ordering::Relaxed);
    }
}

/// Returns the metrics sink used when none is configured.
pub fn default_metrics() -> Arc<dyn IndexMetrics> {
    Arc::new(NoopMetrics)
}
