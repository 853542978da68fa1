//! In-process ordered store with optimistic, snapshot-isolated transactions.
//!
//! Committed data lives in a copy-on-write `BTreeMap`; each transaction pins
//! the map as of its read version, buffers its writes, and validates its read
//! spans against the write sets committed after that version.

use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{AggError, Result};

use super::conflict::{KeyRange, ReadSet, WriteSet};
use super::{KeySelector, KeyValue, KvStore, KvTransaction, RangeOptions};

type Map = BTreeMap<Vec<u8>, Vec<u8>>;

/// Shared handle to an in-memory transactional store.
#[derive(Clone, Default)]
pub struct MemStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<Committed>,
}

#[derive(Default)]
struct Committed {
    version: u64,
    data: Arc<Map>,
    log: VecDeque<(u64, WriteSet)>,
    active: BTreeMap<u64, usize>,
}

impl Committed {
    fn prune(&mut self) {
        match self.active.keys().next().copied() {
            Some(oldest) => {
                while self.log.front().map_or(false, |(v, _)| *v <= oldest) {
                    self.log.pop_front();
                }
            }
            None => self.log.clear(),
        }
    }
}

impl MemStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest committed version; bumps once per committing write transaction.
    pub fn version(&self) -> u64 {
        self.inner.state.lock().version
    }

    /// Number of committed keys.
    pub fn len(&self) -> usize {
        self.inner.state.lock().data.len()
    }

    /// Returns true when no keys are committed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KvStore for MemStore {
    type Tx = MemTransaction;

    fn begin(&self) -> Result<MemTransaction> {
        let mut state = self.inner.state.lock();
        let read_version = state.version;
        *state.active.entry(read_version).or_insert(0) += 1;
        Ok(MemTransaction {
            inner: Arc::clone(&self.inner),
            read_version,
            snapshot: Arc::clone(&state.data),
            pending: Map::new(),
            cleared: Vec::new(),
            reads: ReadSet::default(),
        })
    }
}

/// A transaction over a [`MemStore`].
pub struct MemTransaction {
    inner: Arc<Inner>,
    read_version: u64,
    snapshot: Arc<Map>,
    pending: Map,
    cleared: Vec<KeyRange>,
    reads: ReadSet,
}

#[derive(Clone, Copy)]
enum Side {
    Base,
    Local,
    Both,
}

impl MemTransaction {
    /// The committed version this transaction reads from.
    pub fn read_version(&self) -> u64 {
        self.read_version
    }

    fn is_cleared(&self, key: &[u8]) -> bool {
        self.cleared.iter().any(|r| r.contains(key))
    }

    fn lookup(&self, key: &[u8]) -> Option<Vec<u8>> {
        if let Some(v) = self.pending.get(key) {
            return Some(v.clone());
        }
        if self.is_cleared(key) {
            return None;
        }
        self.snapshot.get(key).cloned()
    }

    fn scan(&self, lo: Bound<&[u8]>, hi: Bound<&[u8]>, opts: RangeOptions) -> Vec<KeyValue> {
        if range_is_empty(lo, hi) {
            return Vec::new();
        }
        let limit = opts.limit.unwrap_or(usize::MAX);
        let base = self
            .snapshot
            .range::<[u8], _>((lo, hi))
            .filter(|(k, _)| !self.is_cleared(k));
        let local = self.pending.range::<[u8], _>((lo, hi));
        if opts.reverse {
            merge(base.rev(), local.rev(), limit, Ordering::Greater)
        } else {
            merge(base, local, limit, Ordering::Less)
        }
    }

    fn last_before(&self, hi: Bound<&[u8]>) -> Option<Vec<u8>> {
        self.scan(Bound::Unbounded, hi, RangeOptions::default().reverse().limit(1))
            .pop()
            .map(|(k, _)| k)
    }

    fn resolve_begin(&self, sel: &KeySelector) -> Bound<Vec<u8>> {
        match sel {
            KeySelector::FirstGreaterOrEqual(k) => Bound::Included(k.clone()),
            KeySelector::FirstGreaterThan(k) => Bound::Excluded(k.clone()),
            KeySelector::LastLessThan(k) => self
                .last_before(Bound::Excluded(k))
                .map_or(Bound::Unbounded, Bound::Included),
            KeySelector::LastLessOrEqual(k) => self
                .last_before(Bound::Included(k))
                .map_or(Bound::Unbounded, Bound::Included),
        }
    }

    fn resolve_end(&self, sel: &KeySelector) -> Bound<Vec<u8>> {
        match sel {
            KeySelector::FirstGreaterOrEqual(k) => Bound::Excluded(k.clone()),
            KeySelector::FirstGreaterThan(k) => Bound::Included(k.clone()),
            KeySelector::LastLessThan(k) => {
                Bound::Excluded(self.last_before(Bound::Excluded(k)).unwrap_or_default())
            }
            KeySelector::LastLessOrEqual(k) => {
                Bound::Excluded(self.last_before(Bound::Included(k)).unwrap_or_default())
            }
        }
    }

    fn read_range(
        &mut self,
        begin: &KeySelector,
        end: &KeySelector,
        opts: RangeOptions,
        record: bool,
    ) -> Vec<KeyValue> {
        let lo = self.resolve_begin(begin);
        let hi = self.resolve_end(end);
        let rows = self.scan(borrowed(&lo), borrowed(&hi), opts);
        trace!(rows = rows.len(), reverse = opts.reverse, record, "mem range scan");
        if record {
            let mut span_lo = lo;
            // The resolution of a trailing selector depends on the keys up to
            // its anchor, so the conflict span reaches the anchor.
            let mut span_hi = match end {
                KeySelector::FirstGreaterOrEqual(k) | KeySelector::LastLessThan(k) => {
                    Bound::Excluded(k.clone())
                }
                KeySelector::FirstGreaterThan(k) | KeySelector::LastLessOrEqual(k) => {
                    Bound::Included(k.clone())
                }
            };
            if opts.limit.map_or(false, |n| rows.len() >= n) {
                if let Some((last, _)) = rows.last() {
                    if opts.reverse {
                        span_lo = Bound::Included(last.clone());
                    } else {
                        span_hi = Bound::Included(last.clone());
                    }
                }
            }
            self.reads
                .mark(KeyRange::from_bounds(borrowed(&span_lo), borrowed(&span_hi)));
        }
        rows
    }
}

impl KvTransaction for MemTransaction {
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.reads.mark(KeyRange::single(key));
        Ok(self.lookup(key))
    }

    fn set(&mut self, key: &[u8], value: &[u8]) {
        self.pending.insert(key.to_vec(), value.to_vec());
    }

    fn clear_range(&mut self, begin: &[u8], end: &[u8]) {
        if begin >= end {
            return;
        }
        let doomed: Vec<Vec<u8>> = self
            .pending
            .range::<[u8], _>((Bound::Included(begin), Bound::Excluded(end)))
            .map(|(k, _)| k.clone())
            .collect();
        for key in doomed {
            self.pending.remove(&key);
        }
        self.cleared.push(KeyRange {
            begin: begin.to_vec(),
            end: Some(end.to_vec()),
        });
    }

    fn get_range(
        &mut self,
        begin: &KeySelector,
        end: &KeySelector,
        opts: RangeOptions,
    ) -> Result<Vec<KeyValue>> {
        Ok(self.read_range(begin, end, opts, true))
    }

    fn snapshot_get_range(
        &mut self,
        begin: &KeySelector,
        end: &KeySelector,
        opts: RangeOptions,
    ) -> Result<Vec<KeyValue>> {
        Ok(self.read_range(begin, end, opts, false))
    }

    fn add_read_conflict_range(&mut self, begin: &[u8], end: &[u8]) {
        self.reads.mark(KeyRange {
            begin: begin.to_vec(),
            end: Some(end.to_vec()),
        });
    }

    fn commit(mut self) -> Result<()> {
        let writes = WriteSet {
            keys: self.pending.keys().cloned().collect(),
            cleared: std::mem::take(&mut self.cleared),
        };
        if writes.is_empty() {
            // Read-only transactions observed one snapshot and never conflict.
            return Ok(());
        }
        let mut state = self.inner.state.lock();
        if !self.reads.is_empty() {
            let read_version = self.read_version;
            let conflicted = state
                .log
                .iter()
                .filter(|(v, _)| *v > read_version)
                .any(|(_, committed)| self.reads.conflicts_with(committed));
            if conflicted {
                debug!(read_version, latest = state.version, "mem commit rejected: read set conflict");
                return Err(AggError::Conflict { attempts: 1 });
            }
        }
        let data = Arc::make_mut(&mut state.data);
        for range in &writes.cleared {
            let hi = match range.end.as_deref() {
                Some(end) => Bound::Excluded(end),
                None => Bound::Unbounded,
            };
            let doomed: Vec<Vec<u8>> = data
                .range::<[u8], _>((Bound::Included(range.begin.as_slice()), hi))
                .map(|(k, _)| k.clone())
                .collect();
            for key in doomed {
                data.remove(&key);
            }
        }
        for (key, value) in std::mem::take(&mut self.pending) {
            data.insert(key, value);
        }
        state.version += 1;
        let version = state.version;
        trace!(version, keys = writes.keys.len(), "mem commit applied");
        state.log.push_back((version, writes));
        state.prune();
        Ok(())
    }
}

impl Drop for MemTransaction {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        let released = match state.active.get_mut(&self.read_version) {
            Some(count) => {
                *count -= 1;
                *count == 0
            }
            None => false,
        };
        if released {
            state.active.remove(&self.read_version);
            state.prune();
        }
    }
}

fn borrowed(bound: &Bound<Vec<u8>>) -> Bound<&[u8]> {
    match bound {
        Bound::Included(k) => Bound::Included(k.as_slice()),
        Bound::Excluded(k) => Bound::Excluded(k.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

fn range_is_empty(lo: Bound<&[u8]>, hi: Bound<&[u8]>) -> bool {
    match (lo, hi) {
        (Bound::Included(a), Bound::Included(b)) => a > b,
        (Bound::Included(a), Bound::Excluded(b))
        | (Bound::Excluded(a), Bound::Included(b))
        | (Bound::Excluded(a), Bound::Excluded(b)) => a >= b,
        _ => false,
    }
}

fn merge<'a, A, B>(base: A, local: B, limit: usize, first: Ordering) -> Vec<KeyValue>
where
    A: Iterator<Item = (&'a Vec<u8>, &'a Vec<u8>)>,
    B: Iterator<Item = (&'a Vec<u8>, &'a Vec<u8>)>,
{
    let mut base = base.peekable();
    let mut local = local.peekable();
    let mut out = Vec::new();
    while out.len() < limit {
        let side = match (base.peek(), local.peek()) {
            (None, None) => break,
            (Some(_), None) => Side::Base,
            (None, Some(_)) => Side::Local,
            (Some((bk, _)), Some((lk, _))) => match bk.cmp(lk) {
                Ordering::Equal => Side::Both,
                ord if ord == first => Side::Base,
                _ => Side::Local,
            },
        };
        let picked = match side {
            Side::Base => base.next(),
            Side::Local => local.next(),
            Side::Both => {
                base.next();
                local.next()
            }
        };
        if let Some((k, v)) = picked {
            out.push((k.clone(), v.clone()));
        }
    }
    out
}
