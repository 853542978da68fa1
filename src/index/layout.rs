//! Two-part addressing of index entries, `(level, key)`, and the typed
//! per-level reads and writes the insert and query paths are built from.

use crate::error::{AggError, Result};
use crate::key::{IndexKey, Key, PART_END};
use crate::primitives::bytes::{ord, prefix_end};
use crate::reduce::{self, Reducer, ValCodec};
use crate::store::{KeySelector, KvTransaction, RangeOptions};

/// Maps `(level, key)` onto store keys: `namespace ++ [level] ++ encoded key`.
///
/// The namespace is the escaped, terminated index prefix, so no index's
/// namespace is a byte prefix of another's.
#[derive(Clone, Debug)]
pub(crate) struct Layout {
    namespace: Vec<u8>,
}

impl Layout {
    pub(crate) fn new(prefix: &str) -> Self {
        let mut namespace = Vec::with_capacity(prefix.len() + 1);
        ord::push_escaped(&mut namespace, prefix.as_bytes());
        Self { namespace }
    }

    fn level_base(&self, level: u8) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.namespace.len() + 16);
        out.extend_from_slice(&self.namespace);
        out.push(level);
        out
    }

    pub(crate) fn entry_key(&self, level: u8, key: &IndexKey) -> Vec<u8> {
        let mut out = self.level_base(level);
        key.encode(&mut out);
        out
    }

    /// Exclusive store key bounding every entry whose key starts with `prefix`.
    ///
    /// Text sharing the prefix's last component as a byte prefix (an embedded
    /// NUL continues past the terminator) sorts after this bound.
    pub(crate) fn group_upper(&self, level: u8, prefix: &Key) -> Vec<u8> {
        let mut raw = self.entry_key(level, &IndexKey::Tuple(prefix.clone()));
        raw.push(PART_END);
        raw
    }

    pub(crate) fn decode(&self, level: u8, raw: &[u8]) -> Result<IndexKey> {
        let base = self.level_base(level);
        match raw.strip_prefix(base.as_slice()) {
            Some(encoded) => IndexKey::decode(encoded),
            None => Err(AggError::Codec("store key outside the index level")),
        }
    }

    /// `[begin, end)` covering every entry of the index at every level.
    pub(crate) fn namespace_range(&self) -> (Vec<u8>, Vec<u8>) {
        let end = prefix_end(&self.namespace).unwrap_or_else(|| vec![0xFF]);
        (self.namespace.clone(), end)
    }
}

/// An index entry: a position at some level and its aggregate.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Entry<V> {
    pub(crate) key: IndexKey,
    pub(crate) value: V,
}

/// Typed view of one transaction over the levels of one index.
pub(crate) struct LevelTx<'a, T, R> {
    tx: &'a mut T,
    layout: &'a Layout,
    reducer: &'a R,
}

impl<'a, T, R> LevelTx<'a, T, R>
where
    T: KvTransaction,
    R: Reducer,
{
    pub(crate) fn new(tx: &'a mut T, layout: &'a Layout, reducer: &'a R) -> Self {
        Self { tx, layout, reducer }
    }

    pub(crate) fn reducer(&self) -> &'a R {
        self.reducer
    }

    pub(crate) fn get(&mut self, level: u8, key: &IndexKey) -> Result<Option<R::Value>> {
        let raw = self.layout.entry_key(level, key);
        match self.tx.get(&raw)? {
            Some(bytes) => Ok(Some(R::Value::decode_val(&bytes)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn set(&mut self, level: u8, key: &IndexKey, value: &R::Value) {
        let raw = self.layout.entry_key(level, key);
        self.tx.set(&raw, &reduce::encode::<R>(value));
    }

    pub(crate) fn clear_all(&mut self) {
        let (begin, end) = self.layout.namespace_range();
        self.tx.clear_range(&begin, &end);
    }

    /// Registers `[start, stop]` at `level` as read.
    pub(crate) fn guard(&mut self, level: u8, start: &IndexKey, stop: &IndexKey) {
        let begin = self.layout.entry_key(level, start);
        let mut end = self.layout.entry_key(level, stop);
        end.push(0);
        self.tx.add_read_conflict_range(&begin, &end);
    }

    /// Every entry of `level`, sentinel included.
    pub(crate) fn scan_level(&mut self, level: u8) -> Result<Vec<Entry<R::Value>>> {
        let begin = KeySelector::exact(self.layout.entry_key(level, &IndexKey::Min));
        let end = KeySelector::exact(self.layout.entry_key(level, &IndexKey::Max));
        let rows = self.tx.get_range(&begin, &end, RangeOptions::default())?;
        self.decode_rows(level, rows)
    }

    /// Entries of `level` in `[start, stop)`, or `[start, stop]` when
    /// `inclusive`, registering the span as read.
    pub(crate) fn range(
        &mut self,
        level: u8,
        start: &IndexKey,
        stop: &IndexKey,
        inclusive: bool,
    ) -> Result<Vec<Entry<R::Value>>> {
        let begin = KeySelector::exact(self.layout.entry_key(level, start));
        let stop_raw = self.layout.entry_key(level, stop);
        let end = if inclusive {
            KeySelector::FirstGreaterThan(stop_raw)
        } else {
            KeySelector::exact(stop_raw)
        };
        let rows = self.tx.get_range(&begin, &end, RangeOptions::default())?;
        self.decode_rows(level, rows)
    }

    /// Reduces the entries of `level` in `[start, stop)`.
    pub(crate) fn reduce_range(
        &mut self,
        level: u8,
        start: &IndexKey,
        stop: &IndexKey,
    ) -> Result<R::Value> {
        let entries = self.range(level, start, stop, false)?;
        Ok(self.reducer.reduce(entries.iter().map(|e| &e.value)))
    }

    /// Nearest entry strictly before `key` at `level`.
    ///
    /// The minimum sentinel guarantees one exists for any real key.
    pub(crate) fn previous(&mut self, level: u8, key: &IndexKey) -> Result<Entry<R::Value>> {
        let begin = KeySelector::exact(self.layout.entry_key(level, &IndexKey::Min));
        let end = KeySelector::exact(self.layout.entry_key(level, key));
        self.probe(level, &begin, &end, true)?.ok_or_else(|| {
            AggError::invariant(format!("level {level} has no entry before {key}; sentinel missing"))
        })
    }

    /// Nearest entry strictly after `key` at `level`, or the maximum sentinel.
    pub(crate) fn next(&mut self, level: u8, key: &IndexKey) -> Result<Entry<R::Value>> {
        let begin = KeySelector::FirstGreaterThan(self.layout.entry_key(level, key));
        let end = KeySelector::exact(self.layout.entry_key(level, &IndexKey::Max));
        Ok(self.probe(level, &begin, &end, false)?.unwrap_or_else(|| Entry {
            key: IndexKey::Max,
            value: self.reducer.identity(),
        }))
    }

    /// First real key `>= key` at `level`.
    pub(crate) fn seek_ge(&mut self, level: u8, key: &IndexKey) -> Result<Option<Key>> {
        let begin = KeySelector::FirstGreaterOrEqual(self.layout.entry_key(level, key));
        let end = KeySelector::exact(self.layout.entry_key(level, &IndexKey::Max));
        Ok(self
            .probe(level, &begin, &end, false)?
            .and_then(|entry| entry.key.into_key()))
    }

    /// First real key `> key` at `level`.
    pub(crate) fn seek_gt(&mut self, level: u8, key: &IndexKey) -> Result<Option<Key>> {
        let begin = KeySelector::FirstGreaterThan(self.layout.entry_key(level, key));
        let end = KeySelector::exact(self.layout.entry_key(level, &IndexKey::Max));
        Ok(self
            .probe(level, &begin, &end, false)?
            .and_then(|entry| entry.key.into_key()))
    }

    /// Last real key `<= key` at `level`.
    pub(crate) fn seek_le(&mut self, level: u8, key: &IndexKey) -> Result<Option<Key>> {
        let begin = KeySelector::exact(self.layout.entry_key(level, &IndexKey::Min));
        let end = KeySelector::FirstGreaterThan(self.layout.entry_key(level, key));
        Ok(self
            .probe(level, &begin, &end, true)?
            .and_then(|entry| entry.key.into_key()))
    }

    /// Last real key at `level` that starts with `prefix`.
    pub(crate) fn last_in_group(&mut self, level: u8, prefix: &Key) -> Result<Option<Key>> {
        let begin = KeySelector::exact(self.layout.entry_key(level, &IndexKey::Min));
        let end = KeySelector::exact(self.layout.group_upper(level, prefix));
        Ok(self
            .probe(level, &begin, &end, true)?
            .and_then(|entry| entry.key.into_key())
            .filter(|key| key.parts().starts_with(prefix.parts())))
    }

    fn probe(
        &mut self,
        level: u8,
        begin: &KeySelector,
        end: &KeySelector,
        reverse: bool,
    ) -> Result<Option<Entry<R::Value>>> {
        let mut opts = RangeOptions::default().limit(1);
        if reverse {
            opts = opts.reverse();
        }
        let rows = self.tx.snapshot_get_range(begin, end, opts)?;
        Ok(self.decode_rows(level, rows)?.pop())
    }

    fn decode_rows(
        &self,
        level: u8,
        rows: Vec<(Vec<u8>, Vec<u8>)>,
    ) -> Result<Vec<Entry<R::Value>>> {
        rows.into_iter()
            .map(|(raw, bytes)| {
                Ok(Entry {
                    key: self.layout.decode(level, &raw)?,
                    value: R::Value::decode_val(&bytes)?,
                })
            })
            .collect()
    }
}
