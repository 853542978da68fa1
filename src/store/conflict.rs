//! Read/write set bookkeeping for optimistic conflict detection.

use std::collections::BTreeSet;
use std::ops::Bound;

/// Half-open byte range `[begin, end)`; `end == None` is unbounded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyRange {
    /// Inclusive lower bound.
    pub begin: Vec<u8>,
    /// Exclusive upper bound, or `None` for the end of the key space.
    pub end: Option<Vec<u8>>,
}

impl KeyRange {
    /// Range covering exactly `key`.
    pub fn single(key: &[u8]) -> Self {
        Self {
            begin: key.to_vec(),
            end: Some(key_after(key)),
        }
    }

    /// Converts standard bounds into a half-open range.
    pub fn from_bounds(lo: Bound<&[u8]>, hi: Bound<&[u8]>) -> Self {
        let begin = match lo {
            Bound::Included(k) => k.to_vec(),
            Bound::Excluded(k) => key_after(k),
            Bound::Unbounded => Vec::new(),
        };
        let end = match hi {
            Bound::Included(k) => Some(key_after(k)),
            Bound::Excluded(k) => Some(k.to_vec()),
            Bound::Unbounded => None,
        };
        Self { begin, end }
    }

    /// Returns true when `key` lies inside the range.
    pub fn contains(&self, key: &[u8]) -> bool {
        key >= self.begin.as_slice() && self.end.as_deref().map_or(true, |end| key < end)
    }

    /// Returns true when the two ranges share at least one key.
    pub fn overlaps(&self, other: &KeyRange) -> bool {
        let self_before_other = self
            .end
            .as_deref()
            .map_or(false, |end| end <= other.begin.as_slice());
        let other_before_self = other
            .end
            .as_deref()
            .map_or(false, |end| end <= self.begin.as_slice());
        !self.is_empty() && !other.is_empty() && !self_before_other && !other_before_self
    }

    fn is_empty(&self) -> bool {
        self.end
            .as_deref()
            .map_or(false, |end| end <= self.begin.as_slice())
    }
}

/// The smallest key strictly greater than `key`.
pub(crate) fn key_after(key: &[u8]) -> Vec<u8> {
    let mut next = Vec::with_capacity(key.len() + 1);
    next.extend_from_slice(key);
    next.push(0);
    next
}

/// Spans read by a transaction.
#[derive(Debug, Default)]
pub(crate) struct ReadSet {
    ranges: Vec<KeyRange>,
}

impl ReadSet {
    pub(crate) fn mark(&mut self, range: KeyRange) {
        self.ranges.push(range);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub(crate) fn conflicts_with(&self, writes: &WriteSet) -> bool {
        self.ranges.iter().any(|read| {
            writes.keys.iter().any(|k| read.contains(k))
                || writes.cleared.iter().any(|c| read.overlaps(c))
        })
    }
}

/// Keys and ranges written by a committed transaction.
#[derive(Debug, Default)]
pub(crate) struct WriteSet {
    pub(crate) keys: BTreeSet<Vec<u8>>,
    pub(crate) cleared: Vec<KeyRange>,
}

impl WriteSet {
    pub(crate) fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.cleared.is_empty()
    }
}
