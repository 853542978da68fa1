//! Range and group-by queries answered by traversing the levels.
//!
//! A query walks forward from its resolved start key. At each step it climbs
//! as high as the level structure allows without crossing the current group's
//! last key, consumes the upper-level aggregates in that span, and falls back
//! to a level-0 scan to finish each group.

use serde::Serialize;
use tracing::{debug, trace};

use super::collate::collate;
use super::layout::LevelTx;
use crate::error::{AggError, Result};
use crate::key::{IndexKey, Key};
use crate::reduce::Reducer;
use crate::store::KvTransaction;

/// Bounds and grouping for a query.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryOpts {
    /// Inclusive lower bound; resolved to the first stored key at or after it.
    pub start_key: Option<Key>,
    /// Inclusive upper bound; resolved to the last stored key at or before it.
    pub end_key: Option<Key>,
    /// Number of leading key components rows are grouped by; 0 reduces the
    /// whole range into a single row.
    pub group_level: usize,
    /// Return the raw level-0 rows instead of aggregates.
    pub ungrouped: bool,
}

impl QueryOpts {
    /// A query over the whole index reduced into one row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the inclusive lower bound.
    pub fn start(mut self, key: Key) -> Self {
        self.start_key = Some(key);
        self
    }

    /// Sets the inclusive upper bound.
    pub fn end(mut self, key: Key) -> Self {
        self.end_key = Some(key);
        self
    }

    /// Groups rows by their first `level` components.
    pub fn group_level(mut self, level: usize) -> Self {
        self.group_level = level;
        self
    }

    /// Returns raw rows.
    pub fn ungrouped(mut self) -> Self {
        self.ungrouped = true;
        self
    }
}

/// One result row: a group key (absent for group level 0) and its aggregate.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QueryRow<V> {
    /// Group key, or the full key for ungrouped queries.
    pub key: Option<Key>,
    /// Reduced value of the group.
    pub value: V,
}

/// Which strategy answered a query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryPath {
    /// The bounds resolved to no stored keys.
    Empty,
    /// Reduced directly from the top level.
    Fast,
    /// A single level-0 scan returning raw rows.
    Ungrouped,
    /// The level traversal.
    Traversal,
}

/// One range scan issued while answering a query.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScanRecord {
    /// Level scanned.
    pub level: u8,
    /// First key of the scanned span, absent when it starts at the sentinel.
    pub start: Option<Key>,
    /// Last key of the scanned span (inclusive), absent for open spans.
    pub end: Option<Key>,
    /// Entries returned.
    pub rows: usize,
}

/// Per-query record of how the result was computed.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QueryTrace {
    /// Strategy used.
    pub path: QueryPath,
    /// Traversal steps taken.
    pub steps: u64,
    /// Scans in the order they were issued.
    pub scans: Vec<ScanRecord>,
}

impl QueryTrace {
    fn new(path: QueryPath) -> Self {
        Self { path, steps: 0, scans: Vec::new() }
    }

    fn record(&mut self, level: u8, start: Option<&Key>, end: Option<&Key>, rows: usize) {
        self.scans.push(ScanRecord {
            level,
            start: start.cloned(),
            end: end.cloned(),
            rows,
        });
    }

    /// Scans issued above level 0.
    pub fn upper_level_scans(&self) -> usize {
        self.scans.iter().filter(|s| s.level > 0).count()
    }
}

/// Limits the traversal works under.
pub(crate) struct Limits {
    pub(crate) max_level: u8,
    pub(crate) key_arity: Option<usize>,
    pub(crate) max_steps: u64,
}

enum Step {
    /// Consume `level` entries in `[current, stop)` and move to `stop`.
    Advance { level: u8, stop: Key },
    /// Scan the rest of the group at level 0.
    Finish,
}

/// Checks bounds and group level before any store access.
pub(crate) fn validate(opts: &QueryOpts, limits: &Limits) -> Result<()> {
    if let (Some(start), Some(end)) = (&opts.start_key, &opts.end_key) {
        if start > end {
            return Err(AggError::Range(format!("start key {start} is after end key {end}")));
        }
    }
    if let Some(arity) = limits.key_arity {
        if opts.group_level > arity {
            return Err(AggError::Config(format!(
                "group level {} exceeds key arity {arity}",
                opts.group_level
            )));
        }
    }
    Ok(())
}

/// Answers `opts` inside the caller's transaction.
pub(crate) fn run<T, R>(
    lt: &mut LevelTx<'_, T, R>,
    opts: &QueryOpts,
    limits: &Limits,
) -> Result<(Vec<QueryRow<R::Value>>, QueryTrace)>
where
    T: KvTransaction,
    R: Reducer,
{
    let reducer = lt.reducer();

    if !opts.ungrouped
        && opts.group_level == 0
        && opts.start_key.is_none()
        && opts.end_key.is_none()
    {
        let mut trace = QueryTrace::new(QueryPath::Fast);
        let entries = lt.scan_level(limits.max_level)?;
        trace.record(limits.max_level, None, None, entries.len());
        let total = reducer.reduce(entries.iter().map(|e| &e.value));
        return Ok((vec![QueryRow { key: None, value: total }], trace));
    }

    let Some((start, end)) = resolve_bounds(lt, opts)? else {
        debug!("query bounds resolve to no stored keys");
        return Ok((Vec::new(), QueryTrace::new(QueryPath::Empty)));
    };

    if opts.ungrouped {
        let mut trace = QueryTrace::new(QueryPath::Ungrouped);
        let entries = lt.range(0, &start.clone().into(), &end.clone().into(), true)?;
        trace.record(0, Some(&start), Some(&end), entries.len());
        let rows = entries
            .into_iter()
            .filter_map(|e| {
                let value = e.value;
                e.key.into_key().map(|key| QueryRow { key: Some(key), value })
            })
            .collect();
        return Ok((rows, trace));
    }

    traverse(lt, opts.group_level, start, end, limits)
}

fn resolve_bounds<T, R>(lt: &mut LevelTx<'_, T, R>, opts: &QueryOpts) -> Result<Option<(Key, Key)>>
where
    T: KvTransaction,
    R: Reducer,
{
    let end = match &opts.end_key {
        Some(key) => lt.seek_le(0, &IndexKey::Tuple(key.clone()))?,
        None => lt.seek_le(0, &IndexKey::Max)?,
    };
    let Some(end) = end else { return Ok(None) };
    let start = match &opts.start_key {
        Some(key) => lt.seek_ge(0, &IndexKey::Tuple(key.clone()))?,
        None => lt.seek_gt(0, &IndexKey::Min)?,
    };
    Ok(start.filter(|start| *start <= end).map(|start| (start, end)))
}

fn traverse<T, R>(
    lt: &mut LevelTx<'_, T, R>,
    group_level: usize,
    start: Key,
    end: Key,
    limits: &Limits,
) -> Result<(Vec<QueryRow<R::Value>>, QueryTrace)>
where
    T: KvTransaction,
    R: Reducer,
{
    let reducer = lt.reducer();
    let mut trace = QueryTrace::new(QueryPath::Traversal);
    let mut out = Vec::new();
    let mut pending: Vec<(Option<Key>, R::Value)> = Vec::new();
    let mut current = start;

    loop {
        trace.steps += 1;
        if trace.steps > limits.max_steps {
            return Err(AggError::invariant(format!(
                "query did not reach {end} within {} steps (stuck at {current})",
                limits.max_steps
            )));
        }

        let group_end = group_end(lt, &current, &end, group_level)?;
        match choose_step(lt, &current, &group_end, limits.max_level)? {
            Step::Advance { level, stop } => {
                let entries = lt.range(level, &current.clone().into(), &stop.clone().into(), true)?;
                trace.record(level, Some(&current), Some(&stop), entries.len());
                let Some((last, consumed)) = entries.split_last() else {
                    return Err(AggError::invariant(format!(
                        "level {level} scan [{current}, {stop}] returned nothing"
                    )));
                };
                if last.key.as_key() != Some(&stop) {
                    return Err(AggError::invariant(format!(
                        "level {level} scan ended at {} instead of {stop}",
                        last.key
                    )));
                }
                trace!(level, from = %current, to = %stop, consumed = consumed.len(), "advance");
                let group = current.group_prefix(group_level);
                pending.extend(consumed.iter().map(|e| (group.clone(), e.value.clone())));
                if stop <= current {
                    return Err(AggError::invariant(format!(
                        "traversal moved backwards from {current} to {stop}"
                    )));
                }
                current = stop;
            }
            Step::Finish => {
                let entries = lt.range(0, &current.clone().into(), &group_end.clone().into(), true)?;
                trace.record(0, Some(&current), Some(&group_end), entries.len());
                let scanned = entries.into_iter().filter_map(|e| {
                    let value = e.value;
                    e.key.into_key().map(|key| (key.group_prefix(group_level), value))
                });
                collate(reducer, pending.drain(..).chain(scanned), &mut out);

                if group_end == end {
                    break;
                }
                match lt.seek_gt(0, &group_end.clone().into())? {
                    Some(next) if next <= end => current = next,
                    other => {
                        return Err(AggError::invariant(format!(
                            "no level-0 key after {group_end} within {end} (found {other:?})"
                        )))
                    }
                }
            }
        }
    }

    debug!(steps = trace.steps, scans = trace.scans.len(), rows = out.len(), "traversal complete");
    Ok((out, trace))
}

/// Last level-0 key sharing `current`'s group, clipped to `end`.
fn group_end<T, R>(
    lt: &mut LevelTx<'_, T, R>,
    current: &Key,
    end: &Key,
    group_level: usize,
) -> Result<Key>
where
    T: KvTransaction,
    R: Reducer,
{
    let Some(prefix) = current.group_prefix(group_level) else {
        return Ok(end.clone());
    };
    // A key shorter than the group level is a group of its own; its byte
    // extensions belong to other groups.
    if current.arity() < group_level {
        return Ok(current.clone());
    }
    let last = lt.last_in_group(0, &prefix)?.ok_or_else(|| {
        AggError::invariant(format!("group {prefix} has no level-0 key but {current} is in it"))
    })?;
    Ok(if last < *end { last } else { end.clone() })
}

/// Picks the highest level whose entries can be consumed from `current`
/// without passing `group_end`.
fn choose_step<T, R>(
    lt: &mut LevelTx<'_, T, R>,
    current: &Key,
    group_end: &Key,
    max_level: u8,
) -> Result<Step>
where
    T: KvTransaction,
    R: Reducer,
{
    if current == group_end {
        return Ok(Step::Finish);
    }
    let here = IndexKey::Tuple(current.clone());
    let mut best = None;
    for level in 0..max_level {
        let up = level + 1;
        match lt.seek_ge(up, &here)? {
            Some(found) if found == *current => {
                match lt.seek_le(up, &IndexKey::Tuple(group_end.clone()))? {
                    Some(reach) if reach > *current => best = Some((up, reach)),
                    _ => break,
                }
            }
            Some(neighbor) if neighbor <= *group_end => {
                return Ok(Step::Advance { level, stop: neighbor });
            }
            _ => break,
        }
    }
    Ok(match best {
        Some((level, stop)) => Step::Advance { level, stop },
        None => Step::Finish,
    })
}
