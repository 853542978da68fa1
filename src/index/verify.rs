//! Structural checks over every level of an index.

use serde::Serialize;
use tracing::warn;

use super::layout::{Entry, LevelTx};
use super::promote;
use crate::error::Result;
use crate::key::IndexKey;
use crate::reduce::Reducer;
use crate::store::KvTransaction;

const MAX_FINDINGS: usize = 32;

/// One violated invariant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VerifyFinding {
    /// Level the violation was found at.
    pub level: u8,
    /// Human-readable description.
    pub message: String,
}

/// Result of [`super::AggIndex::verify`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VerifyReport<V> {
    /// True when no finding was recorded.
    pub success: bool,
    /// Violations, capped at a fixed number.
    pub findings: Vec<VerifyFinding>,
    /// Reduced value of each level, level 0 first.
    pub level_totals: Vec<V>,
    /// Stored entries per level, sentinel included.
    pub entries_per_level: Vec<usize>,
}

pub(crate) fn verify<T, R>(
    lt: &mut LevelTx<'_, T, R>,
    max_level: u8,
    fanout_exponent: u8,
) -> Result<VerifyReport<R::Value>>
where
    T: KvTransaction,
    R: Reducer,
{
    let reducer = lt.reducer();
    let mut levels = Vec::with_capacity(usize::from(max_level) + 1);
    for level in 0..=max_level {
        levels.push(lt.scan_level(level)?);
    }

    let mut findings = Vec::new();
    let level_totals: Vec<R::Value> = levels
        .iter()
        .map(|entries| reducer.reduce(entries.iter().map(|e| &e.value)))
        .collect();

    for (level, entries) in (0u8..).zip(&levels) {
        match entries.first() {
            Some(first) if first.key == IndexKey::Min => {
                if level == 0 && first.value != reducer.identity() {
                    push(&mut findings, 0, format!("level 0 sentinel holds {:?}", first.value));
                }
            }
            _ => push(&mut findings, level, "minimum sentinel missing".to_string()),
        }
        if level > 0 && level_totals[usize::from(level)] != level_totals[0] {
            push(
                &mut findings,
                level,
                format!(
                    "level total {:?} differs from level 0 total {:?}",
                    level_totals[usize::from(level)],
                    level_totals[0]
                ),
            );
        }
    }

    for level in 1..=max_level {
        let below = &levels[usize::from(level) - 1];
        let here = &levels[usize::from(level)];
        check_membership(&mut findings, level, fanout_exponent, below, here);
        check_coverage(&mut findings, reducer, level, below, here);
    }

    let success = findings.is_empty();
    if !success {
        warn!(findings = findings.len(), "index verification failed");
    }
    Ok(VerifyReport {
        success,
        findings,
        level_totals,
        entries_per_level: levels.iter().map(Vec::len).collect(),
    })
}

/// Keys at `level` are exactly the keys below it promoted to `level`.
fn check_membership<V>(
    findings: &mut Vec<VerifyFinding>,
    level: u8,
    fanout_exponent: u8,
    below: &[Entry<V>],
    here: &[Entry<V>],
) {
    let mut cursor = below.iter().peekable();
    for entry in here {
        let Some(key) = entry.key.as_key() else { continue };
        if !promote::is_promoted(key, level, fanout_exponent) {
            push(findings, level, format!("{key} stored but not promoted"));
        }
        while cursor.next_if(|e| e.key < entry.key).is_some() {}
        if cursor.peek().map(|e| &e.key) != Some(&entry.key) {
            push(findings, level, format!("{key} missing from level {}", level - 1));
        }
    }

    let mut cursor = here.iter().peekable();
    for entry in below {
        let Some(key) = entry.key.as_key() else { continue };
        if !promote::is_promoted(key, level, fanout_exponent) {
            continue;
        }
        while cursor.next_if(|e| e.key < entry.key).is_some() {}
        if cursor.peek().map(|e| &e.key) != Some(&entry.key) {
            push(findings, level, format!("{key} promoted but not stored"));
        }
    }
}

/// Each entry at `level` reduces the entries below it up to the next key.
fn check_coverage<R: Reducer>(
    findings: &mut Vec<VerifyFinding>,
    reducer: &R,
    level: u8,
    below: &[Entry<R::Value>],
    here: &[Entry<R::Value>],
) {
    let mut idx = 0;
    for (pos, entry) in here.iter().enumerate() {
        let next = here.get(pos + 1).map_or(&IndexKey::Max, |e| &e.key);
        while idx < below.len() && below[idx].key < entry.key {
            idx += 1;
        }
        let begin = idx;
        while idx < below.len() && below[idx].key < *next {
            idx += 1;
        }
        let expected = reducer.reduce(below[begin..idx].iter().map(|e| &e.value));
        if expected != entry.value {
            push(
                findings,
                level,
                format!(
                    "{} holds {:?}, span up to {next} reduces to {expected:?}",
                    entry.key, entry.value
                ),
            );
        }
    }
}

fn push(findings: &mut Vec<VerifyFinding>, level: u8, message: String) {
    if findings.len() < MAX_FINDINGS {
        findings.push(VerifyFinding { level, message });
    }
}
