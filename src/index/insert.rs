//! Level maintenance for a single insert.

use tracing::trace;

use super::layout::{Entry, LevelTx};
use super::promote;
use crate::error::Result;
use crate::key::{IndexKey, Key};
use crate::reduce::Reducer;
use crate::store::KvTransaction;

/// Writes `key -> value` into every level, returning the key's top level.
///
/// Level 0 merges duplicates with the reducer. At each upper level the key
/// either owns an entry (and splits its predecessor's span) or folds into the
/// predecessor that covers it. Spans the insert recomputes or extends are
/// registered as read so a concurrent insert into them conflicts.
pub(crate) fn apply_insert<T, R>(
    lt: &mut LevelTx<'_, T, R>,
    max_level: u8,
    fanout_exponent: u8,
    key: &Key,
    value: &R::Value,
) -> Result<u8>
where
    T: KvTransaction,
    R: Reducer,
{
    let reducer = lt.reducer();
    let ik = IndexKey::Tuple(key.clone());

    let merged = match lt.get(0, &ik)? {
        Some(existing) => reducer.combine(&existing, value),
        None => value.clone(),
    };
    lt.set(0, &ik, &merged);

    let mut top = 0;
    for level in 1..=max_level {
        let prev = lt.previous(level, &ik)?;
        if promote::is_promoted(key, level, fanout_exponent) {
            top = level;
            split_predecessor(lt, level, &prev, &ik)?;
            let next = lt.next(level, &ik)?;
            let own = lt.reduce_range(level - 1, &ik, &next.key)?;
            lt.guard(level, &prev.key, &next.key);
            trace!(level, key = %key, next = %next.key, "owning span");
            lt.set(level, &ik, &own);
        } else {
            lt.guard(level, &prev.key, &ik);
            let folded = reducer.combine(&prev.value, value);
            lt.set(level, &prev.key, &folded);
        }
    }
    Ok(top)
}

/// Recomputes the predecessor at `level` over `[prev, key)` one level down.
fn split_predecessor<T, R>(
    lt: &mut LevelTx<'_, T, R>,
    level: u8,
    prev: &Entry<R::Value>,
    key: &IndexKey,
) -> Result<()>
where
    T: KvTransaction,
    R: Reducer,
{
    let shrunk = lt.reduce_range(level - 1, &prev.key, key)?;
    if shrunk != prev.value {
        lt.set(level, &prev.key, &shrunk);
    }
    Ok(())
}
