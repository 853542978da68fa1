//! Folding scanned rows into per-group aggregates.

use super::query::QueryRow;
use crate::key::Key;
use crate::reduce::Reducer;

/// Appends `rows` to `out`, reducing runs that share a group key.
///
/// A leading run with the same key as the last emitted row is folded into
/// that row, so collating in several passes over one group yields one row.
pub(crate) fn collate<R, I>(reducer: &R, rows: I, out: &mut Vec<QueryRow<R::Value>>)
where
    R: Reducer,
    I: IntoIterator<Item = (Option<Key>, R::Value)>,
{
    for (key, value) in rows {
        match out.last_mut() {
            Some(last) if last.key == key => {
                last.value = reducer.combine(&last.value, &value);
            }
            _ => out.push(QueryRow { key, value }),
        }
    }
}
