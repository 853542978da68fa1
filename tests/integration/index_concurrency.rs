#![allow(missing_docs)]

use std::sync::{Arc, Barrier};
use std::thread;

use levelagg::{
    key, AggError, AggIndex, CounterMetrics, IndexOptions, KeySelector, KvStore, KvTransaction,
    MemStore, QueryOpts, QueryRow, RangeOptions, RetryPolicy, Result, Sum,
};

const WRITERS: usize = 4;
const PER_WRITER: i64 = 60;

fn retrying() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 1_000,
        initial_backoff_ms: 0,
        max_backoff_ms: 1,
    }
}

#[test]
fn concurrent_writers_keep_invariants() -> Result<()> {
    let metrics = Arc::new(CounterMetrics::default());
    let index = Arc::new(
        AggIndex::open(
            MemStore::new(),
            Sum::<i64>::new(),
            IndexOptions::new().max_level(4).fanout_exponent(1).retry(retrying()),
        )?
        .with_metrics(metrics.clone()),
    );
    let barrier = Arc::new(Barrier::new(WRITERS));

    let handles: Vec<_> = (0..WRITERS as i64)
        .map(|writer| {
            let index = Arc::clone(&index);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || -> Result<()> {
                barrier.wait();
                for n in 0..PER_WRITER {
                    // Interleave writers across the same key space.
                    index.insert(&key![n, writer], 1)?;
                }
                Ok(())
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer panicked")?;
    }

    index.check_invariants()?;
    let expected = WRITERS as i64 * PER_WRITER;
    assert_eq!(
        index.query(&QueryOpts::new())?,
        vec![QueryRow { key: None, value: expected }]
    );
    let per_n = index.query(&QueryOpts::new().group_level(1))?;
    assert_eq!(per_n.len(), PER_WRITER as usize);
    assert!(per_n.iter().all(|row| row.value == WRITERS as i64));
    assert_eq!(
        CounterMetrics::get(&metrics.inserts),
        WRITERS as u64 * PER_WRITER as u64
    );
    Ok(())
}

#[test]
fn conflict_surfaces_after_retry_budget() -> Result<()> {
    let store = MemStore::new();
    let index = AggIndex::open(
        store.clone(),
        Sum::<i64>::new(),
        IndexOptions::new().retry(RetryPolicy::no_retry()),
    )?;

    // A transaction that read a level-0 key loses when the index writes it.
    let mut stale = store.begin()?;
    index.insert(&key![1], 1)?;
    let raw = first_user_key(&store)?;
    stale.get(&raw)?;
    stale.set(&raw, &[0u8; 8]);
    index.insert(&key![1], 1)?;
    assert!(matches!(stale.commit(), Err(AggError::Conflict { .. })));

    assert_eq!(
        index.query(&QueryOpts::new())?,
        vec![QueryRow { key: None, value: 2 }]
    );
    Ok(())
}

fn first_user_key(store: &MemStore) -> Result<Vec<u8>> {
    let mut tx = store.begin()?;
    let rows = tx.snapshot_get_range(
        &KeySelector::exact(vec![0x00]),
        &KeySelector::exact(vec![0xFF]),
        RangeOptions::default(),
    )?;
    rows.into_iter()
        .map(|(k, _)| k)
        .find(|k| k.get(2) == Some(&0x01))
        .ok_or_else(|| AggError::Invariant("no user key stored".into()))
}

#[test]
fn queries_read_one_consistent_view() -> Result<()> {
    let index = Arc::new(AggIndex::open(
        MemStore::new(),
        Sum::<i64>::new(),
        IndexOptions::new().max_level(3).fanout_exponent(1).retry(retrying()),
    )?);
    let writer = {
        let index = Arc::clone(&index);
        thread::spawn(move || -> Result<()> {
            for n in 0..200 {
                index.insert(&key![n], 1)?;
            }
            Ok(())
        })
    };
    let mut last = 0;
    for _ in 0..50 {
        let total = index.query(&QueryOpts::new())?[0].value;
        let counted = index.query(&QueryOpts::new().ungrouped().start(key![0]))?.len() as i64;
        assert!(total >= last, "total went backwards: {total} < {last}");
        assert!(counted >= total);
        last = total;
    }
    writer.join().expect("writer panicked")?;
    index.check_invariants()?;
    assert_eq!(index.query(&QueryOpts::new())?[0].value, 200);
    Ok(())
}
