#![allow(missing_docs)]

use levelagg::{
    key, AggError, AggIndex, IndexKey, IndexOptions, Key, MemStore, QueryOpts, QueryPath,
    QueryRow, Result, Sum,
};

const SALES: &[([i64; 3], i64)] = &[
    ([2017, 3, 1], 9),
    ([2017, 4, 1], 7),
    ([2019, 3, 1], 4),
    ([2017, 4, 15], 6),
    ([2018, 4, 1], 3),
    ([2017, 5, 1], 9),
    ([2018, 3, 1], 6),
    ([2018, 4, 1], 4),
    ([2018, 5, 1], 7),
    ([2019, 4, 1], 6),
    ([2019, 5, 1], 7),
];

fn layouts() -> Vec<IndexOptions> {
    vec![
        IndexOptions::new(),
        IndexOptions::new().max_level(4).fanout_exponent(1),
        IndexOptions::new().max_level(8).fanout_exponent(1).prefix("sales"),
    ]
}

fn sales_index(options: IndexOptions) -> Result<AggIndex<MemStore, Sum<i64>>> {
    let index = AggIndex::open(MemStore::new(), Sum::new(), options)?;
    for (parts, value) in SALES {
        index.insert(&key![parts[0], parts[1], parts[2]], *value)?;
    }
    Ok(index)
}

fn total(value: i64) -> Vec<QueryRow<i64>> {
    vec![QueryRow { key: None, value }]
}

#[test]
fn sales_totals_and_ranges() -> Result<()> {
    for options in layouts() {
        let index = sales_index(options)?;
        index.check_invariants()?;

        assert_eq!(index.query(&QueryOpts::new())?, total(68));
        assert_eq!(index.query(&QueryOpts::new().start(key![2018, 3, 2]))?, total(31));
        assert_eq!(
            index.query(&QueryOpts::new().start(key![2018, 3, 2]).end(key![2019, 3, 2]))?,
            total(18)
        );
    }
    Ok(())
}

#[test]
fn sales_grouped_by_year() -> Result<()> {
    for options in layouts() {
        let index = sales_index(options)?;
        let rows = index.query(
            &QueryOpts::new()
                .start(key![2017, 4, 1])
                .end(key![2018, 3, 1])
                .group_level(1),
        )?;
        assert_eq!(
            rows,
            vec![
                QueryRow { key: Some(key![2017]), value: 22 },
                QueryRow { key: Some(key![2018]), value: 6 },
            ]
        );

        let years = index.query(&QueryOpts::new().group_level(1))?;
        let values: Vec<i64> = years.iter().map(|row| row.value).collect();
        assert_eq!(values, vec![31, 20, 17]);

        let months = index.query(&QueryOpts::new().group_level(2))?;
        assert_eq!(months.len(), 9);
        assert_eq!(months[4], QueryRow { key: Some(key![2018, 4]), value: 7 });
    }
    Ok(())
}

#[test]
fn ungrouped_rows_are_raw() -> Result<()> {
    for options in layouts() {
        let index = sales_index(options)?;
        let (rows, trace) = index.query_traced(
            &QueryOpts::new()
                .start(key![2018, 5, 1])
                .end(key![2019, 4, 1])
                .ungrouped(),
        )?;
        assert_eq!(trace.path, QueryPath::Ungrouped);
        assert_eq!(
            rows,
            vec![
                QueryRow { key: Some(key![2018, 5, 1]), value: 7 },
                QueryRow { key: Some(key![2019, 3, 1]), value: 4 },
                QueryRow { key: Some(key![2019, 4, 1]), value: 6 },
            ]
        );
    }
    Ok(())
}

#[test]
fn start_beyond_data_is_empty() -> Result<()> {
    let index = sales_index(IndexOptions::new().max_level(4).fanout_exponent(1))?;
    let (rows, trace) = index.query_traced(&QueryOpts::new().start(key![2020]))?;
    assert!(rows.is_empty());
    assert_eq!(trace.path, QueryPath::Empty);
    assert!(index.query(&QueryOpts::new().end(key![2016]).group_level(1))?.is_empty());
    assert!(index
        .query(&QueryOpts::new().start(key![2017, 6]).end(key![2017, 12]))?
        .is_empty());
    Ok(())
}

#[test]
fn inverted_bounds_are_a_range_error() -> Result<()> {
    let index = sales_index(IndexOptions::new())?;
    let err = index
        .query(&QueryOpts::new().start(key![2019]).end(key![2018]))
        .unwrap_err();
    assert!(matches!(err, AggError::Range(_)));
    Ok(())
}

#[test]
fn duplicate_keys_merge_at_level_zero() -> Result<()> {
    let index = sales_index(IndexOptions::new().max_level(4).fanout_exponent(1))?;
    let level0 = index.level_entries(0)?;
    let merged = level0
        .iter()
        .find(|(k, _)| *k == IndexKey::Tuple(key![2018, 4, 1]))
        .map(|(_, v)| *v);
    assert_eq!(merged, Some(7));
    assert_eq!(index.level_keys(0)?.len(), 10);
    assert_eq!(level0[0], (IndexKey::Min, 0));
    Ok(())
}

#[test]
fn upper_levels_serve_wide_ranges() -> Result<()> {
    let index = AggIndex::open(
        MemStore::new(),
        Sum::<i64>::new(),
        IndexOptions::new().max_level(4).fanout_exponent(2),
    )?;
    let keys: Vec<(Key, i64)> = (0..400).map(|n| (key![n / 100, n % 100], n)).collect();
    index.insert_many(keys.iter().map(|(k, v)| (k, *v)))?;
    index.check_invariants()?;

    let (rows, trace) = index.query_traced(&QueryOpts::new().start(key![0, 5]).end(key![3, 90]))?;
    let expected: i64 = (5..=390).sum();
    assert_eq!(rows, total(expected));
    assert_eq!(trace.path, QueryPath::Traversal);
    assert!(trace.upper_level_scans() > 0);
    let scanned: usize = trace.scans.iter().map(|s| s.rows).sum();
    assert!(scanned < 386, "scanned {scanned} entries");

    let (rows, _) = index.query_traced(&QueryOpts::new().group_level(1))?;
    let per_group: Vec<i64> = (0..4).map(|g| (g * 100..g * 100 + 100).sum()).collect();
    assert_eq!(rows.iter().map(|r| r.value).collect::<Vec<_>>(), per_group);
    Ok(())
}

#[test]
fn clear_restores_empty_index() -> Result<()> {
    let index = sales_index(IndexOptions::new().max_level(3).fanout_exponent(1))?;
    index.clear()?;
    assert_eq!(index.query(&QueryOpts::new())?, total(0));
    assert!(index.query(&QueryOpts::new().group_level(1))?.is_empty());
    for level in 0..=3 {
        assert_eq!(index.level_entries(level)?, vec![(IndexKey::Min, 0)]);
    }
    index.insert(&key![2020, 1, 1], 5)?;
    assert_eq!(index.query(&QueryOpts::new())?, total(5));
    index.check_invariants()?;
    Ok(())
}

#[test]
fn indexes_share_a_store_by_prefix() -> Result<()> {
    let store = MemStore::new();
    let a = AggIndex::open(store.clone(), Sum::<i64>::new(), IndexOptions::new().prefix("a"))?;
    let ab = AggIndex::open(store, Sum::<i64>::new(), IndexOptions::new().prefix("ab"))?;
    a.insert(&key![1], 10)?;
    ab.insert(&key![1], 32)?;
    a.clear()?;
    assert_eq!(a.query(&QueryOpts::new())?, total(0));
    assert_eq!(ab.query(&QueryOpts::new())?, total(32));
    Ok(())
}

#[test]
fn text_with_embedded_nul_groups_separately() -> Result<()> {
    for options in layouts() {
        let index = AggIndex::open(MemStore::new(), Sum::<i64>::new(), options)?;
        index.insert(&key!["a"], 1)?;
        index.insert(&key!["a\u{0}b"], 2)?;
        index.insert(&key!["a", 7], 4)?;
        index.insert(&key!["a\u{0}", 1], 8)?;
        index.check_invariants()?;

        assert_eq!(
            index.query(&QueryOpts::new().group_level(1))?,
            vec![
                QueryRow { key: Some(key!["a"]), value: 5 },
                QueryRow { key: Some(key!["a\u{0}"]), value: 8 },
                QueryRow { key: Some(key!["a\u{0}b"]), value: 2 },
            ]
        );
        assert_eq!(index.query(&QueryOpts::new().group_level(0))?, total(15));
    }
    Ok(())
}

#[test]
fn traversal_step_bound_is_an_invariant_error() -> Result<()> {
    for options in layouts() {
        let index = sales_index(options.max_traversal_steps(1))?;
        let err = index
            .query(&QueryOpts::new().group_level(1))
            .unwrap_err();
        assert!(matches!(err, AggError::Invariant(_)), "{err}");
    }
    Ok(())
}
