#![allow(missing_docs)]

use std::io::Write;

use levelagg::{
    key, AggError, AggIndex, IndexOptions, Max, MemStore, Min, QueryOpts, QueryRow, Result,
    RetryPolicy, Sum,
};
use tempfile::NamedTempFile;

#[test]
fn options_load_from_toml_file() -> Result<()> {
    let mut file = NamedTempFile::new()?;
    writeln!(
        file,
        r#"
max_level = 3
fanout_exponent = 2
prefix = "sales"
key_arity = 3

[retry]
max_attempts = 4
"#
    )?;
    let options = IndexOptions::from_path(file.path())?;
    assert_eq!(options.max_level, 3);
    assert_eq!(options.key_arity, Some(3));
    assert_eq!(
        options.retry,
        RetryPolicy {
            max_attempts: 4,
            ..RetryPolicy::default()
        }
    );

    let index = AggIndex::open(MemStore::new(), Sum::<i64>::new(), options)?;
    index.insert(&key![2017, 3, 1], 9)?;
    assert_eq!(index.options().prefix, "sales");
    Ok(())
}

#[test]
fn invalid_layouts_are_rejected_at_open() {
    for options in [
        IndexOptions::new().max_level(0),
        IndexOptions::new().fanout_exponent(0),
        IndexOptions::new().max_level(20).fanout_exponent(4),
        IndexOptions::new().max_traversal_steps(0),
    ] {
        let err = AggIndex::open(MemStore::new(), Sum::<i64>::new(), options)
            .err()
            .expect("open should fail");
        assert!(matches!(err, AggError::Config(_)), "{err}");
    }
    assert!(matches!(
        IndexOptions::from_toml_str("max_level = \"six\""),
        Err(AggError::ConfigParse(_))
    ));
}

#[test]
fn arity_is_enforced_when_fixed() -> Result<()> {
    let index = AggIndex::open(
        MemStore::new(),
        Sum::<i64>::new(),
        IndexOptions::new().key_arity(3),
    )?;
    assert!(matches!(index.insert(&key![2017, 3], 1), Err(AggError::Config(_))));
    assert!(matches!(
        index.query(&QueryOpts::new().group_level(4)),
        Err(AggError::Config(_))
    ));
    assert!(matches!(index.level_entries(7), Err(AggError::Config(_))));

    index.insert(&key![2017, 3, 1], 1)?;
    let rows = index.query(&QueryOpts::new().group_level(3))?;
    assert_eq!(rows, vec![QueryRow { key: Some(key![2017, 3, 1]), value: 1 }]);
    Ok(())
}

#[test]
fn group_level_beyond_arity_uses_full_key() -> Result<()> {
    let index = AggIndex::open(MemStore::new(), Sum::<i64>::new(), IndexOptions::new())?;
    index.insert(&key![1, 2], 5)?;
    index.insert(&key![1, 2, 3], 6)?;
    let rows = index.query(&QueryOpts::new().group_level(5))?;
    assert_eq!(
        rows,
        vec![
            QueryRow { key: Some(key![1, 2]), value: 5 },
            QueryRow { key: Some(key![1, 2, 3]), value: 6 },
        ]
    );
    Ok(())
}

#[test]
fn reopening_keeps_data() -> Result<()> {
    let store = MemStore::new();
    let options = IndexOptions::new().max_level(3).fanout_exponent(1);
    let first = AggIndex::open(store.clone(), Sum::<i64>::new(), options.clone())?;
    first.insert(&key!["north", 1], 4)?;
    first.insert(&key!["south", 1], 6)?;
    drop(first);

    let again = AggIndex::open(store, Sum::<i64>::new(), options)?;
    again.check_invariants()?;
    assert_eq!(
        again.query(&QueryOpts::new().group_level(1))?,
        vec![
            QueryRow { key: Some(key!["north"]), value: 4 },
            QueryRow { key: Some(key!["south"]), value: 6 },
        ]
    );
    Ok(())
}

#[test]
fn min_and_max_reducers() -> Result<()> {
    let options = IndexOptions::new().max_level(4).fanout_exponent(1);
    let low = AggIndex::open(MemStore::new(), Min::<i64>::new(), options.clone())?;
    let high = AggIndex::open(MemStore::new(), Max::<f64>::new(), options)?;
    for n in 0..40i64 {
        low.insert(&key![n % 4, n], 100 - n)?;
        high.insert(&key![n % 4, n], n as f64 / 2.0)?;
    }
    low.check_invariants()?;
    high.check_invariants()?;

    assert_eq!(low.query(&QueryOpts::new())?[0].value, 61);
    let groups = low.query(&QueryOpts::new().group_level(1))?;
    assert_eq!(
        groups.iter().map(|r| r.value).collect::<Vec<_>>(),
        vec![64, 63, 62, 61]
    );
    let top = high.query(&QueryOpts::new().start(key![1]).end(key![2, 99]))?;
    assert_eq!(top, vec![QueryRow { key: None, value: 19.0 }]);
    Ok(())
}
