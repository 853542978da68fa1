#![allow(missing_docs)]

use std::collections::BTreeMap;

use proptest::prelude::*;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use levelagg::{
    key, AggIndex, IndexOptions, Key, KeyPart, Max, MemStore, QueryOpts, QueryRow, Reducer, Sum,
};

fn small_options() -> IndexOptions {
    IndexOptions::new().max_level(5).fanout_exponent(1)
}

fn arb_key() -> impl Strategy<Value = Key> {
    (0i64..4, 0i64..6, -3i64..20).prop_map(|(a, b, c)| key![a, b, c])
}

fn arb_inserts() -> impl Strategy<Value = Vec<(Key, i64)>> {
    prop::collection::vec((arb_key(), -50i64..50), 0..60)
}

/// Short keys mixing ints and text with embedded NULs, so prefixes of one
/// key are often keys themselves.
fn arb_mixed_key() -> impl Strategy<Value = Key> {
    let part = prop_oneof![
        (-2i64..3).prop_map(KeyPart::Int),
        "[ab\\x00]{0,2}".prop_map(KeyPart::Text),
    ];
    prop::collection::vec(part, 1..4).prop_map(Key::from_parts)
}

fn arb_mixed_inserts() -> impl Strategy<Value = Vec<(Key, i64)>> {
    prop::collection::vec((arb_mixed_key(), -50i64..50), 0..60)
}

fn open<R: Reducer>(reducer: R) -> AggIndex<MemStore, R> {
    AggIndex::open(MemStore::new(), reducer, small_options()).unwrap()
}

fn load(inserts: &[(Key, i64)]) -> AggIndex<MemStore, Sum<i64>> {
    let index = open(Sum::new());
    for (key, value) in inserts {
        index.insert(key, *value).unwrap();
    }
    index
}

/// Groups and sums level-0 rows in memory.
fn brute_force(
    inserts: &[(Key, i64)],
    start: Option<&Key>,
    end: Option<&Key>,
    group_level: usize,
) -> Vec<QueryRow<i64>> {
    let mut groups: BTreeMap<Option<Key>, i64> = BTreeMap::new();
    for (key, value) in inserts {
        if start.is_some_and(|s| key < s) || end.is_some_and(|e| key > e) {
            continue;
        }
        *groups.entry(key.group_prefix(group_level)).or_default() += value;
    }
    groups
        .into_iter()
        .map(|(key, value)| QueryRow { key, value })
        .collect()
}

fn check_against_brute_force(
    inserts: &[(Key, i64)],
    start: Option<Key>,
    end: Option<Key>,
    group_level: usize,
) -> Result<(), TestCaseError> {
    if let (Some(s), Some(e)) = (&start, &end) {
        prop_assume!(s <= e);
    }
    let index = load(inserts);
    let mut opts = QueryOpts::new().group_level(group_level);
    opts.start_key = start.clone();
    opts.end_key = end.clone();
    let rows = index.query(&opts).unwrap();

    let mut expected = brute_force(inserts, start.as_ref(), end.as_ref(), group_level);
    if expected.is_empty() && group_level == 0 && start.is_none() && end.is_none() {
        expected.push(QueryRow { key: None, value: 0 });
    }
    prop_assert_eq!(rows, expected);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn every_level_conserves_the_total(inserts in arb_inserts()) {
        let index = load(&inserts);
        let report = index.verify().unwrap();
        prop_assert!(report.success, "{:?}", report.findings);
        let expected: i64 = inserts.iter().map(|(_, v)| v).sum();
        prop_assert!(report.level_totals.iter().all(|total| *total == expected));
        prop_assert_eq!(
            index.query(&QueryOpts::new()).unwrap(),
            vec![QueryRow { key: None, value: expected }]
        );
    }

    #[test]
    fn duplicate_inserts_merge(key in arb_key(), values in prop::collection::vec(-50i64..50, 1..6)) {
        let index = open(Sum::<i64>::new());
        for value in &values {
            index.insert(&key, *value).unwrap();
        }
        let rows = index
            .query(&QueryOpts::new().start(key.clone()).end(key.clone()).ungrouped())
            .unwrap();
        prop_assert_eq!(rows, vec![QueryRow { key: Some(key), value: values.iter().sum() }]);
        index.check_invariants().unwrap();
    }

    #[test]
    fn insertion_order_does_not_change_levels(inserts in arb_inserts(), seed in any::<u64>()) {
        let mut shuffled = inserts.clone();
        shuffled.shuffle(&mut ChaCha8Rng::seed_from_u64(seed));
        let a = load(&inserts);
        let b = load(&shuffled);
        for level in 0..=5 {
            prop_assert_eq!(a.level_entries(level).unwrap(), b.level_entries(level).unwrap());
        }
    }

    #[test]
    fn queries_match_brute_force(
        inserts in arb_inserts(),
        start in prop::option::of(arb_key()),
        end in prop::option::of(arb_key()),
        group_level in 0usize..4,
    ) {
        check_against_brute_force(&inserts, start, end, group_level)?;
    }

    #[test]
    fn mixed_keys_match_brute_force(
        inserts in arb_mixed_inserts(),
        start in prop::option::of(arb_mixed_key()),
        end in prop::option::of(arb_mixed_key()),
        group_level in 0usize..4,
    ) {
        check_against_brute_force(&inserts, start, end, group_level)?;
        load(&inserts).check_invariants().unwrap();
    }

    #[test]
    fn max_reducer_keeps_coverage(inserts in arb_inserts()) {
        let index = open(Max::<i64>::new());
        for (key, value) in &inserts {
            index.insert(key, *value).unwrap();
        }
        index.check_invariants().unwrap();
        let by_year = index.query(&QueryOpts::new().group_level(1)).unwrap();
        let mut expected: BTreeMap<Key, i64> = BTreeMap::new();
        for (key, value) in &inserts {
            let slot = expected.entry(key.group_prefix(1).unwrap()).or_insert(i64::MIN);
            *slot = (*slot).max(*value);
        }
        let expected: Vec<QueryRow<i64>> = expected
            .into_iter()
            .map(|(key, value)| QueryRow { key: Some(key), value })
            .collect();
        prop_assert_eq!(by_year, expected);
    }
}
