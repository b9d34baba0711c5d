use std::cmp::Ordering;

use blist::BList;
use proptest::prelude::*;
use rand::seq::SliceRandom;
use rand::SeedableRng;

#[test]
fn small_sort() {
    let mut list: BList<i32> = vec![3, 1, 4, 1, 5, 9, 2, 6, 5, 3, 5].into();
    list.sort();
    assert_eq!(list, vec![1, 1, 2, 3, 3, 4, 5, 5, 5, 6, 9]);
}

#[test]
fn reverse_sort_is_stable() {
    // All keys equal: a stable descending sort must keep input order.
    let mut list: BList<(i32, usize)> = (0..10).map(|i| (7, i)).collect::<BList<_>>();
    list.sort_reverse_by(|a, b| a.0.cmp(&b.0));
    let order: Vec<usize> = list.iter().map(|p| p.1).collect();
    assert_eq!(order, (0..10).collect::<Vec<_>>());

    let mut desc: BList<i32> = vec![5, 4, 3, 2, 1].into();
    desc.sort_reverse();
    assert_eq!(desc, vec![5, 4, 3, 2, 1]);
}

#[test]
fn sort_a_large_shuffled_list() {
    let mut values: Vec<u32> = (0..50_000).collect();
    let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed);
    values.shuffle(&mut rng);

    let mut list: BList<u32> = values.iter().cloned().collect();
    list.sort();
    list.check_invariants();
    let got: Vec<u32> = list.iter().cloned().collect();
    assert_eq!(got, (0..50_000).collect::<Vec<_>>());
}

#[test]
fn sort_by_key_and_comparator_agree() {
    let words = ["pear", "fig", "banana", "kiwi", "apple"];
    let mut by_key: BList<&str> = words.iter().cloned().collect();
    by_key.sort_by_key(|w| w.len());
    let mut by_cmp: BList<&str> = words.iter().cloned().collect();
    by_cmp.sort_by(|a, b| a.len().cmp(&b.len()));
    assert_eq!(by_key, by_cmp);
    // Equal lengths keep input order.
    let got: Vec<&str> = by_key.iter().cloned().collect();
    assert_eq!(got, vec!["fig", "pear", "kiwi", "apple", "banana"]);
}

#[test]
fn failing_comparator_preserves_the_multiset() {
    let mut values: Vec<u32> = (0..5_000).collect();
    let mut rng = rand::rngs::StdRng::seed_from_u64(42);
    values.shuffle(&mut rng);

    let mut list: BList<u32> = values.iter().cloned().collect();
    let mut calls = 0usize;
    let result = list.try_sort_by(|a, b| {
        calls += 1;
        if calls == 10_000 {
            Err("comparator gave up")
        } else {
            Ok(a.cmp(b))
        }
    });
    assert_eq!(result, Err("comparator gave up"));
    list.check_invariants();

    let mut got: Vec<u32> = list.iter().cloned().collect();
    got.sort_unstable();
    assert_eq!(got, (0..5_000).collect::<Vec<_>>());
}

#[test]
fn try_sort_succeeds_without_errors() {
    let mut list: BList<i64> = vec![5, -1, 3].into();
    let result: Result<(), &str> = list.try_sort_by(|a, b| Ok(a.cmp(b)));
    assert_eq!(result, Ok(()));
    assert_eq!(list, vec![-1, 3, 5]);
}

proptest! {
    #[test]
    fn sorts_like_the_standard_sort(values in prop::collection::vec(any::<i16>(), 0..2_000)) {
        let mut list: BList<i16> = values.iter().cloned().collect();
        list.sort();
        list.check_invariants();
        let mut expect = values;
        expect.sort();
        let got: Vec<i16> = list.iter().cloned().collect();
        prop_assert_eq!(got, expect);
    }

    #[test]
    fn sorting_is_stable(keys in prop::collection::vec(0u8..8, 0..1_500)) {
        // Tag every element with its input position; equal keys must keep
        // their tags in ascending order.
        let mut list: BList<(u8, usize)> =
            keys.iter().cloned().zip(0..).map(|(k, i)| (k, i)).collect();
        list.sort_by(|a, b| a.0.cmp(&b.0));
        list.check_invariants();
        let got: Vec<(u8, usize)> = list.iter().cloned().collect();
        let mut expect: Vec<(u8, usize)> =
            keys.iter().cloned().zip(0..).map(|(k, i)| (k, i)).collect();
        expect.sort_by(|a, b| a.0.cmp(&b.0));
        prop_assert_eq!(got, expect);
    }

    #[test]
    fn reverse_sort_matches_inverted_comparator(values in prop::collection::vec(any::<i16>(), 0..800)) {
        let mut reversed: BList<i16> = values.iter().cloned().collect();
        reversed.sort_reverse();
        reversed.check_invariants();
        let mut expect = values;
        expect.sort_by(|a, b| match a.cmp(b) {
            Ordering::Less => Ordering::Greater,
            Ordering::Equal => Ordering::Equal,
            Ordering::Greater => Ordering::Less,
        });
        let got: Vec<i16> = reversed.iter().cloned().collect();
        prop_assert_eq!(got, expect);
    }
}
