//! Stable merge sort.
//!
//! Leaves are sorted in place by detecting natural runs (reversing
//! descending ones, binary-inserting stragglers into short runs) and then
//! merging runs pairwise. Interior nodes sort each child subtree
//! recursively and merge sibling subtrees leaf by leaf through the forest,
//! so two sorted trees combine without ever being materialized flat.
//!
//! A failing comparator aborts the sort, but every element is still
//! present exactly once when the call returns: merges push their
//! unconsumed remainders through unsorted, and sibling trees left over
//! after an abort are concatenated without further comparisons.

use std::cmp::Ordering;
use std::sync::Arc;

use arrayvec::ArrayVec;
use log::debug;

use super::forest::{drain_onto, Forest};
use super::rebalance::concat_unknown;
use super::{Node, LIMIT};

/// Minimum natural run length worth keeping; shorter runs absorb the next
/// element by binary insertion instead.
const RUN_THRESH: usize = 5;

pub(crate) struct Compare<'c, T, E> {
    pub(crate) cmp: &'c mut dyn FnMut(&T, &T) -> Result<Ordering, E>,
}

impl<T, E> Compare<'_, T, E> {
    /// "x sorts strictly before y".
    fn lt(&mut self, x: &T, y: &T) -> Result<bool, E> {
        Ok((self.cmp)(x, y)? == Ordering::Less)
    }
}

/// Detect runs in `items`, reversing strictly descending ones so every run
/// ends up ascending, and return the run start offsets. On error the slice
/// is left valid (permuted only).
fn detect_runs<T, E>(items: &mut [T], cmp: &mut Compare<'_, T, E>) -> Result<Vec<usize>, E> {
    let n = items.len();
    let mut starts = Vec::new();
    let mut run_start = 0;
    let mut run_length = 1;
    let mut run_descending = false;

    for i in 1..n {
        let c = cmp.lt(&items[i], &items[i - 1])?;
        if run_length == 1 {
            run_descending = c;
        }
        if c == run_descending {
            run_length += 1;
        } else if run_length >= RUN_THRESH {
            if run_descending {
                items[run_start..i].reverse();
            }
            starts.push(run_start);
            run_start = i;
            run_length = 1;
        } else {
            // Binary-insert the straggler into the short run.
            let mut low = run_start;
            let mut high = i - 1;
            while low < high {
                let mid = low + (high - low) / 2;
                if cmp.lt(&items[i], &items[mid])? == run_descending {
                    low = mid + 1;
                } else {
                    high = mid;
                }
            }
            items[low..=i].rotate_right(1);
            run_length += 1;
        }
    }
    if run_descending {
        items[run_start..n].reverse();
    }
    starts.push(run_start);
    Ok(starts)
}

/// Merge two ascending runs. If the comparator fails, the error is stored
/// and the output is the merged prefix followed by both unconsumed
/// remainders, so no element is lost.
fn merge_run<T, E>(a: Vec<T>, b: Vec<T>, cmp: &mut Compare<'_, T, E>, err: &mut Option<E>) -> Vec<T> {
    if err.is_some() {
        let mut a = a;
        a.extend(b);
        return a;
    }
    let mut out = Vec::with_capacity(a.len() + b.len());
    let mut ia = a.into_iter();
    let mut ib = b.into_iter();
    loop {
        let take_b = match (ia.as_slice().first(), ib.as_slice().first()) {
            (Some(x), Some(y)) => match cmp.lt(y, x) {
                Ok(c) => c,
                Err(e) => {
                    *err = Some(e);
                    break;
                }
            },
            _ => break,
        };
        let moved = if take_b { ib.next() } else { ia.next() };
        if let Some(v) = moved {
            out.push(v);
        }
    }
    out.extend(ia);
    out.extend(ib);
    out
}

/// Sort the elements of one leaf. Always returns all elements; the error,
/// if any, is reported alongside.
pub(crate) fn sort_leaf<T, E>(items: Vec<T>, cmp: &mut Compare<'_, T, E>) -> (Vec<T>, Option<E>) {
    if items.len() < 2 {
        return (items, None);
    }
    let mut items = items;
    let starts = match detect_runs(&mut items, cmp) {
        Ok(starts) => starts,
        Err(e) => return (items, Some(e)),
    };

    // Carve the item vector into per-run vectors, back to front.
    let mut runs: Vec<Vec<T>> = Vec::with_capacity(starts.len());
    for &start in starts.iter().rev() {
        runs.push(items.split_off(start));
    }
    runs.reverse();

    let mut err = None;
    while runs.len() > 1 {
        let mut next = Vec::with_capacity(runs.len() / 2 + 1);
        let mut it = runs.into_iter();
        while let Some(a) = it.next() {
            match it.next() {
                Some(b) => next.push(merge_run(a, b, cmp, &mut err)),
                None => next.push(a),
            }
        }
        runs = next;
    }
    let sorted = match runs.pop() {
        Some(run) => run,
        None => Vec::new(),
    };
    (sorted, err)
}

/// Merge two sorted trees leaf by leaf, building the output bottom-up
/// through a forest. On comparator failure the remainders of both inputs
/// are appended in order without further comparisons.
fn merge_trees<T: Clone, E>(
    a: Node<T>,
    b: Node<T>,
    cmp: &mut Compare<'_, T, E>,
) -> (Node<T>, Option<E>) {
    let mut f1 = Forest::stream(a);
    let mut f2 = Forest::stream(b);
    let mut out = Forest::new();

    let mut it1 = f1.next_leaf().into_iter();
    let mut it2 = f2.next_leaf().into_iter();
    let mut output: ArrayVec<T, LIMIT> = ArrayVec::new();
    let mut err: Option<E> = None;

    loop {
        if it1.as_slice().is_empty() {
            if f1.is_empty() {
                break;
            }
            it1 = f1.next_leaf().into_iter();
        }
        if it2.as_slice().is_empty() {
            if f2.is_empty() {
                break;
            }
            it2 = f2.next_leaf().into_iter();
        }
        if output.len() == LIMIT {
            out.append_leaf(std::mem::take(&mut output));
        }
        let take_b = match (it1.as_slice().first(), it2.as_slice().first()) {
            (Some(x), Some(y)) => match cmp.lt(y, x) {
                Ok(c) => c,
                Err(e) => {
                    err = Some(e);
                    break;
                }
            },
            _ => break,
        };
        let moved = if take_b { it2.next() } else { it1.next() };
        if let Some(v) = moved {
            output.push(v);
        }
    }

    out.append_leaf(std::mem::take(&mut output));

    // Partially consumed input leaves rejoin the output; they may be short.
    let rest1: ArrayVec<T, LIMIT> = it1.collect();
    if !rest1.is_empty() {
        out.append_leaf_safe(rest1);
    }
    let rest2: ArrayVec<T, LIMIT> = it2.collect();
    if !rest2.is_empty() {
        out.append_leaf_safe(rest2);
    }

    let mut ret = out.finish();
    ret = drain_onto(ret, &mut f1);
    ret = drain_onto(ret, &mut f2);
    (ret, err)
}

/// Sort a whole subtree. Children are sorted recursively, then sibling
/// subtrees merge pairwise until one remains. After the first comparator
/// failure remaining work degrades to order-preserving concatenation.
pub(crate) fn sort_tree<T: Clone, E>(
    node: Node<T>,
    cmp: &mut Compare<'_, T, E>,
) -> (Node<T>, Option<E>) {
    match node {
        Node::Leaf(elems) => {
            let (sorted, err) = sort_leaf(elems.into_iter().collect(), cmp);
            let mut out: ArrayVec<T, LIMIT> = ArrayVec::new();
            out.extend(sorted);
            (Node::Leaf(out), err)
        }
        Node::Inner(inner) => {
            debug!("sorting {} elements across {} subtrees", inner.n, inner.children.len());
            let mut err: Option<E> = None;
            let mut trees: Vec<Node<T>> = Vec::with_capacity(inner.children.len());
            for child in inner.children {
                let owned = Arc::unwrap_or_clone(child);
                if err.is_none() {
                    let (sorted, e) = sort_tree(owned, cmp);
                    err = e;
                    trees.push(sorted);
                } else {
                    trees.push(owned);
                }
            }
            while trees.len() > 1 {
                let mut next = Vec::with_capacity(trees.len() / 2 + 1);
                let mut it = trees.into_iter();
                while let Some(a) = it.next() {
                    match it.next() {
                        None => next.push(a),
                        Some(b) => {
                            if err.is_none() {
                                let (merged, e) = merge_trees(a, b, cmp);
                                err = e;
                                next.push(merged);
                            } else {
                                next.push(concat_unknown(a, b));
                            }
                        }
                    }
                }
                trees = next;
            }
            let root = match trees.pop() {
                Some(tree) => tree,
                None => Node::new_leaf(),
            };
            (root, err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::convert::Infallible;

    fn by_ord<T: Ord>() -> impl FnMut(&T, &T) -> Result<Ordering, Infallible> {
        |a: &T, b: &T| Ok(a.cmp(b))
    }

    fn build(values: &[i64]) -> Node<i64> {
        let mut root: Node<i64> = Node::new_leaf();
        for (i, v) in values.iter().enumerate() {
            let overflow = root.ins1(i, *v);
            root.wrap_overflow(overflow);
        }
        root
    }

    #[test]
    fn sort_leaf_random() {
        let mut f = by_ord();
        let mut cmp = Compare { cmp: &mut f };
        let (sorted, err) = sort_leaf(vec![3, 1, 4, 1, 5, 9, 2, 6], &mut cmp);
        assert!(err.is_none());
        assert_eq!(sorted, vec![1, 1, 2, 3, 4, 5, 6, 9]);
    }

    #[test]
    fn sort_leaf_detects_descending_run() {
        let mut f = by_ord();
        let mut cmp = Compare { cmp: &mut f };
        let (sorted, err) = sort_leaf(vec![9, 8, 7, 6, 5, 4, 3, 2, 1, 0], &mut cmp);
        assert!(err.is_none());
        assert_eq!(sorted, (0..10).collect::<Vec<i64>>());
    }

    #[test]
    fn sort_leaf_is_stable() {
        // Sort pairs by the first component only; second components keep
        // their input order among equals.
        let items: Vec<(i64, usize)> = vec![(1, 0), (0, 1), (1, 2), (0, 3), (1, 4), (0, 5)];
        let mut f = |a: &(i64, usize), b: &(i64, usize)| {
            Ok::<_, Infallible>(a.0.cmp(&b.0))
        };
        let mut cmp = Compare { cmp: &mut f };
        let (sorted, err) = sort_leaf(items, &mut cmp);
        assert!(err.is_none());
        assert_eq!(sorted, vec![(0, 1), (0, 3), (0, 5), (1, 0), (1, 2), (1, 4)]);
    }

    #[test]
    fn sort_tree_multilevel() {
        let values: Vec<i64> = (0..(LIMIT as i64 * 3)).rev().collect();
        let root = build(&values);
        let mut f = by_ord();
        let mut cmp = Compare { cmp: &mut f };
        let (sorted, err) = sort_tree(root, &mut cmp);
        assert!(err.is_none());
        sorted.check_invariants(true);
        let got: Vec<i64> = super::super::iter::Iter::new(&sorted, 0, sorted.total())
            .copied()
            .collect();
        assert_eq!(got, (0..LIMIT as i64 * 3).collect::<Vec<_>>());
    }

    proptest! {
        #[test]
        fn leaf_sort_matches_std(values in prop::collection::vec(any::<i32>(), 0..LIMIT)) {
            let mut f = by_ord();
            let mut cmp = Compare { cmp: &mut f };
            let (sorted, err) = sort_leaf(values.clone(), &mut cmp);
            prop_assert!(err.is_none());
            let mut expect = values;
            expect.sort();
            prop_assert_eq!(sorted, expect);
        }
    }

    #[test]
    fn failed_compare_loses_nothing() {
        let values: Vec<i64> = (0..(LIMIT as i64 * 2)).rev().collect();
        let root = build(&values);
        let mut calls = 0usize;
        let mut f = |a: &i64, b: &i64| {
            calls += 1;
            if calls > 40 {
                Err("boom")
            } else {
                Ok(a.cmp(b))
            }
        };
        let mut cmp = Compare { cmp: &mut f };
        let (out, err) = sort_tree(root, &mut cmp);
        assert_eq!(err, Some("boom"));
        let mut got: Vec<i64> = super::super::iter::Iter::new(&out, 0, out.total())
            .copied()
            .collect();
        got.sort_unstable();
        assert_eq!(got, (0..LIMIT as i64 * 2).collect::<Vec<_>>());
    }
}
