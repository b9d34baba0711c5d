//! Bottom-up bulk construction.
//!
//! A forest is a stack of complete trees; the number of leaves appended so
//! far encodes which trees must be grouped under a common parent, so
//! feeding leaves left to right builds a left-complete tree without any
//! recursive inserts. It doubles as a leaf stream when merging sorted
//! trees: pushed trees are exploded back into leaves on demand.

use std::sync::Arc;

use arrayvec::ArrayVec;
use log::trace;

use super::rebalance::{concat_roots, concat_unknown};
use super::{Inner, Node, NodeRef, HALF, LIMIT};

pub(crate) struct Forest<T> {
    num_leaves: usize,
    trees: Vec<NodeRef<T>>,
}

impl<T: Clone> Forest<T> {
    pub(crate) fn new() -> Self {
        Forest {
            num_leaves: 0,
            trees: Vec::with_capacity(LIMIT),
        }
    }

    /// A forest used purely as a leaf stream over an existing tree.
    pub(crate) fn stream(tree: Node<T>) -> Self {
        let mut forest = Forest::new();
        forest.trees.push(Arc::new(tree));
        forest
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    /// Pop the next tree off the stack (used to drain a stream after a
    /// merge stops early).
    pub(crate) fn pop_tree(&mut self) -> Option<NodeRef<T>> {
        self.trees.pop()
    }

    /// Pop trees until a leaf surfaces, exploding interior nodes onto the
    /// stack, and return its elements. Must not be called on an empty
    /// forest.
    pub(crate) fn next_leaf(&mut self) -> Vec<T> {
        let mut node = match self.trees.pop() {
            Some(t) => t,
            None => unreachable!("next_leaf on an exhausted forest"),
        };
        loop {
            match Arc::unwrap_or_clone(node) {
                Node::Leaf(elems) => return elems.into_iter().collect(),
                Node::Inner(inner) => {
                    for child in inner.children.into_iter().rev() {
                        self.trees.push(child);
                    }
                    node = match self.trees.pop() {
                        Some(t) => t,
                        None => unreachable!("interior node without children"),
                    };
                }
            }
        }
    }

    /// Push a leaf. Whenever the leaf count reaches a multiple of
    /// `LIMIT^k`, the top `LIMIT` trees are grouped under a fresh parent
    /// of height `k + 1`.
    pub(crate) fn append_leaf(&mut self, elems: ArrayVec<T, LIMIT>) {
        if elems.is_empty() {
            return;
        }
        self.trees.push(Arc::new(Node::Leaf(elems)));
        self.num_leaves += 1;

        let mut power = LIMIT;
        while self.num_leaves % power == 0 {
            let at = self.trees.len() - LIMIT;
            let children: ArrayVec<NodeRef<T>, LIMIT> = self.trees.drain(at..).collect();
            let n = children.iter().map(|c| c.total()).sum();
            let mut parent = Node::Inner(Inner { n, children });
            let collapsed = parent.underflow(LIMIT - 1);
            debug_assert_eq!(collapsed, 0);
            self.trees.push(Arc::new(parent));
            power = match power.checked_mul(LIMIT) {
                Some(p) => p,
                None => break,
            };
        }
    }

    /// As [`append_leaf`](Self::append_leaf), but first rebalances with the
    /// previous top leaf when that one was left underfull.
    pub(crate) fn append_leaf_safe(&mut self, mut elems: ArrayVec<T, LIMIT>) {
        if let Some(top) = self.trees.last_mut() {
            if top.is_leaf() && top.width() < HALF {
                let prev = Arc::make_mut(top).leaf_mut();
                if prev.len() + elems.len() <= LIMIT {
                    prev.extend(elems.drain(..));
                } else {
                    let needed = HALF - prev.len();
                    prev.extend(elems.drain(..needed));
                }
            }
        }
        self.append_leaf(elems);
    }

    /// Consume the remaining partial groups, shortest first, concatenating
    /// them onto a running output root. Returns a tree with all invariants
    /// restored.
    pub(crate) fn finish(mut self) -> Node<T> {
        let mut out: Option<(Node<T>, usize)> = None;
        let mut group_height = 1;
        let mut num_leaves = self.num_leaves;

        while !self.trees.is_empty() {
            let group_size = num_leaves % LIMIT;
            num_leaves /= LIMIT;
            group_height += 1;
            if group_size == 0 {
                continue;
            }

            let at = self.trees.len() - group_size;
            let children: ArrayVec<NodeRef<T>, LIMIT> = self.trees.drain(at..).collect();
            let n = children.iter().map(|c| c.total()).sum();
            let mut group = Node::Inner(Inner { n, children });
            let adj = group.underflow(group_size - 1);

            out = Some(match out {
                None => (group, group_height - adj),
                Some((tree, height)) => {
                    concat_roots(group, group_height - adj, tree, height)
                }
            });
        }

        trace!("forest assembled into a tree of {} elements", {
            match &out {
                Some((tree, _)) => tree.total(),
                None => 0,
            }
        });
        match out {
            Some((tree, _)) => tree,
            None => Node::new_leaf(),
        }
    }
}

/// Drain a stream forest in order onto an output tree without comparing
/// elements (used when a merge aborts).
pub(crate) fn drain_onto<T: Clone>(mut out: Node<T>, forest: &mut Forest<T>) -> Node<T> {
    while let Some(tree) = forest.pop_tree() {
        out = concat_unknown(out, Arc::unwrap_or_clone(tree));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn full_leaf(start: usize) -> ArrayVec<usize, LIMIT> {
        (start..start + LIMIT).collect()
    }

    #[test]
    fn single_partial_leaf() {
        let mut forest = Forest::new();
        forest.append_leaf((0..10).collect());
        let tree = forest.finish();
        assert_eq!(tree.total(), 10);
        assert!(tree.is_leaf());
    }

    #[test]
    fn grouping_at_limit_boundary() {
        let mut forest = Forest::new();
        for k in 0..LIMIT {
            forest.append_leaf(full_leaf(k * LIMIT));
        }
        // Exactly LIMIT leaves were grouped under one parent.
        assert_eq!(forest.trees.len(), 1);
        let tree = forest.finish();
        assert_eq!(tree.total(), LIMIT * LIMIT);
        tree.check_invariants(true);
    }

    #[test]
    fn finish_joins_partial_groups() {
        let mut forest = Forest::new();
        for k in 0..LIMIT + 3 {
            forest.append_leaf(full_leaf(k * LIMIT));
        }
        let tree = forest.finish();
        assert_eq!(tree.total(), (LIMIT + 3) * LIMIT);
        tree.check_invariants(true);
        // Order is preserved across the group boundary.
        assert_eq!(tree.inner().n, (LIMIT + 3) * LIMIT);
    }

    #[test]
    fn append_leaf_safe_rebalances_short_top() {
        let mut forest = Forest::new();
        forest.append_leaf((0..10).collect());
        forest.append_leaf_safe((10..20).collect());
        let tree = forest.finish();
        assert_eq!(tree.total(), 20);
        assert!(tree.is_leaf());
    }

    proptest! {
        /// Feeding leaves of arbitrary (even underfull) sizes through
        /// `append_leaf_safe` yields the same sequence as the inputs, as a
        /// structurally valid tree.
        #[test]
        fn arbitrary_leaf_sizes_round_trip(
            chunks in prop::collection::vec(1usize..=LIMIT, 0..40),
        ) {
            let mut forest = Forest::new();
            let mut expect = Vec::new();
            let mut next = 0usize;
            for chunk in chunks {
                let leaf: ArrayVec<usize, LIMIT> = (next..next + chunk).collect();
                expect.extend(next..next + chunk);
                next += chunk;
                forest.append_leaf_safe(leaf);
            }
            let tree = forest.finish();
            prop_assert_eq!(tree.total(), expect.len());
            tree.check_invariants(true);
            let got: Vec<usize> = super::super::iter::Iter::new(&tree, 0, tree.total())
                .copied()
                .collect();
            prop_assert_eq!(got, expect);
        }
    }

    #[test]
    fn next_leaf_streams_in_order() {
        let mut forest = Forest::new();
        for k in 0..3 {
            forest.append_leaf(full_leaf(k * LIMIT));
        }
        let tree = forest.finish();
        let mut stream = Forest::stream(tree);
        let mut seen = Vec::new();
        while !stream.is_empty() {
            seen.extend(stream.next_leaf());
        }
        assert_eq!(seen, (0..3 * LIMIT).collect::<Vec<_>>());
    }
}
