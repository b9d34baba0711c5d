//! The main insert and range-delete operations.

use std::sync::Arc;

use arrayvec::ArrayVec;
use log::trace;

use super::rebalance::concat_subtrees;
use super::{Node, NodeRef, HALF, LIMIT};
use crate::drops::DropQueue;

impl<T: Clone> Node<T> {
    /// Recursively descend to index `i` and insert `item` just there.
    /// Returns an overflow sibling when a node on the path split; the
    /// caller wraps a root-level overflow under a new root.
    ///
    /// Precondition: `0 <= i <= total()`.
    pub(crate) fn ins1(&mut self, i: usize, item: T) -> Option<NodeRef<T>> {
        if let Node::Leaf(elems) = self {
            // The common case: the leaf has room.
            if elems.len() < LIMIT {
                elems.insert(i, item);
                return None;
            }
            trace!("splitting full leaf");
            let mut right: ArrayVec<T, LIMIT> = elems.drain(HALF..).collect();
            if i < HALF {
                elems.insert(i, item);
            } else {
                right.insert(i - HALF, item);
            }
            return Some(Arc::new(Node::Leaf(right)));
        }
        let (k, overflow) = {
            let inner = self.inner_mut();
            let (k, before) = inner.locate(i);
            inner.n += 1;
            (k, inner.prepare_child(k).ins1(i - before, item))
        };
        match overflow {
            None => None,
            Some(ov) => self.insert_node_here(k + 1, ov),
        }
    }

    /// Delete the range `[i, j)` from this subtree. Returns the number of
    /// levels the subtree lost compared to when the call was entered (its
    /// height deficit), which the caller uses to reinsert it; as a special
    /// exception the deficit is 0 when the subtree was emptied entirely.
    pub(crate) fn delslice(&mut self, i: usize, j: usize, dq: &mut DropQueue<T>) -> usize {
        let j = j.min(self.total());
        if i >= j {
            return 0;
        }
        if let Node::Leaf(elems) = self {
            for x in elems.drain(i..j) {
                dq.defer(x);
            }
            return 0;
        }
        if i == 0 && j >= self.total() {
            self.clear_into(dq);
            return 0;
        }

        let (k, before) = self.inner().locate(i);
        let (k2, before2) = self.inner().locate(j - 1);

        if k == k2 {
            // The whole range lies under one child: recurse, then repair a
            // short subtree and/or an underflow.
            debug_assert_eq!(before, before2);
            let deficit = {
                let inner = self.inner_mut();
                inner.prepare_child(k).delslice(i - before, j - before, dq)
            };
            if self.inner().children[k].total() == 0 {
                {
                    let inner = self.inner_mut();
                    dq.defer_node(inner.children.remove(k));
                }
                return self.collapse();
            }
            if deficit == 0 {
                return self.underflow(k);
            }
            return self.reinsert_subtree(k, deficit);
        }

        // The range spans several children: a left child losing a suffix,
        // fully covered children in between, and a right child losing a
        // prefix.
        let (deficit_left, deficit_right) = {
            let inner = self.inner_mut();
            let dl = inner.prepare_child(k).delslice(i - before, j - before, dq);
            let low = i.saturating_sub(before2);
            let dr = inner.prepare_child(k2).delslice(low, j - before2, dq);
            (dl, dr)
        };
        {
            let inner = self.inner_mut();
            for dead in inner.children.drain(k + 1..k2) {
                dq.defer_node(dead);
            }
        }
        let k2 = k + 1;

        let mut deleted_k = false;
        let mut deleted_k2 = false;
        {
            let inner = self.inner_mut();
            if inner.children[k2].total() == 0 {
                dq.defer_node(inner.children.remove(k2));
                deleted_k2 = true;
            }
            if inner.children[k].total() == 0 {
                dq.defer_node(inner.children.remove(k));
                deleted_k = true;
            }
        }
        if deleted_k && deleted_k2 {
            return self.collapse();
        }

        // Fix collapsed subtrees first, then worry about underflows.
        let (k, deficit) = if !deleted_k && !deleted_k2 && deficit_left > 0 && deficit_right > 0 {
            // Both sides survive but both collapsed: join them in place.
            let inner = self.inner_mut();
            let right = inner.children.remove(k + 1);
            let left = inner.children.remove(k);
            let (joined, deficit) = concat_subtrees(
                Arc::unwrap_or_clone(left),
                deficit_left,
                Arc::unwrap_or_clone(right),
                deficit_right,
            );
            inner.children.insert(k, Arc::new(joined));
            (k, deficit)
        } else if deleted_k {
            // Slot k now holds the old right child.
            (k, deficit_right)
        } else if !deleted_k2 && deficit_left == 0 {
            (k + 1, deficit_right)
        } else {
            (k, deficit_left)
        };

        if deficit == 0 || self.inner().children.len() == 1 {
            return deficit + self.underflow(k);
        }
        self.reinsert_subtree(k, deficit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn build(n: usize) -> Node<usize> {
        let mut root: Node<usize> = Node::new_leaf();
        for i in 0..n {
            let overflow = root.ins1(i, i);
            root.wrap_overflow(overflow);
        }
        root
    }

    #[test]
    fn ins1_grows_through_splits() {
        let root = build(LIMIT * 3);
        assert_eq!(root.total(), LIMIT * 3);
        root.check_invariants(true);
    }

    #[test]
    fn ins1_in_the_middle() {
        let mut root = build(LIMIT * 2);
        let overflow = root.ins1(LIMIT, 999_999);
        root.wrap_overflow(overflow);
        root.check_invariants(true);
        assert_eq!(root.total(), LIMIT * 2 + 1);
    }

    #[test]
    fn delslice_within_one_leaf() {
        let mut root = build(LIMIT);
        let mut dq = DropQueue::new();
        let deficit = root.delslice(10, 20, &mut dq);
        assert_eq!(deficit, 0);
        assert_eq!(root.total(), LIMIT - 10);
        root.check_invariants(true);
    }

    #[test]
    fn delslice_spanning_children() {
        let mut root = build(LIMIT * 4);
        let mut dq = DropQueue::new();
        root.delslice(LIMIT / 2, LIMIT * 3, &mut dq);
        assert_eq!(root.total(), LIMIT * 4 - (LIMIT * 3 - LIMIT / 2));
        root.check_invariants(true);
    }

    #[test]
    fn delslice_everything_leaves_empty_leaf() {
        let mut root = build(LIMIT * 2);
        let mut dq = DropQueue::new();
        root.delslice(0, LIMIT * 2, &mut dq);
        assert_eq!(root.total(), 0);
        assert!(root.is_leaf());
    }

    #[test]
    fn delslice_collapses_height() {
        // Deleting most of a three-level tree must hand back a valid
        // shorter tree.
        let mut root = build(LIMIT * LIMIT + LIMIT);
        let mut dq = DropQueue::new();
        root.delslice(1, LIMIT * LIMIT + LIMIT, &mut dq);
        assert_eq!(root.total(), 1);
        root.check_invariants(true);
    }

    #[test]
    fn deleted_elements_are_deferred() {
        let mut root = build(LIMIT);
        let mut dq = DropQueue::new();
        root.delslice(0, 5, &mut dq);
        let mut got = Vec::new();
        while let Some(x) = dq.take_elem() {
            got.push(x);
        }
        got.sort_unstable();
        assert_eq!(got, vec![0, 1, 2, 3, 4]);
    }

    proptest! {
        #[test]
        fn delslice_matches_a_vec(len in 0usize..2_000,
                                  a in any::<usize>(),
                                  b in any::<usize>()) {
            let mut root = build(len);
            let a = a % (len + 1);
            let b = b % (len + 1);
            let (a, b) = if a <= b { (a, b) } else { (b, a) };
            let mut dq = DropQueue::new();
            root.delslice(a, b, &mut dq);
            root.check_invariants(true);

            let mut expect: Vec<usize> = (0..len).collect();
            expect.drain(a..b);
            prop_assert_eq!(root.total(), expect.len());
            let got: Vec<usize> = super::super::iter::Iter::new(&root, 0, root.total())
                .copied()
                .collect();
            prop_assert_eq!(got, expect);
        }
    }
}
