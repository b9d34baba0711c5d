//! Invariant repair after a local mutation: borrowing between siblings,
//! merging, root collapse, overflow splits, and joining trees of unequal
//! height.

use std::sync::Arc;

use arrayvec::ArrayVec;
use log::trace;

use super::{Inner, Node, NodeRef, HALF, LIMIT};

/// Which spine of a subtree an insertion descends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Side {
    Left,
    Right,
}

impl<T: Clone> Inner<T> {
    /// Child `k` is short; move children over from its right sibling until
    /// both are evenly filled.
    fn borrow_right(&mut self, k: usize) {
        let (left, right) = self.prepare_pair(k);
        let total = left.width() + right.width();
        let split = total / 2;
        let migrate = split - left.width();
        debug_assert!(split >= HALF && total - split >= HALF);
        match (left, right) {
            (Node::Leaf(a), Node::Leaf(b)) => {
                a.extend(b.drain(..migrate));
            }
            (Node::Inner(a), Node::Inner(b)) => {
                a.children.extend(b.children.drain(..migrate));
                a.n = a.children.iter().map(|c| c.total()).sum();
                b.n = b.children.iter().map(|c| c.total()).sum();
            }
            _ => unreachable!("sibling nodes share a shape"),
        }
    }

    /// Child `k` is short; move children over from its left sibling.
    fn borrow_left(&mut self, k: usize) {
        let (left, right) = self.prepare_pair(k - 1);
        let total = left.width() + right.width();
        let split = total / 2;
        let migrate = split - right.width();
        debug_assert!(split >= HALF && total - split >= HALF);
        match (left, right) {
            (Node::Leaf(a), Node::Leaf(b)) => {
                let at = a.len() - migrate;
                let moved: ArrayVec<T, LIMIT> = a.drain(at..).collect();
                let tail = std::mem::take(b);
                b.extend(moved);
                b.extend(tail);
            }
            (Node::Inner(a), Node::Inner(b)) => {
                let at = a.children.len() - migrate;
                let moved: ArrayVec<NodeRef<T>, LIMIT> = a.children.drain(at..).collect();
                let tail = std::mem::take(&mut b.children);
                b.children.extend(moved);
                b.children.extend(tail);
                a.n = a.children.iter().map(|c| c.total()).sum();
                b.n = b.children.iter().map(|c| c.total()).sum();
            }
            _ => unreachable!("sibling nodes share a shape"),
        }
    }

    /// Concatenate child `k + 1` onto child `k` and drop its slot.
    fn merge_right(&mut self, k: usize) {
        trace!("merging interior children {} and {}", k, k + 1);
        let right = self.children.remove(k + 1);
        let left = self.prepare_child(k);
        match Arc::try_unwrap(right) {
            Ok(node) => left.absorb(node),
            Err(shared) => left.absorb_ref(&shared),
        }
        left.adjust_total();
    }

    /// Concatenate child `k - 1` onto the front of child `k`; the merged
    /// node ends up in slot `k - 1`.
    fn merge_left(&mut self, k: usize) {
        trace!("merging interior children {} and {}", k - 1, k);
        let left = self.children.remove(k - 1);
        let cur = self.prepare_child(k - 1);
        match Arc::try_unwrap(left) {
            Ok(node) => cur.prepend(node),
            Err(shared) => cur.prepend_ref(&shared),
        }
        cur.adjust_total();
    }

    /// Detach the upper `HALF` children into a fresh sibling payload.
    /// The caller fixes up both cached totals afterwards.
    fn split_upper(&mut self) -> Inner<T> {
        debug_assert_eq!(self.children.len(), LIMIT);
        let children: ArrayVec<NodeRef<T>, LIMIT> = self.children.drain(HALF..).collect();
        let n = children.iter().map(|c| c.total()).sum();
        Inner { n, children }
    }
}

impl<T: Clone> Node<T> {
    /// If this node is an interior node with exactly one child, it becomes
    /// that child. Returns the number of levels removed (0 or 1) and always
    /// leaves the cached total accurate.
    pub(crate) fn collapse(&mut self) -> usize {
        match self {
            Node::Leaf(_) => 0,
            Node::Inner(inner) if inner.children.len() == 1 => {
                let only = match inner.children.pop() {
                    Some(child) => child,
                    None => unreachable!(),
                };
                *self = Arc::unwrap_or_clone(only);
                1
            }
            Node::Inner(inner) => {
                inner.n = inner.children.iter().map(|c| c.total()).sum();
                0
            }
        }
    }

    /// Repair a possibly short child `k`: borrow from a rich sibling when
    /// one has enough to spare, otherwise merge. Afterwards the neighbors
    /// `k - 1` and `k + 1` are checked as well, and the tree is collapsed
    /// if the repairs left a single child. Returns the collapse count.
    pub(crate) fn underflow(&mut self, k: usize) -> usize {
        let mut k = k;
        let mut no_siblings = false;
        match &mut *self {
            Node::Leaf(_) => return 0,
            Node::Inner(inner) => {
                if k < inner.children.len() {
                    let mut short = HALF.saturating_sub(inner.prepare_child(k).width());
                    while short > 0 {
                        if k + 1 < inner.children.len()
                            && inner.children[k + 1].width() >= HALF + short
                        {
                            inner.borrow_right(k);
                        } else if k > 0 && inner.children[k - 1].width() >= HALF + short {
                            inner.borrow_left(k);
                        } else if k + 1 < inner.children.len() {
                            inner.merge_right(k);
                        } else if k > 0 {
                            inner.merge_left(k);
                            k -= 1;
                        } else {
                            no_siblings = true;
                            break;
                        }
                        short = HALF.saturating_sub(inner.prepare_child(k).width());
                    }
                }
            }
        }
        if no_siblings {
            return self.collapse();
        }
        let short_prev =
            matches!(&*self, Node::Inner(inner) if k > 0 && inner.children[k - 1].width() < HALF);
        if short_prev {
            let collapsed = self.underflow(k - 1);
            if collapsed > 0 {
                return collapsed;
            }
        }
        let short_next = matches!(&*self, Node::Inner(inner)
            if k + 1 < inner.children.len() && inner.children[k + 1].width() < HALF);
        if short_next {
            let collapsed = self.underflow(k + 1);
            if collapsed > 0 {
                return collapsed;
            }
        }
        self.collapse()
    }

    /// Insert a subtree handle at child slot `k`. When the node is full it
    /// splits, keeping the lower half here and returning the upper half as
    /// an overflow sibling for the caller to install one level up. The
    /// inserted subtree may be short, so the affected side is repaired.
    pub(crate) fn insert_node_here(&mut self, k: usize, item: NodeRef<T>) -> Option<NodeRef<T>> {
        let mut sibling: Option<Node<T>> = None;
        let mut fix_at = k;
        let mut fix_sibling = false;
        {
            let inner = self.inner_mut();
            if inner.children.len() < LIMIT {
                inner.children.insert(k, item);
            } else {
                trace!("splitting full interior node");
                let mut upper = inner.split_upper();
                if k < HALF {
                    inner.children.insert(k, item);
                } else {
                    upper.children.insert(k - HALF, item);
                    fix_at = k - HALF;
                    fix_sibling = true;
                }
                sibling = Some(Node::Inner(upper));
            }
        }
        match sibling {
            None => {
                let collapsed = self.underflow(fix_at);
                debug_assert_eq!(collapsed, 0);
                None
            }
            Some(mut sib) => {
                if fix_sibling {
                    let collapsed = sib.underflow(fix_at);
                    debug_assert_eq!(collapsed, 0);
                } else {
                    let collapsed = self.underflow(fix_at);
                    debug_assert_eq!(collapsed, 0);
                }
                sib.adjust_total();
                self.adjust_total();
                Some(Arc::new(sib))
            }
        }
    }

    /// Descend `depth` levels along the left or right spine and insert
    /// `subtree` there, propagating any overflow sibling back up.
    pub(crate) fn insert_subtree(
        &mut self,
        side: Side,
        subtree: NodeRef<T>,
        depth: usize,
    ) -> Option<NodeRef<T>> {
        let sub_total = subtree.total();
        let (pos, item) = {
            let inner = self.inner_mut();
            inner.n += sub_total;
            if depth > 0 {
                let k = match side {
                    Side::Left => 0,
                    Side::Right => inner.children.len() - 1,
                };
                let overflow = inner.prepare_child(k).insert_subtree(side, subtree, depth - 1);
                match overflow {
                    None => return None,
                    Some(ov) => {
                        let pos = match side {
                            Side::Left => 1,
                            Side::Right => inner.children.len(),
                        };
                        (pos, ov)
                    }
                }
            } else {
                let pos = match side {
                    Side::Left => 0,
                    Side::Right => inner.children.len(),
                };
                (pos, subtree)
            }
        };
        self.insert_node_here(pos, item)
    }

    /// Child `k` is short by `depth` levels (a range delete collapsed it).
    /// Remove it and reinsert it into the adjacent sibling's spine, then
    /// repair any underflow that caused.
    pub(crate) fn reinsert_subtree(&mut self, k: usize, depth: usize) -> usize {
        {
            let inner = self.inner_mut();
            debug_assert_eq!(Arc::strong_count(&inner.children[k]), 1);
            let subtree = inner.children.remove(k);
            if inner.children.len() > k {
                let overflow =
                    inner.prepare_child(k).insert_subtree(Side::Left, subtree, depth - 1);
                if let Some(ov) = overflow {
                    inner.children.insert(k + 1, ov);
                }
            } else {
                let overflow =
                    inner
                        .prepare_child(k - 1)
                        .insert_subtree(Side::Right, subtree, depth - 1);
                if let Some(ov) = overflow {
                    inner.children.insert(k, ov);
                }
            }
        }
        self.underflow(k)
    }

    /// Wrap an overflow sibling returned by a root-level insert under a
    /// fresh two-child root. Returns the height gained (0 or 1).
    pub(crate) fn wrap_overflow(&mut self, overflow: Option<NodeRef<T>>) -> usize {
        let Some(ov) = overflow else {
            return 0;
        };
        let old = std::mem::replace(self, Node::new_leaf());
        let n = old.total() + ov.total();
        let mut children = ArrayVec::new();
        children.push(Arc::new(old));
        children.push(ov);
        *self = Node::Inner(Inner { n, children });
        1
    }
}

/// Join two trees whose heights differ by `height_diff = left - right`.
/// Returns the joined tree and how much taller it is than the taller input
/// (0 or 1).
fn concat_nodes<T: Clone>(left: Node<T>, right: Node<T>, height_diff: isize) -> (Node<T>, usize) {
    if height_diff == 0 {
        let n = left.total() + right.total();
        let mut children = ArrayVec::new();
        children.push(Arc::new(left));
        children.push(Arc::new(right));
        let mut root = Node::Inner(Inner { n, children });
        let mut collapsed = root.underflow(0);
        if collapsed == 0 {
            collapsed = root.underflow(1);
        }
        let adj = if collapsed == 0 { 1 } else { 0 };
        (root, adj)
    } else if height_diff > 0 {
        let mut root = left;
        let overflow = root.insert_subtree(Side::Right, Arc::new(right), height_diff as usize - 1);
        let adj = root.wrap_overflow(overflow);
        (root, adj)
    } else {
        let mut root = right;
        let overflow =
            root.insert_subtree(Side::Left, Arc::new(left), (-height_diff) as usize - 1);
        let adj = root.wrap_overflow(overflow);
        (root, adj)
    }
}

/// Join two roots with known heights; returns the new root and its height.
pub(crate) fn concat_roots<T: Clone>(
    left: Node<T>,
    left_height: usize,
    right: Node<T>,
    right_height: usize,
) -> (Node<T>, usize) {
    let diff = left_height as isize - right_height as isize;
    let (root, adj) = concat_nodes(left, right, diff);
    (root, left_height.max(right_height) + adj)
}

/// Join two roots, measuring their heights first.
pub(crate) fn concat_unknown<T: Clone>(left: Node<T>, right: Node<T>) -> Node<T> {
    let lh = left.height();
    let rh = right.height();
    concat_roots(left, lh, right, rh).0
}

/// Join two subtrees whose shortness relative to a common parent is known;
/// returns the joined subtree and its remaining deficit.
pub(crate) fn concat_subtrees<T: Clone>(
    left: Node<T>,
    left_deficit: usize,
    right: Node<T>,
    right_deficit: usize,
) -> (Node<T>, usize) {
    let deepest = left_deficit.max(right_deficit);
    let diff = right_deficit as isize - left_deficit as isize;
    let (root, adj) = concat_nodes(left, right, diff);
    (root, deepest - adj)
}
