//! The B+tree engine backing [`BList`](crate::BList).
//!
//! Elements live only in leaves; interior nodes hold co-owning handles to
//! their children plus the cached element total of the subtree. A node may
//! be referenced from several parents at once (after cheap list copies,
//! slicing or repetition), in which case it is treated as immutable until
//! [`Inner::prepare_child`] replaces it with a uniquely owned copy.

pub(crate) mod edit;
pub(crate) mod forest;
pub(crate) mod iter;
pub(crate) mod rebalance;
pub(crate) mod sort;

use std::sync::Arc;

use arrayvec::ArrayVec;

/// Branching factor of the tree. Every node stores at most `LIMIT` children.
pub(crate) const LIMIT: usize = 128;

/// Minimum fill of any node other than the root.
pub(crate) const HALF: usize = LIMIT / 2;

/// Upper bound on the tree height, used to size iterator stacks. With a
/// minimum fill of `HALF` children per node this comfortably exceeds
/// `log_HALF` of the maximum element count.
pub(crate) const MAX_HEIGHT: usize = 16;

/// Block size of the root's positional index accelerator.
pub(crate) const INDEX_FACTOR: usize = LIMIT;

/// Maximum number of elements a list can hold.
pub(crate) const MAX_N: usize = isize::MAX as usize;

/// A co-owning handle to a shareable (internal) node.
pub(crate) type NodeRef<T> = Arc<Node<T>>;

/// A tree node. The root of a list is stored inline in the list and is
/// never shared; all other nodes are reached through [`NodeRef`] handles.
#[derive(Clone, Debug)]
pub(crate) enum Node<T> {
    Leaf(ArrayVec<T, LIMIT>),
    Inner(Inner<T>),
}

/// Payload of an interior node: the cached element total `n` and the
/// child handles. `n` always equals the sum of the children's totals on
/// entry to and exit from every public operation.
#[derive(Clone, Debug)]
pub(crate) struct Inner<T> {
    pub(crate) n: usize,
    pub(crate) children: ArrayVec<NodeRef<T>, LIMIT>,
}

impl<T: Clone> Node<T> {
    pub(crate) fn new_leaf() -> Self {
        Node::Leaf(ArrayVec::new())
    }

    pub(crate) fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf(_))
    }

    /// Number of elements stored in the subtree rooted here.
    pub(crate) fn total(&self) -> usize {
        match self {
            Node::Leaf(elems) => elems.len(),
            Node::Inner(inner) => inner.n,
        }
    }

    /// Number of direct children (elements for a leaf).
    pub(crate) fn width(&self) -> usize {
        match self {
            Node::Leaf(elems) => elems.len(),
            Node::Inner(inner) => inner.children.len(),
        }
    }

    /// Height of the subtree; a leaf has height 1. Heights are not cached,
    /// the walk follows the rightmost spine.
    pub(crate) fn height(&self) -> usize {
        match self {
            Node::Leaf(_) => 1,
            Node::Inner(inner) => match inner.children.last() {
                Some(child) => 1 + child.height(),
                None => 1,
            },
        }
    }

    pub(crate) fn leaf(&self) -> &ArrayVec<T, LIMIT> {
        match self {
            Node::Leaf(elems) => elems,
            Node::Inner(_) => unreachable!("expected a leaf node"),
        }
    }

    pub(crate) fn leaf_mut(&mut self) -> &mut ArrayVec<T, LIMIT> {
        match self {
            Node::Leaf(elems) => elems,
            Node::Inner(_) => unreachable!("expected a leaf node"),
        }
    }

    pub(crate) fn inner(&self) -> &Inner<T> {
        match self {
            Node::Inner(inner) => inner,
            Node::Leaf(_) => unreachable!("expected an interior node"),
        }
    }

    pub(crate) fn inner_mut(&mut self) -> &mut Inner<T> {
        match self {
            Node::Inner(inner) => inner,
            Node::Leaf(_) => unreachable!("expected an interior node"),
        }
    }

    /// Recompute the cached total from the children.
    pub(crate) fn adjust_total(&mut self) {
        if let Node::Inner(inner) = self {
            inner.n = inner.children.iter().map(|c| c.total()).sum();
        }
    }

    /// Empty this node, queueing the former contents for deferred release.
    pub(crate) fn clear_into(&mut self, dq: &mut crate::drops::DropQueue<T>) {
        match std::mem::replace(self, Node::new_leaf()) {
            Node::Leaf(elems) => {
                for x in elems {
                    dq.defer(x);
                }
            }
            Node::Inner(inner) => {
                for child in inner.children {
                    dq.defer_node(child);
                }
            }
        }
    }

    /// Append the contents of a sibling node of the same shape.
    pub(crate) fn absorb(&mut self, other: Node<T>) {
        match (self, other) {
            (Node::Leaf(a), Node::Leaf(b)) => a.extend(b),
            (Node::Inner(a), Node::Inner(b)) => {
                a.n += b.n;
                a.children.extend(b.children);
            }
            _ => unreachable!("sibling nodes share a shape"),
        }
    }

    /// As [`absorb`](Self::absorb), but the sibling is shared and its
    /// contents are cloned rather than moved.
    pub(crate) fn absorb_ref(&mut self, other: &Node<T>) {
        match (self, other) {
            (Node::Leaf(a), Node::Leaf(b)) => a.extend(b.iter().cloned()),
            (Node::Inner(a), Node::Inner(b)) => {
                a.n += b.n;
                a.children.extend(b.children.iter().cloned());
            }
            _ => unreachable!("sibling nodes share a shape"),
        }
    }

    /// Prepend the contents of a sibling node of the same shape.
    pub(crate) fn prepend(&mut self, other: Node<T>) {
        match (self, other) {
            (Node::Leaf(a), Node::Leaf(b)) => {
                let tail = std::mem::take(a);
                a.extend(b);
                a.extend(tail);
            }
            (Node::Inner(a), Node::Inner(b)) => {
                let tail = std::mem::take(&mut a.children);
                a.children.extend(b.children);
                a.children.extend(tail);
                a.n += b.n;
            }
            _ => unreachable!("sibling nodes share a shape"),
        }
    }

    pub(crate) fn prepend_ref(&mut self, other: &Node<T>) {
        match (self, other) {
            (Node::Leaf(a), Node::Leaf(b)) => {
                let tail = std::mem::take(a);
                a.extend(b.iter().cloned());
                a.extend(tail);
            }
            (Node::Inner(a), Node::Inner(b)) => {
                let tail = std::mem::take(&mut a.children);
                a.children.extend(b.children.iter().cloned());
                a.children.extend(tail);
                a.n += b.n;
            }
            _ => unreachable!("sibling nodes share a shape"),
        }
    }

    /// Reverse the subtree in place, cloning shared children on the way
    /// down.
    pub(crate) fn reverse(&mut self) {
        if self.width() <= 1 {
            return;
        }
        match self {
            Node::Leaf(elems) => elems.reverse(),
            Node::Inner(inner) => {
                inner.children.reverse();
                for k in 0..inner.children.len() {
                    inner.prepare_child(k).reverse();
                }
            }
        }
    }

    /// Validate the structural invariants of the subtree. `is_root` relaxes
    /// the minimum-fill requirement for the node itself.
    pub(crate) fn check_invariants(&self, is_root: bool) {
        match self {
            Node::Leaf(elems) => {
                if !is_root {
                    assert!(elems.len() >= HALF, "leaf below minimum fill");
                }
            }
            Node::Inner(inner) => {
                assert!(inner.children.len() >= 2, "interior node with fewer than 2 children");
                let mut total = 0;
                let mut height = None;
                for child in &inner.children {
                    assert!(child.width() >= HALF, "child below minimum fill");
                    assert!(child.width() <= LIMIT, "child above branching factor");
                    child.check_invariants(false);
                    total += child.total();
                    let h = child.height();
                    match height {
                        None => height = Some(h),
                        Some(prev) => assert_eq!(prev, h, "uneven leaf depth"),
                    }
                }
                assert_eq!(inner.n, total, "cached total out of date");
            }
        }
    }
}

impl<T: Clone> Inner<T> {
    /// Find the child holding element index `i`, scanning from the nearer
    /// end. Returns the child slot and the number of elements preceding it.
    pub(crate) fn locate(&self, i: usize) -> (usize, usize) {
        if i <= self.n / 2 {
            let mut so_far = 0;
            for (k, child) in self.children.iter().enumerate() {
                let t = child.total();
                if i < so_far + t {
                    return (k, so_far);
                }
                so_far += t;
            }
        } else {
            let mut so_far = self.n;
            for (k, child) in self.children.iter().enumerate().rev() {
                so_far -= child.total();
                if i >= so_far {
                    return (k, so_far);
                }
            }
        }
        // Past the end: report the append position.
        let k = self.children.len() - 1;
        (k, self.n - self.children[k].total())
    }

    /// Copy-on-write a child slot about to be mutated. A uniquely owned
    /// child is returned as is; a shared child is replaced by a structural
    /// copy (which takes one reference to each grandchild) and the old
    /// co-owning handle is released.
    pub(crate) fn prepare_child(&mut self, k: usize) -> &mut Node<T> {
        Arc::make_mut(&mut self.children[k])
    }

    /// Prepare children `k` and `k + 1` and return both mutably.
    pub(crate) fn prepare_pair(&mut self, k: usize) -> (&mut Node<T>, &mut Node<T>) {
        self.prepare_child(k);
        self.prepare_child(k + 1);
        let (a, b) = self.children.split_at_mut(k + 1);
        match (Arc::get_mut(&mut a[k]), Arc::get_mut(&mut b[0])) {
            (Some(left), Some(right)) => (left, right),
            _ => unreachable!("prepared children are uniquely owned"),
        }
    }
}
