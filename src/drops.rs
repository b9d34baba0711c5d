//! Deferred release of removed elements and subtrees.
//!
//! Dropping an element can run arbitrary user code (its `Drop` impl), and
//! dropping a uniquely owned subtree cascades into element drops. Every
//! public mutating operation therefore queues removals here and lets the
//! queue drain only once the tree is coherent again, so user code that
//! observes the list (through a shared handle, or through a sibling list
//! sharing subtrees) never sees a half-rebalanced tree.

use std::sync::Arc;

use crate::tree::NodeRef;

pub(crate) struct DropQueue<T> {
    elems: Vec<T>,
    nodes: Vec<NodeRef<T>>,
}

impl<T> DropQueue<T> {
    pub(crate) fn new() -> Self {
        DropQueue {
            elems: Vec::new(),
            nodes: Vec::new(),
        }
    }

    /// Queue a removed element for release at the end of the operation.
    pub(crate) fn defer(&mut self, x: T) {
        self.elems.push(x);
    }

    /// Queue a detached subtree. A shared node is released immediately:
    /// decrementing a count that stays positive cannot run user code.
    pub(crate) fn defer_node(&mut self, node: NodeRef<T>) {
        if Arc::strong_count(&node) > 1 {
            drop(node);
        } else {
            self.nodes.push(node);
        }
    }

    /// Pull one queued element back out (used by removal operations that
    /// return the removed value to the caller).
    pub(crate) fn take_elem(&mut self) -> Option<T> {
        self.elems.pop()
    }
}

impl<T> Drop for DropQueue<T> {
    fn drop(&mut self) {
        // One handle at a time: a destructor may itself queue work on some
        // other list, and each drop must observe a coherent queue.
        while let Some(x) = self.elems.pop() {
            drop(x);
        }
        while let Some(node) = self.nodes.pop() {
            drop(node);
        }
    }
}
