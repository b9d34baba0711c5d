//! The root's positional index accelerator.
//!
//! A root caches, per `INDEX_FACTOR`-aligned block of element indices, the
//! leaf holding the block's first element and the element index at which
//! that leaf starts. Entries are weak: any structural mutation marks the
//! affected region dirty and the cache is rebuilt lazily on the next
//! access. A binary trie over the block numbers records which entries are
//! still valid; both halves of a trie node agreeing on a sentinel
//! consolidates the node back into its parent, and freed trie nodes are
//! recycled through an arena freelist.
//!
//! The setclean bitmap additionally records whether the cached leaf was
//! reachable through uniquely owned nodes when cached. Only such entries
//! may be written through without a copy-on-write descent, and any
//! operation that shares subtrees out of a root wipes the bitmap by
//! marking the whole index dirty.

use std::sync::Arc;

use bitvec::vec::BitVec;
use log::debug;

use crate::tree::{Node, INDEX_FACTOR};

/// Trie sentinel: the region is fully clean.
pub(crate) const CLEAN: i32 = -1;
/// Trie sentinel: the region is fully dirty.
pub(crate) const DIRTY: i32 = -2;

fn highest_set_bit(x: usize) -> usize {
    if x == 0 {
        0
    } else {
        1 << (usize::BITS - 1 - x.leading_zeros())
    }
}

pub(crate) struct IndexState<T> {
    /// Cached leaf per block; dereferenced only while the trie says the
    /// block is clean.
    index_list: Vec<*const Node<T>>,
    /// Element index at which the cached leaf starts.
    offset_list: Vec<usize>,
    /// Whether the cached leaf may be written through directly.
    setclean: BitVec,
    /// Trie arena: pairs of slots, child index or sentinel.
    dirty: Vec<i32>,
    dirty_root: i32,
    /// Head of the freelist threaded through left slots; the right slot of
    /// a free node is always `CLEAN`, so the free tree is a plain list.
    free_root: i32,
    /// Element count the trie was built against.
    last_n: usize,
}

// The cached pointers only ever target nodes owned by the tree this state
// belongs to, and they are revalidated through the dirty trie before every
// dereference.
unsafe impl<T: Send> Send for IndexState<T> {}

impl<T: Clone> IndexState<T> {
    pub(crate) fn new() -> Self {
        IndexState {
            index_list: Vec::new(),
            offset_list: Vec::new(),
            setclean: BitVec::new(),
            dirty: Vec::new(),
            dirty_root: DIRTY,
            free_root: -1,
            last_n: 0,
        }
    }

    /// Drop all caches and start over with everything dirty.
    pub(crate) fn reset(&mut self) {
        *self = IndexState::new();
    }

    /// Take a trie node from the freelist, growing the arena when empty.
    fn alloc(&mut self) -> i32 {
        if self.free_root < 0 {
            let old = self.dirty.len();
            let new_len = if old == 0 { 32 } else { old * 2 };
            self.dirty.resize(new_len, 0);
            for i in (old..new_len).step_by(2) {
                self.dirty[i] = (i + 2) as i32;
                self.dirty[i + 1] = CLEAN;
            }
            self.dirty[new_len - 2] = CLEAN;
            self.free_root = old as i32;
        }
        let i = self.free_root;
        let left = self.dirty[i as usize];
        let right = self.dirty[i as usize + 1];
        self.free_root = if left >= 0 { left } else { right };
        i
    }

    /// Return the trie rooted at `loc` to the freelist.
    fn free(&mut self, loc: i32) {
        let left = self.dirty[loc as usize];
        let right = self.dirty[loc as usize + 1];
        if left >= 0 {
            self.free(left);
        }
        if right >= 0 {
            self.free(right);
        }
        self.dirty[loc as usize] = self.free_root;
        self.dirty[loc as usize + 1] = CLEAN;
        self.free_root = loc;
    }

    fn mark_r(&mut self, offset: usize, i: i32, bit: usize, value: i32, n: usize) {
        let i = i as usize;
        let next = if offset & bit == 0 {
            if value == DIRTY {
                // The whole right half of this region is dirtied too.
                let right = self.dirty[i + 1];
                if right >= 0 {
                    self.free(right);
                }
                self.dirty[i + 1] = DIRTY;
            }
            i
        } else {
            i + 1
        };

        let j = self.dirty[next];
        if j == value {
            return;
        }
        if bit == 1 {
            self.dirty[next] = value;
            return;
        }
        let j = if j < 0 {
            let old_value = j;
            let fresh = self.alloc();
            self.dirty[next] = fresh;
            self.dirty[fresh as usize] = old_value;
            self.dirty[fresh as usize + 1] = old_value;
            fresh as usize
        } else {
            j as usize
        };

        self.mark_r(offset, j as i32, bit >> 1, value, n);

        // Consolidate: both halves agreeing, or a sentinel whose sibling
        // region lies wholly past the end of the list.
        let half = bit >> 1;
        if self.dirty[j] == self.dirty[j + 1]
            || (self.dirty[j] < 0
                && ((offset | half) & !(half - 1)) > (n - 1) / INDEX_FACTOR)
        {
            let value = self.dirty[j];
            self.free(j as i32);
            self.dirty[next] = value;
        }
    }

    /// Publish that the block containing element `offset` became `value`
    /// (`CLEAN` or `DIRTY`). Marking offset 0 dirty, or any mark on a list
    /// no larger than one block, wipes the whole trie.
    pub(crate) fn mark(&mut self, n: usize, offset: usize, value: i32) {
        if n == 0 {
            self.last_n = 0;
            return;
        }
        if (offset == 0 && value == DIRTY) || n <= INDEX_FACTOR {
            if self.dirty_root >= 0 {
                self.free(self.dirty_root);
            }
            self.dirty_root = DIRTY;
            self.last_n = n;
            return;
        }
        debug_assert_eq!(self.last_n, n);
        if self.dirty_root == value {
            return;
        }
        if self.dirty_root < 0 {
            let old_value = self.dirty_root;
            self.dirty_root = self.alloc();
            let r = self.dirty_root as usize;
            self.dirty[r] = old_value;
            self.dirty[r + 1] = old_value;
        }
        let offset = offset / INDEX_FACTOR;
        let bit = highest_set_bit((n - 1) / INDEX_FACTOR);
        self.mark_r(offset, self.dirty_root, bit, value, n);
        let r = self.dirty_root as usize;
        if self.dirty[r] == self.dirty[r + 1] {
            let root = self.dirty_root;
            self.free(root);
            self.dirty_root = value;
        }
    }

    fn find_dirty(&self, offset: usize, bit: usize, i: i32) -> usize {
        let i = i as usize;
        if self.dirty[i] == DIRTY {
            return offset;
        }
        if self.dirty[i] >= 0 {
            return self.find_dirty(offset, bit >> 1, self.dirty[i]);
        }
        if self.dirty[i + 1] == DIRTY {
            return offset | bit;
        }
        debug_assert!(self.dirty[i + 1] >= 0);
        self.find_dirty(offset | bit, bit >> 1, self.dirty[i + 1])
    }

    /// Is the block containing element `offset` dirty? When it is clean,
    /// also report some nearby still-dirty block that the caller can
    /// opportunistically repair.
    pub(crate) fn is_dirty(&self, n: usize, offset: usize) -> (bool, Option<usize>) {
        if self.dirty.is_empty() {
            return (true, None);
        }
        if self.dirty_root < 0 {
            return (self.dirty_root == DIRTY, None);
        }
        debug_assert_eq!(self.last_n, n);
        let block = offset / INDEX_FACTOR;
        let mut bit = highest_set_bit((n - 1) / INDEX_FACTOR);
        let mut parent = self.dirty_root;
        let found = loop {
            let next = if block & bit == 0 {
                self.dirty[parent as usize]
            } else {
                self.dirty[parent as usize + 1]
            };
            bit >>= 1;
            if next < 0 {
                break next;
            }
            parent = next;
        };
        if found == DIRTY {
            (true, None)
        } else {
            let bit = if bit == 0 { 1 } else { bit << 1 };
            let dirty_block = self.find_dirty((block ^ bit) & !(bit - 1), bit, parent);
            let dirty_offset = INDEX_FACTOR * dirty_block;
            if dirty_offset < n {
                (false, Some(dirty_offset))
            } else {
                (false, None)
            }
        }
    }

    fn grow_index(&mut self, n: usize) {
        let needed = n / INDEX_FACTOR + 1;
        if self.index_list.is_empty() {
            debug!("allocating index for {} blocks", needed);
            self.index_list = vec![std::ptr::null(); needed];
            self.offset_list = vec![0; needed];
            self.setclean = BitVec::repeat(false, needed);
        } else {
            let mut len = self.index_list.len();
            while len < needed {
                len *= 2;
            }
            self.index_list.resize(len, std::ptr::null());
            self.offset_list.resize(len, 0);
            self.setclean.resize(len, false);
        }
    }

    /// Record that `leaf` (starting at element `offset`, holding
    /// `leaf_len` elements) is current, filling the entry of every block
    /// whose first element it covers.
    pub(crate) fn mark_clean_range(
        &mut self,
        n: usize,
        offset: usize,
        leaf: *const Node<T>,
        leaf_len: usize,
        setclean: bool,
    ) {
        let mut block = offset.div_ceil(INDEX_FACTOR);
        while block * INDEX_FACTOR < offset + leaf_len {
            self.mark(n, block * INDEX_FACTOR, CLEAN);
            if block >= self.index_list.len() {
                self.grow_index(n);
            }
            self.index_list[block] = leaf;
            self.offset_list[block] = offset;
            self.setclean.set(block, setclean);
            block += 1;
        }
    }

    pub(crate) fn is_setclean(&self, block: usize) -> bool {
        block < self.setclean.len() && self.setclean[block]
    }

    pub(crate) fn cached(&self, block: usize) -> (usize, *const Node<T>) {
        (self.offset_list[block], self.index_list[block])
    }
}

/// Walk from the root to the leaf holding element `i`, fill the index
/// entries covered by that leaf, and return the element. The entries are
/// write-clean only if every node on the path was uniquely owned.
pub(crate) fn make_clean<'a, T: Clone>(
    ix: &mut IndexState<T>,
    n: usize,
    node: &'a Node<T>,
    i: usize,
    offset: usize,
    setclean: bool,
) -> &'a T {
    match node {
        Node::Leaf(elems) => &elems[i],
        Node::Inner(inner) => {
            let (k, before) = inner.locate(i);
            let child = &inner.children[k];
            let setclean = setclean && Arc::strong_count(child) == 1;
            if child.is_leaf() {
                ix.mark_clean_range(n, offset + before, Arc::as_ptr(child), child.width(), setclean);
            }
            make_clean(ix, n, child, i - before, offset + before, setclean)
        }
    }
}

/// As [`make_clean`], but prepares the path for writing: shared nodes are
/// copied on the way down (which invalidates cached pointers, so the whole
/// index is wiped the first time that happens), and the resulting entries
/// are always write-clean.
pub(crate) fn make_clean_write<'a, T: Clone>(
    ix: &mut IndexState<T>,
    n: usize,
    node: &'a mut Node<T>,
    i: usize,
    offset: usize,
    did_mark: bool,
) -> &'a mut T {
    match node {
        Node::Leaf(elems) => &mut elems[i],
        Node::Inner(inner) => {
            let (k, before) = inner.locate(i);
            let mut did_mark = did_mark;
            if Arc::strong_count(&inner.children[k]) > 1 && !did_mark {
                ix.mark(n, 0, DIRTY);
                did_mark = true;
            }
            inner.prepare_child(k);
            if inner.children[k].is_leaf() {
                let leaf = Arc::as_ptr(&inner.children[k]);
                let leaf_len = inner.children[k].width();
                ix.mark_clean_range(n, offset + before, leaf, leaf_len, true);
            }
            let child = match Arc::get_mut(&mut inner.children[k]) {
                Some(child) => child,
                None => unreachable!("prepared child is uniquely owned"),
            };
            make_clean_write(ix, n, child, i - before, offset + before, did_mark)
        }
    }
}
