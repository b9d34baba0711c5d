//! A list backed by a B+tree.
//!
//! [`BList`] supports the full random-access sequence interface — indexing,
//! slicing, insertion, deletion, concatenation, repetition, iteration and
//! stable sorting — with asymptotically better bounds than a contiguous
//! vector: every positional operation is O(log n), and slicing, copying
//! and repetition are cheap because the resulting lists share subtrees
//! until one of them writes.
//!
//! Elements live only in the leaves of a wide tree (branching factor 128);
//! interior nodes carry child handles and cached element counts. Each root
//! additionally maintains a small positional index over its leaves so that
//! repeated random access on an unchanging list approaches O(1).
//!
//! ```
//! use blist::BList;
//!
//! let mut list: BList<u64> = (0..10_000).collect();
//! list.insert(5_000, 42);
//! assert_eq!(list[5_000], 42);
//!
//! let window = list.slice(4_000..6_000);   // shares subtrees with `list`
//! assert_eq!(window.len(), 2_000);
//!
//! list.remove_range(0..9_000);
//! assert_eq!(window.len(), 2_000);         // unaffected by the mutation
//! ```

pub mod debug;
mod drops;
mod error;
mod index;
mod list;
mod tree;

pub use error::Error;
pub use list::BList;
pub use tree::iter::{IntoIter, Iter, RevIter};
