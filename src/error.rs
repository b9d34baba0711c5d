use thiserror::Error;

/// Errors reported by fallible list operations.
///
/// Static typing removes the original taxonomy's type errors, and
/// allocation failure aborts, so the surface is: bad indices, lookups
/// that find nothing, stepped-slice length mismatches, and capacity
/// overflow. Errors from user callbacks pass through
/// [`try_sort_by`](crate::BList::try_sort_by) unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    #[error("index {index} out of range for list of length {len}")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("value not found in list")]
    NotFound,
    #[error("attempt to assign {got} values to a stepped range of length {expected}")]
    SizeMismatch { expected: usize, got: usize },
    #[error("list capacity exceeded")]
    Overflow,
}
