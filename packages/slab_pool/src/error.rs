use thiserror::Error;

/// Errors reported when a pointer handed back to a pool cannot be deallocated.
///
/// Only the fallible entry points return these. The infallible ones, such as
/// [`PoolContainer::do_deallocate()`][crate::PoolContainer::do_deallocate], treat the same
/// conditions as contract violations and panic.
#[derive(Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// The pointer does not lie within any slab buffer owned by the pool.
    #[error("pointer {address:#x} was not allocated from this pool")]
    ForeignPointer {
        /// Address of the rejected pointer.
        address: usize,
    },

    /// The pointer lies within a slab buffer but its slot is not currently allocated,
    /// typically because it has already been deallocated.
    #[error("slot {item_index} of slab {slab_index} is not allocated")]
    NotAllocated {
        /// Index of the slab that contains the pointer.
        slab_index: usize,

        /// Index of the slot within the slab.
        item_index: usize,
    },
}

/// A specialized `Result` type for pool operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug, std::error::Error);

    #[test]
    fn foreign_pointer_message_names_address() {
        let error = Error::ForeignPointer { address: 0x1000 };

        assert_eq!(
            error.to_string(),
            "pointer 0x1000 was not allocated from this pool"
        );
    }

    #[test]
    fn not_allocated_message_names_slot() {
        let error = Error::NotAllocated {
            slab_index: 2,
            item_index: 7,
        };

        assert_eq!(error.to_string(), "slot 7 of slab 2 is not allocated");

        let result: Result<()> = Err(error);
        assert!(result.is_err());
    }
}
