use std::fmt;
use std::num::NonZero;

use new_zealand::nz;

/// Logical address of one allocated slot in a [`PoolContainer`][crate::PoolContainer].
///
/// The address encodes the slab index and the item index within that slab as a single
/// integer: `slab_index * ELEMENT_COUNT + item_index`. It is never dereferenced directly,
/// use [`PoolContainer::item_ptr()`][crate::PoolContainer::item_ptr] to obtain the
/// pointer to the slot it identifies.
///
/// # Examples
///
/// ```
/// use slab_pool::Address;
///
/// let address = Address::<64>::from_parts(2, 5);
///
/// assert_eq!(address.get(), 2 * 64 + 5);
/// assert_eq!(address.slab_index(), 2);
/// assert_eq!(address.item_index(), 5);
/// assert_eq!(Address::<64>::from_raw(133), address);
/// ```
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Address<const ELEMENT_COUNT: usize>(usize);

impl<const ELEMENT_COUNT: usize> Address<ELEMENT_COUNT> {
    const ELEMENTS_PER_SLAB: NonZero<usize> = nz!(ELEMENT_COUNT);

    /// Creates the address of item `item_index` in slab `slab_index`.
    ///
    /// # Panics
    ///
    /// Panics if `item_index` is not less than `ELEMENT_COUNT` or if the encoded
    /// address does not fit in `usize`.
    #[must_use]
    pub fn from_parts(slab_index: usize, item_index: usize) -> Self {
        assert!(
            item_index < ELEMENT_COUNT,
            "item index {item_index} out of bounds in slab of capacity {ELEMENT_COUNT}"
        );

        let raw = slab_index
            .checked_mul(ELEMENT_COUNT)
            .and_then(|base| base.checked_add(item_index))
            .expect("slab index too large to be encoded as an address");

        Self(raw)
    }

    /// Reconstitutes an address from its integer encoding, as returned by [`get()`](Self::get).
    #[must_use]
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    /// The integer encoding of the address.
    #[must_use]
    pub const fn get(self) -> usize {
        self.0
    }

    /// Index of the slab that contains the addressed slot.
    #[must_use]
    #[allow(
        clippy::integer_division,
        reason = "the divisor is NonZero and truncation to the slab index is intended"
    )]
    pub fn slab_index(self) -> usize {
        self.0 / Self::ELEMENTS_PER_SLAB
    }

    /// Index of the addressed slot within its slab.
    #[must_use]
    #[allow(
        clippy::modulo_arithmetic,
        reason = "the divisor is NonZero and both operands are unsigned"
    )]
    pub fn item_index(self) -> usize {
        self.0 % Self::ELEMENTS_PER_SLAB
    }
}

impl<const ELEMENT_COUNT: usize> fmt::Debug for Address<ELEMENT_COUNT> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Address")
            .field("raw", &self.0)
            .field("slab_index", &self.slab_index())
            .field("item_index", &self.item_index())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Address<64>: Send, Sync, Copy, fmt::Debug, std::hash::Hash);

    #[test]
    fn parts_are_encoded_slab_major() {
        let address = Address::<128>::from_parts(3, 17);

        assert_eq!(address.get(), 3 * 128 + 17);
        assert_eq!(address.slab_index(), 3);
        assert_eq!(address.item_index(), 17);
    }

    #[test]
    fn first_and_last_item_of_slab() {
        let first = Address::<64>::from_parts(1, 0);
        let last = Address::<64>::from_parts(1, 63);

        assert_eq!(first.get(), 64);
        assert_eq!(last.get(), 127);
        assert_eq!(last.slab_index(), 1);
        assert_eq!(last.item_index(), 63);

        // The next address belongs to the next slab.
        let next = Address::<64>::from_raw(last.get() + 1);
        assert_eq!(next.slab_index(), 2);
        assert_eq!(next.item_index(), 0);
    }

    #[test]
    fn raw_decodes_with_division_and_remainder() {
        for raw in [0_usize, 1, 63, 64, 65, 1000, 4095, 4096] {
            let address = Address::<1024>::from_raw(raw);

            assert_eq!(address.slab_index(), raw / 1024);
            assert_eq!(address.item_index(), raw % 1024);
            assert_eq!(
                Address::<1024>::from_parts(address.slab_index(), address.item_index()),
                address
            );
        }
    }

    #[test]
    #[should_panic]
    fn item_index_out_of_bounds_panics() {
        _ = Address::<64>::from_parts(0, 64);
    }

    #[test]
    #[should_panic]
    fn unencodable_slab_index_panics() {
        _ = Address::<64>::from_parts(usize::MAX, 0);
    }

    #[test]
    fn debug_shows_decoded_parts() {
        let debug_output = format!("{:?}", Address::<64>::from_parts(1, 2));

        assert!(debug_output.contains("slab_index: 1"));
        assert!(debug_output.contains("item_index: 2"));
    }
}
