use std::alloc::Layout;
use std::num::NonZero;
use std::ptr::NonNull;
use std::thread;

use new_zealand::nz;
use tracing::{debug, trace};

use crate::error::Result;
use crate::{Address, DropPolicy, Error, PoolContainerBuilder, SlabDescriptor, SlotLayout};

/// Number of slots per slab used when the element count is not specified.
#[cfg(not(miri))]
pub const DEFAULT_ELEMENT_COUNT: usize = 1024;

// Under Miri, we use a smaller slab capacity because Miri test runtime scales by memory usage.
#[cfg(miri)]
pub const DEFAULT_ELEMENT_COUNT: usize = 64;

/// A pool of equally sized raw memory slots with O(1) allocation and deallocation.
///
/// Memory is organized into slabs of `ELEMENT_COUNT` slots each. `ELEMENT_COUNT` must be a
/// power of two and a multiple of 64, which is checked at compile time. The pool grows by
/// one slab when every existing slab is full and releases a slab's memory as soon as its
/// last allocation is returned.
///
/// Each slab keeps an allocation bitmap next to an intrusive free list that is stored in the
/// vacant slots themselves. Slabs with at least one vacant slot are chained into a free-slab
/// list, so allocation never has to search for space.
///
/// The pool does not know what type of data is stored in the slots. It never initializes
/// or drops the contents of a slot; use [`TypedPool`][crate::TypedPool] for that.
///
/// # Examples
///
/// ```
/// use slab_pool::PoolContainer;
///
/// let mut pool = PoolContainer::<64>::new(8);
///
/// let ptr = pool.do_allocate();
/// // SAFETY: The slot is 8 bytes large and aligned for u64.
/// unsafe { ptr.cast::<u64>().write(42) };
///
/// assert!(pool.is_allocated(ptr));
/// assert_eq!(pool.count(), 1);
/// assert_eq!(pool.capacity(), 64);
///
/// pool.do_deallocate(ptr);
///
/// assert!(!pool.is_allocated(ptr));
/// assert_eq!(pool.count(), 0);
/// assert_eq!(pool.capacity(), 0);
/// ```
///
/// # Thread safety
///
/// The pool is thread-mobile ([`Send`]) and can be moved between threads, but it is not
/// thread-safe ([`Sync`]). To share it between threads, wrap it in a `Mutex` or similar.
#[derive(Debug)]
pub struct PoolContainer<const ELEMENT_COUNT: usize = DEFAULT_ELEMENT_COUNT> {
    /// All slab descriptors, including those whose buffers have been released. Released
    /// descriptors are reused before the collection grows.
    descriptors: Vec<SlabDescriptor<ELEMENT_COUNT>>,

    slot_layout: SlotLayout,

    /// Number of live allocations across all slabs. We track this explicitly to avoid
    /// repeatedly summing across slabs.
    count: usize,

    /// Head of the singly linked list of slabs that have at least one vacant slot.
    free_slab_head: Option<usize>,

    drop_policy: DropPolicy,
}

impl<const ELEMENT_COUNT: usize> PoolContainer<ELEMENT_COUNT> {
    const ELEMENTS_PER_SLAB: NonZero<usize> = nz!(ELEMENT_COUNT);

    /// Creates an empty pool for items of `item_size` bytes.
    ///
    /// Sizes smaller than one pointer are rounded up, because vacant slots store a free list
    /// link. Larger sizes are used as the slot stride unchanged. Slots are only guaranteed to
    /// be pointer-aligned when `item_size` is a multiple of the pointer width; use
    /// [`builder()`](Self::builder) with a layout for other alignment needs.
    ///
    /// No memory is allocated until the first item is.
    ///
    /// # Examples
    ///
    /// ```
    /// use slab_pool::PoolContainer;
    ///
    /// let pool = PoolContainer::<64>::new(2);
    ///
    /// assert_eq!(pool.item_size(), size_of::<usize>());
    /// assert_eq!(pool.capacity(), 0);
    ///
    /// let pool = PoolContainer::<64>::new(12);
    /// assert_eq!(pool.item_size(), 12);
    /// ```
    #[must_use]
    pub fn new(item_size: usize) -> Self {
        Self::builder().item_size(item_size).build()
    }

    /// Creates a builder for configuring and constructing a [`PoolContainer`].
    ///
    /// # Examples
    ///
    /// ```
    /// use slab_pool::{DropPolicy, PoolContainer};
    ///
    /// let pool = PoolContainer::<128>::builder()
    ///     .layout_of::<[f32; 4]>()
    ///     .drop_policy(DropPolicy::MustNotDropItems)
    ///     .build();
    ///
    /// assert_eq!(pool.item_size(), 16);
    /// ```
    #[inline]
    pub fn builder() -> PoolContainerBuilder<ELEMENT_COUNT> {
        PoolContainerBuilder::new()
    }

    #[must_use]
    pub(crate) fn new_inner(item_layout: Layout, drop_policy: DropPolicy) -> Self {
        Self {
            descriptors: Vec::new(),
            slot_layout: SlotLayout::calculate(item_layout, Self::ELEMENTS_PER_SLAB),
            count: 0,
            free_slab_head: None,
            drop_policy,
        }
    }

    /// The distance in bytes between consecutive slots, which is also the number of bytes
    /// available to each allocation.
    ///
    /// This is the configured item size rounded up to at least one pointer and then to a
    /// multiple of the configured item alignment.
    #[must_use]
    #[inline]
    pub fn item_size(&self) -> usize {
        self.slot_layout.item_size().get()
    }

    /// The memory layout the pool was configured with.
    #[must_use]
    #[inline]
    pub fn item_layout(&self) -> Layout {
        self.slot_layout.item_layout()
    }

    /// The number of slots in each slab.
    #[must_use]
    #[inline]
    pub const fn slab_capacity(&self) -> usize {
        ELEMENT_COUNT
    }

    /// The number of live allocations.
    #[must_use]
    #[inline]
    pub fn count(&self) -> usize {
        debug_assert_eq!(
            self.count,
            self.descriptors
                .iter()
                .map(SlabDescriptor::count)
                .sum::<usize>()
        );

        self.count
    }

    /// Whether the pool has no live allocations.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The number of slots backed by memory, whether allocated or not.
    ///
    /// This is the number of materialized slabs times `ELEMENT_COUNT`. Slabs whose memory
    /// has been released do not count.
    #[must_use]
    #[inline]
    pub fn capacity(&self) -> usize {
        let materialized = self
            .descriptors
            .iter()
            .filter(|descriptor| descriptor.is_materialized())
            .count();

        // Overflow here would imply capacity is greater than virtual memory - impossible.
        materialized.wrapping_mul(ELEMENT_COUNT)
    }

    /// Allocates a slot and returns a pointer to its `item_size()` uninitialized bytes.
    ///
    /// The pointer is aligned for the configured layout and stays valid until it is passed
    /// to [`do_deallocate()`](Self::do_deallocate) or the pool is dropped.
    ///
    /// This never fails. If the backing heap is exhausted, the process is aborted via
    /// [`std::alloc::handle_alloc_error`].
    ///
    /// # Examples
    ///
    /// ```
    /// use slab_pool::PoolContainer;
    ///
    /// let mut pool = PoolContainer::<64>::new(16);
    ///
    /// let a = pool.do_allocate();
    /// let b = pool.do_allocate();
    /// assert_ne!(a, b);
    ///
    /// pool.do_deallocate(a);
    /// pool.do_deallocate(b);
    /// ```
    #[must_use]
    pub fn do_allocate(&mut self) -> NonNull<u8> {
        let address = self.allocate_item();
        self.item_ptr(address)
    }

    /// Returns a slot previously obtained from [`do_allocate()`](Self::do_allocate).
    ///
    /// The contents of the slot are not dropped. If this was the last allocation in its
    /// slab, the slab's memory is released.
    ///
    /// # Panics
    ///
    /// Panics if the pointer was not obtained from this pool or has already been deallocated.
    #[track_caller]
    pub fn do_deallocate(&mut self, pointer: NonNull<u8>) {
        if let Err(error) = self.try_deallocate(pointer) {
            panic!("cannot deallocate pointer: {error}");
        }
    }

    /// Returns a slot previously obtained from [`do_allocate()`](Self::do_allocate), reporting
    /// pointers that do not belong to a live allocation instead of panicking.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ForeignPointer`] if the pointer is not within any slab of this pool
    /// and [`Error::NotAllocated`] if its slot is not currently allocated. The pool is not
    /// modified in either case.
    ///
    /// # Examples
    ///
    /// ```
    /// use slab_pool::{Error, PoolContainer};
    ///
    /// let mut pool = PoolContainer::<64>::new(8);
    ///
    /// let a = pool.do_allocate();
    /// let b = pool.do_allocate();
    ///
    /// assert!(pool.try_deallocate(a).is_ok());
    /// assert!(matches!(
    ///     pool.try_deallocate(a),
    ///     Err(Error::NotAllocated { .. })
    /// ));
    ///
    /// pool.do_deallocate(b);
    /// ```
    pub fn try_deallocate(&mut self, pointer: NonNull<u8>) -> Result<()> {
        let address = self.find_pool(pointer).ok_or(Error::ForeignPointer {
            address: pointer.as_ptr().addr(),
        })?;

        let (slab_index, item_index) = (address.slab_index(), address.item_index());

        #[expect(
            clippy::indexing_slicing,
            reason = "find_pool() only returns addresses of existing slabs"
        )]
        let is_allocated = self.descriptors[slab_index].is_allocated(item_index);

        if !is_allocated {
            return Err(Error::NotAllocated {
                slab_index,
                item_index,
            });
        }

        self.deallocate_item(slab_index, item_index);
        Ok(())
    }

    /// Whether the pointer refers to a live allocation of this pool.
    ///
    /// Pointers that were never produced by this pool, or whose slot has been released,
    /// yield `false`. This never panics and has no side effects.
    #[must_use]
    pub fn is_allocated(&self, pointer: NonNull<u8>) -> bool {
        self.find_pool(pointer)
            .is_some_and(|address| self.is_allocated_at(address))
    }

    /// Whether the slot at `address` holds a live allocation, without searching for it.
    ///
    /// Addresses of slabs that do not exist or have no memory yield `false`.
    #[must_use]
    pub(crate) fn is_allocated_at(&self, address: Address<ELEMENT_COUNT>) -> bool {
        self.descriptors
            .get(address.slab_index())
            .is_some_and(|descriptor| descriptor.is_allocated(address.item_index()))
    }

    /// Finds the slot that contains `pointer`.
    ///
    /// Only slabs that are currently backed by memory are considered. The pointer does not
    /// have to point at the start of the slot. The lookup is linear in the number of slabs.
    #[must_use]
    pub fn find_pool<T: ?Sized>(&self, pointer: NonNull<T>) -> Option<Address<ELEMENT_COUNT>> {
        let raw = pointer.cast::<u8>().as_ptr().addr();

        self.descriptors
            .iter()
            .enumerate()
            .find_map(|(slab_index, descriptor)| {
                descriptor
                    .find_item(raw, &self.slot_layout)
                    .map(|item_index| Address::from_parts(slab_index, item_index))
            })
    }

    /// Returns a pointer to the first byte of the slot identified by `address`.
    ///
    /// # Panics
    ///
    /// Panics if the address does not refer to a slot in a slab that is backed by memory.
    #[must_use]
    #[track_caller]
    pub fn item_ptr(&self, address: Address<ELEMENT_COUNT>) -> NonNull<u8> {
        let descriptor = self
            .descriptors
            .get(address.slab_index())
            .expect("address refers to a slab that does not exist");

        descriptor.item_ptr(address.item_index(), &self.slot_layout)
    }

    /// Allocates a slot and returns its logical address.
    ///
    /// The slot contents are left uninitialized.
    ///
    /// # Examples
    ///
    /// ```
    /// use slab_pool::PoolContainer;
    ///
    /// let mut pool = PoolContainer::<64>::new(8);
    ///
    /// let first = pool.allocate_item();
    /// let second = pool.allocate_item();
    ///
    /// assert_eq!(first.get(), 0);
    /// assert_eq!(second.get(), 1);
    ///
    /// pool.deallocate_address(first);
    /// pool.deallocate_address(second);
    /// ```
    #[must_use]
    pub fn allocate_item(&mut self) -> Address<ELEMENT_COUNT> {
        let slab_index = match self.free_slab_head {
            Some(slab_index) => slab_index,
            None => self.allocate_descriptor(),
        };

        #[expect(
            clippy::indexing_slicing,
            reason = "the free-slab list only contains indexes of existing slabs"
        )]
        let descriptor = &mut self.descriptors[slab_index];

        let item_index = descriptor.allocate_free_item(&self.slot_layout);

        if !descriptor.has_free_item() {
            // The slab just became full, so it leaves the free-slab list.
            self.free_slab_head = descriptor.next_free_slab();
            descriptor.set_next_free_slab(None);

            assert!(
                self.free_slab_head.is_none_or(|next| self
                    .descriptors
                    .get(next)
                    .is_some_and(SlabDescriptor::has_free_item)),
                "next slab in the free-slab list has no vacant slot"
            );
        }

        // Cannot overflow because that would imply more allocations than virtual memory.
        self.count = self.count.wrapping_add(1);

        trace!(slab_index, item_index, count = self.count, "allocated item");

        Address::from_parts(slab_index, item_index)
    }

    /// Deallocates the slot identified by `address`. See [`deallocate_item()`](Self::deallocate_item).
    ///
    /// # Panics
    ///
    /// Panics if the address does not refer to a live allocation.
    #[track_caller]
    pub fn deallocate_address(&mut self, address: Address<ELEMENT_COUNT>) {
        self.deallocate_item(address.slab_index(), address.item_index());
    }

    /// Deallocates item `item_index` of slab `slab_index`.
    ///
    /// If this was the last allocation in the slab, the slab's memory is released and its
    /// descriptor becomes available for reuse.
    ///
    /// # Panics
    ///
    /// Panics if the slab does not exist or has no memory, if the item index is out of bounds
    /// or if the item is not allocated. The pool is never left in an inconsistent state.
    #[track_caller]
    pub fn deallocate_item(&mut self, slab_index: usize, item_index: usize) {
        let descriptor_count = self.descriptors.len();

        let descriptor = self.descriptors.get_mut(slab_index).unwrap_or_else(|| {
            panic!("slab index {slab_index} out of bounds in pool with {descriptor_count} slabs")
        });

        assert!(
            descriptor.is_materialized(),
            "attempted to deallocate item {item_index} from slab {slab_index} which has no buffer"
        );
        assert!(
            item_index < ELEMENT_COUNT,
            "item index {item_index} out of bounds in slab of capacity {ELEMENT_COUNT}"
        );
        assert!(
            descriptor.is_allocated(item_index),
            "attempted to deallocate item {item_index} of slab {slab_index} which is not allocated"
        );

        let was_full = descriptor.is_full();
        let remaining = descriptor.deallocate_item(item_index, &self.slot_layout);

        // Cannot wrap because the item was allocated, so the pool count is at least 1.
        self.count = self.count.wrapping_sub(1);

        trace!(slab_index, item_index, count = self.count, "deallocated item");

        if remaining == 0 {
            self.deallocate_descriptor(slab_index);
        } else if was_full {
            // The slab has a vacant slot again, so it rejoins the free-slab list.
            descriptor.set_next_free_slab(self.free_slab_head);
            self.free_slab_head = Some(slab_index);
        }
    }

    /// Materializes a slab, reusing a released descriptor if one exists, and pushes it to the
    /// front of the free-slab list.
    #[must_use]
    fn allocate_descriptor(&mut self) -> usize {
        let slab_index = if let Some(index) = self
            .descriptors
            .iter()
            .position(|descriptor| !descriptor.is_materialized())
        {
            index
        } else {
            self.descriptors.push(SlabDescriptor::new());

            // This can never wrap around because we just added a descriptor.
            self.descriptors.len().wrapping_sub(1)
        };

        #[expect(
            clippy::indexing_slicing,
            reason = "we just found or created the descriptor at this index"
        )]
        let descriptor = &mut self.descriptors[slab_index];

        descriptor.materialize(&self.slot_layout);
        descriptor.set_next_free_slab(self.free_slab_head);
        self.free_slab_head = Some(slab_index);

        debug!(
            slab_index,
            capacity = self.capacity(),
            item_size = self.item_size(),
            "materialized slab"
        );

        #[cfg(debug_assertions)]
        self.integrity_check();

        slab_index
    }

    /// Releases the memory of an empty slab and rebuilds the free-slab list without it.
    ///
    /// The free-slab list is singly linked, so instead of searching for the predecessor we
    /// re-thread every slab that has a vacant slot, in collection order.
    fn deallocate_descriptor(&mut self, slab_index: usize) {
        #[expect(
            clippy::indexing_slicing,
            reason = "only called with the index of a slab we just deallocated from"
        )]
        let descriptor = &mut self.descriptors[slab_index];

        assert!(
            descriptor.is_empty(),
            "attempted to release slab {slab_index} which still has {} allocated items",
            descriptor.count()
        );

        descriptor.release(&self.slot_layout);
        descriptor.set_next_free_slab(None);

        self.relink_free_slabs();

        debug!(slab_index, capacity = self.capacity(), "released slab");

        #[cfg(debug_assertions)]
        self.integrity_check();
    }

    #[cfg_attr(test, mutants::skip)] // Mutations here corrupt the free-slab list, caught by integrity checks only.
    fn relink_free_slabs(&mut self) {
        let mut next = None;

        // Walk backwards so that the list ends up in collection order.
        for (slab_index, descriptor) in self.descriptors.iter_mut().enumerate().rev() {
            if descriptor.has_free_item() {
                descriptor.set_next_free_slab(next);
                next = Some(slab_index);
            } else {
                descriptor.set_next_free_slab(None);
            }
        }

        self.free_slab_head = next;
    }

    /// Pointers to all live allocations, grouped by slab and in ascending slot order.
    pub(crate) fn allocated_items(&self) -> impl Iterator<Item = NonNull<u8>> + '_ {
        self.descriptors.iter().flat_map(|descriptor| {
            descriptor
                .allocated_items()
                .map(|item_index| descriptor.item_ptr(item_index, &self.slot_layout))
        })
    }

    /// Verifies every slab and the free-slab list.
    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(debug_assertions)]
    pub(crate) fn integrity_check(&self) {
        for descriptor in &self.descriptors {
            descriptor.integrity_check(&self.slot_layout);
        }

        let mut linked = vec![false; self.descriptors.len()];
        let mut cursor = self.free_slab_head;

        while let Some(slab_index) = cursor {
            let descriptor = self
                .descriptors
                .get(slab_index)
                .expect("free-slab list points to a slab that does not exist");

            assert!(
                descriptor.has_free_item(),
                "free-slab list contains slab {slab_index} which has no vacant slot"
            );

            let seen = linked
                .get_mut(slab_index)
                .expect("index was checked against the descriptor collection above");
            assert!(!*seen, "free-slab list visits slab {slab_index} twice");
            *seen = true;

            cursor = descriptor.next_free_slab();
        }

        for (slab_index, descriptor) in self.descriptors.iter().enumerate() {
            assert_eq!(
                linked.get(slab_index).copied(),
                Some(descriptor.has_free_item()),
                "slab {slab_index} with a vacant slot is missing from the free-slab list"
            );
        }

        assert_eq!(
            self.count,
            self.descriptors
                .iter()
                .map(SlabDescriptor::count)
                .sum::<usize>(),
            "pool count does not match the sum of slab counts"
        );
    }
}

impl<const ELEMENT_COUNT: usize> Drop for PoolContainer<ELEMENT_COUNT> {
    fn drop(&mut self) {
        let original_count = self.count;

        for descriptor in &mut self.descriptors {
            descriptor.release(&self.slot_layout);
        }

        self.count = 0;

        // We do this check at the end so we clean up the memory first.
        //
        // If we are already panicking, we do not want to panic again because that will
        // simply obscure whatever the original panic was, leading to debug difficulties.
        if !thread::panicking() && matches!(self.drop_policy, DropPolicy::MustNotDropItems) {
            assert!(
                original_count == 0,
                "dropped a PoolContainer with {original_count} live allocations - this is forbidden by DropPolicy::MustNotDropItems"
            );
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::indexing_slicing,
    clippy::cast_possible_truncation,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use std::collections::HashSet;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    type Pool = PoolContainer<64>;

    assert_impl_all!(Pool: Send, std::fmt::Debug);
    assert_not_impl_any!(Pool: Sync);

    #[test]
    fn item_size_is_not_rounded_to_pointer_multiple() {
        assert_eq!(Pool::new(12).item_size(), 12);
        assert_eq!(Pool::new(20).item_size(), 20);
        assert_eq!(Pool::new(8).item_size(), 8);
        assert_eq!(Pool::new(0).item_size(), size_of::<usize>());
    }

    #[test]
    fn odd_item_size_slots_are_packed_and_recycled() {
        let mut pool = Pool::new(12);

        let pointers = (0..64).map(|_| pool.do_allocate()).collect::<Vec<_>>();
        assert_eq!(pool.capacity(), 64);

        for (index, pair) in pointers.windows(2).enumerate() {
            let [first, second] = pair else {
                unreachable!("windows(2) yields pairs");
            };

            assert_eq!(
                second.as_ptr().addr() - first.as_ptr().addr(),
                12,
                "slots {index} and {} are not adjacent",
                index + 1
            );
        }

        // Every slot can hold 12 bytes without disturbing its neighbors.
        for (index, ptr) in pointers.iter().enumerate() {
            unsafe { ptr.write_bytes(index as u8, 12) };
        }

        // Free every other slot, which puts links at 4-byte-aligned addresses.
        for ptr in pointers.iter().skip(1).step_by(2) {
            pool.do_deallocate(*ptr);
        }

        for (index, ptr) in pointers.iter().enumerate().step_by(2) {
            let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), 12) };
            assert!(bytes.iter().all(|byte| *byte == index as u8));
        }

        let reused = (0..32).map(|_| pool.do_allocate()).collect::<HashSet<_>>();
        let freed = pointers
            .iter()
            .skip(1)
            .step_by(2)
            .copied()
            .collect::<HashSet<_>>();
        assert_eq!(reused, freed);
        assert_eq!(pool.capacity(), 64);

        for ptr in pointers {
            pool.do_deallocate(ptr);
        }

        assert!(pool.is_empty());
        assert_eq!(pool.capacity(), 0);
    }

    #[test]
    fn is_allocated_at_checks_the_slot_bit() {
        let mut pool = Pool::new(8);

        let first = pool.allocate_item();
        let second = pool.allocate_item();

        assert!(pool.is_allocated_at(first));
        assert!(pool.is_allocated_at(second));
        assert!(!pool.is_allocated_at(Address::from_parts(0, 2)));

        // No such slab.
        assert!(!pool.is_allocated_at(Address::from_parts(5, 0)));

        pool.deallocate_address(first);
        assert!(!pool.is_allocated_at(first));
        assert!(pool.is_allocated_at(second));

        // The slab is released with its last item.
        pool.deallocate_address(second);
        assert!(!pool.is_allocated_at(second));
        assert!(!pool.is_allocated_at(Address::from_parts(0, 0)));
    }

    #[test]
    fn smoke_test() {
        let mut pool = Pool::new(8);

        assert_eq!(pool.count(), 0);
        assert!(pool.is_empty());
        assert_eq!(pool.capacity(), 0);

        let a = pool.do_allocate();
        let b = pool.do_allocate();
        let c = pool.do_allocate();

        unsafe {
            a.cast::<u64>().write(1);
            b.cast::<u64>().write(2);
            c.cast::<u64>().write(3);
        }

        assert_eq!(pool.count(), 3);
        assert_eq!(pool.capacity(), 64);

        pool.do_deallocate(b);
        let d = pool.do_allocate();
        assert_eq!(d, b);

        unsafe {
            assert_eq!(a.cast::<u64>().read(), 1);
            assert_eq!(c.cast::<u64>().read(), 3);
        }

        pool.do_deallocate(a);
        pool.do_deallocate(c);
        pool.do_deallocate(d);

        assert!(pool.is_empty());
        assert_eq!(pool.capacity(), 0);
        pool.integrity_check();
    }

    #[test]
    fn addresses_fill_slab_in_order() {
        let mut pool = Pool::new(8);

        for expected in 0..64 {
            assert_eq!(pool.allocate_item().get(), expected);
        }

        // The next allocation comes from a new slab.
        let next = pool.allocate_item();
        assert_eq!(next.slab_index(), 1);
        assert_eq!(next.item_index(), 0);

        pool.integrity_check();
    }

    #[test]
    fn item_ptr_matches_do_allocate() {
        let mut pool = Pool::new(16);

        let address = pool.allocate_item();
        let ptr = pool.item_ptr(address);

        assert_eq!(pool.find_pool(ptr), Some(address));
        assert!(pool.is_allocated(ptr));

        pool.deallocate_address(address);
        assert!(!pool.is_allocated(ptr));
    }

    #[test]
    fn full_slab_leaves_and_rejoins_free_slab_list() {
        let mut pool = Pool::new(8);

        let first_slab = (0..64).map(|_| pool.allocate_item()).collect::<Vec<_>>();
        assert_eq!(pool.free_slab_head, None);

        let spill = pool.allocate_item();
        assert_eq!(spill.slab_index(), 1);
        assert_eq!(pool.free_slab_head, Some(1));

        // Freeing from the full slab puts it at the head of the free-slab list.
        pool.deallocate_address(first_slab[10]);
        assert_eq!(pool.free_slab_head, Some(0));
        pool.integrity_check();

        // The freed slot is reused before anything in slab 1.
        assert_eq!(pool.allocate_item(), first_slab[10]);
        assert_eq!(pool.free_slab_head, Some(1));
        pool.integrity_check();
    }

    #[test]
    fn empty_slab_is_released_and_descriptor_reused() {
        let mut pool = Pool::new(8);

        let first_slab = (0..64).map(|_| pool.allocate_item()).collect::<Vec<_>>();
        let second_slab = (0..64).map(|_| pool.allocate_item()).collect::<Vec<_>>();
        let third = pool.allocate_item();

        assert_eq!(pool.capacity(), 192);
        assert_eq!(third.slab_index(), 2);

        for address in first_slab {
            pool.deallocate_address(address);
        }

        assert_eq!(pool.capacity(), 128);
        assert_eq!(pool.descriptors.len(), 3);
        assert!(!pool.descriptors[0].is_materialized());
        pool.integrity_check();

        // Slab 2 still has room, so we allocate from it.
        assert_eq!(pool.allocate_item().slab_index(), 2);

        // Filling slab 2 forces a new slab, which reuses descriptor 0.
        while pool.free_slab_head.is_some() {
            _ = pool.allocate_item();
        }

        let recycled = pool.allocate_item();
        assert_eq!(recycled.slab_index(), 0);
        assert_eq!(pool.descriptors.len(), 3);
        assert_eq!(pool.capacity(), 192);
        pool.integrity_check();

        for address in second_slab {
            pool.deallocate_address(address);
        }

        assert_eq!(pool.capacity(), 128);
        pool.integrity_check();
    }

    #[test]
    fn free_slab_list_is_rebuilt_in_collection_order() {
        let mut pool = Pool::new(8);

        let slabs = (0..3)
            .map(|_| (0..64).map(|_| pool.allocate_item()).collect::<Vec<_>>())
            .collect::<Vec<_>>();

        // Open a vacancy in slab 2, then in slab 0. Slab 0 is now the head.
        pool.deallocate_address(slabs[2][0]);
        pool.deallocate_address(slabs[0][0]);
        assert_eq!(pool.free_slab_head, Some(0));

        // Empty slab 1 entirely, triggering a rebuild of the free-slab list.
        for &address in &slabs[1] {
            pool.deallocate_address(address);
        }

        assert_eq!(pool.free_slab_head, Some(0));
        assert_eq!(pool.descriptors[0].next_free_slab(), Some(2));
        assert_eq!(pool.descriptors[2].next_free_slab(), None);
        pool.integrity_check();
    }

    #[test]
    fn find_pool_rejects_foreign_pointers() {
        let mut pool = Pool::new(8);
        let ptr = pool.do_allocate();

        let mut local = 0_u64;
        let foreign = NonNull::from(&mut local).cast::<u8>();

        assert_eq!(pool.find_pool(foreign), None);
        assert!(!pool.is_allocated(foreign));
        assert_eq!(
            pool.try_deallocate(foreign),
            Err(Error::ForeignPointer {
                address: foreign.as_ptr().addr()
            })
        );

        // One past the end of the slab buffer is not part of it.
        let past_end = unsafe { ptr.add(64 * 8) };
        assert_eq!(pool.find_pool(past_end), None);

        pool.do_deallocate(ptr);
    }

    #[test]
    fn find_pool_maps_interior_pointer_to_slot() {
        let mut pool = Pool::new(32);

        let _first = pool.do_allocate();
        let second = pool.do_allocate();

        let interior = unsafe { second.add(17) };
        let address = pool.find_pool(interior).unwrap();

        assert_eq!(address.slab_index(), 0);
        assert_eq!(address.item_index(), 1);
    }

    #[test]
    fn try_deallocate_reports_double_free() {
        let mut pool = Pool::new(8);

        let a = pool.do_allocate();
        let b = pool.do_allocate();

        pool.try_deallocate(a).unwrap();
        assert_eq!(
            pool.try_deallocate(a),
            Err(Error::NotAllocated {
                slab_index: 0,
                item_index: 0
            })
        );

        // The failed call did not disturb the pool.
        assert_eq!(pool.count(), 1);
        pool.integrity_check();

        pool.do_deallocate(b);
    }

    #[test]
    #[should_panic]
    fn do_deallocate_foreign_pointer_panics() {
        let mut pool = Pool::new(8);
        let mut local = 0_u64;

        pool.do_deallocate(NonNull::from(&mut local).cast());
    }

    #[test]
    #[should_panic]
    fn do_deallocate_twice_panics() {
        let mut pool = Pool::new(8);

        let a = pool.do_allocate();
        let _b = pool.do_allocate();

        pool.do_deallocate(a);
        pool.do_deallocate(a);
    }

    #[test]
    #[should_panic]
    fn deallocate_item_bad_slab_panics() {
        let mut pool = Pool::new(8);
        _ = pool.allocate_item();

        pool.deallocate_item(5, 0);
    }

    #[test]
    #[should_panic]
    fn deallocate_item_bad_item_panics() {
        let mut pool = Pool::new(8);
        _ = pool.allocate_item();

        pool.deallocate_item(0, 64);
    }

    #[test]
    #[should_panic]
    fn deallocate_item_vacant_panics() {
        let mut pool = Pool::new(8);
        _ = pool.allocate_item();

        pool.deallocate_item(0, 1);
    }

    #[test]
    #[should_panic]
    fn deallocate_item_released_slab_panics() {
        let mut pool = Pool::new(8);
        let address = pool.allocate_item();
        pool.deallocate_address(address);

        pool.deallocate_address(address);
    }

    #[test]
    fn pointers_are_unique_and_aligned() {
        #[repr(C, align(32))]
        struct Aligned {
            _data: [u8; 32],
        }

        let mut pool = PoolContainer::<64>::builder()
            .layout_of::<Aligned>()
            .build();

        let pointers = (0..200).map(|_| pool.do_allocate()).collect::<Vec<_>>();
        let unique = pointers.iter().copied().collect::<HashSet<_>>();

        assert_eq!(unique.len(), pointers.len());

        for ptr in &pointers {
            assert_eq!(ptr.as_ptr().addr() % 32, 0);
            assert!(pool.is_allocated(*ptr));
        }

        for ptr in pointers {
            pool.do_deallocate(ptr);
        }

        assert_eq!(pool.capacity(), 0);
    }

    #[test]
    fn allocated_items_lists_live_slots() {
        let mut pool = Pool::new(8);

        let pointers = (0..70).map(|_| pool.do_allocate()).collect::<Vec<_>>();
        pool.do_deallocate(pointers[3]);
        pool.do_deallocate(pointers[66]);

        let live = pool.allocated_items().collect::<HashSet<_>>();

        assert_eq!(live.len(), 68);
        assert!(!live.contains(&pointers[3]));
        assert!(!live.contains(&pointers[66]));
        assert!(live.contains(&pointers[0]));
        assert!(live.contains(&pointers[69]));
    }

    #[test]
    fn drop_with_live_allocations_releases_memory() {
        let mut pool = Pool::new(8);

        for _ in 0..100 {
            _ = pool.do_allocate();
        }

        drop(pool);
    }

    #[test]
    fn drop_when_empty_does_not_panic_if_policy_must_not_drop() {
        let mut pool = PoolContainer::<64>::builder()
            .item_size(8)
            .drop_policy(DropPolicy::MustNotDropItems)
            .build();

        let ptr = pool.do_allocate();
        pool.do_deallocate(ptr);

        drop(pool);
    }

    #[test]
    #[should_panic]
    fn drop_with_live_allocations_panics_if_policy_must_not_drop() {
        let mut pool = PoolContainer::<64>::builder()
            .item_size(8)
            .drop_policy(DropPolicy::MustNotDropItems)
            .build();

        _ = pool.do_allocate();

        drop(pool);
    }

    #[test]
    fn slab_capacity_is_element_count() {
        assert_eq!(PoolContainer::<64>::new(8).slab_capacity(), 64);
        assert_eq!(PoolContainer::<4096>::new(8).slab_capacity(), 4096);
        assert_eq!(
            PoolContainer::<DEFAULT_ELEMENT_COUNT>::new(8).slab_capacity(),
            DEFAULT_ELEMENT_COUNT
        );
    }

    #[test]
    fn works_behind_mutex_across_threads() {
        use std::sync::{Arc, Mutex};

        let pool = Arc::new(Mutex::new(Pool::new(8)));

        let address = pool.lock().unwrap().allocate_item().get();

        let pool_clone = Arc::clone(&pool);
        thread::spawn(move || {
            let mut pool = pool_clone.lock().unwrap();
            pool.deallocate_address(Address::from_raw(address));
            _ = pool.allocate_item();
        })
        .join()
        .unwrap();

        assert_eq!(pool.lock().unwrap().count(), 1);
    }
}
