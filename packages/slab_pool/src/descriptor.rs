use std::alloc::{Layout, alloc, dealloc, handle_alloc_error};
use std::iter;
use std::num::NonZero;
use std::ptr::NonNull;

/// Number of allocation bits stored in one word of a slab's allocation mask.
const BITS_PER_MASK_WORD: usize = u64::BITS as usize;

/// The link record stored in the raw bytes of a vacant slot.
///
/// The link is exactly one pointer wide, which is why every slot is at least that large.
/// The item index is stored offset by one so that "no next item" can use the niche of
/// [`NonZero`] instead of a reserved bit pattern.
///
/// Slots are not necessarily aligned for the link (e.g. a pool of 12-byte items), so the
/// link is always accessed with unaligned reads and writes.
#[derive(Clone, Copy, Debug)]
#[repr(transparent)]
pub(crate) struct FreeItem {
    next_free_item: Option<NonZero<usize>>,
}

impl FreeItem {
    #[must_use]
    pub(crate) fn new(next_free_item: Option<usize>) -> Self {
        Self {
            next_free_item: next_free_item.map(|index| NonZero::<usize>::MIN.saturating_add(index)),
        }
    }

    /// Index of the next vacant slot in the same slab, if any.
    #[must_use]
    pub(crate) fn next_free_item(self) -> Option<usize> {
        // Cannot wrap because the stored value is non-zero.
        self.next_free_item.map(|stored| stored.get().wrapping_sub(1))
    }
}

/// Slot geometry shared by all slabs of one container.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct SlotLayout {
    /// Layout the container was configured with, before any padding.
    item_layout: Layout,

    /// Distance in bytes between two consecutive slots: the item size, raised to the size
    /// of a [`FreeItem`] if smaller and padded to a multiple of the item alignment.
    item_size: NonZero<usize>,

    /// Layout of the raw buffer backing one materialized slab.
    buffer_layout: Layout,
}

impl SlotLayout {
    /// Calculates the slot geometry for `element_count` items of `item_layout`.
    ///
    /// # Panics
    ///
    /// Panics if the buffer of one slab would exceed the size of virtual memory.
    #[must_use]
    pub(crate) fn calculate(item_layout: Layout, element_count: NonZero<usize>) -> Self {
        let slot_layout = Layout::from_size_align(
            item_layout.size().max(size_of::<FreeItem>()),
            item_layout.align(),
        )
        .expect("slot size is at most the item size or one pointer, both valid for the alignment")
        .pad_to_align();

        let item_size = NonZero::new(slot_layout.size())
            .expect("a slot is always at least as large as the free item link");

        let buffer_size = item_size
            .get()
            .checked_mul(element_count.get())
            .expect("slab buffer size exceeds size of virtual memory");

        // The buffer itself is at least pointer-aligned, so slots of pointer-multiple size
        // are pointer-aligned even if the item layout did not ask for it.
        let buffer_layout = Layout::from_size_align(
            buffer_size,
            slot_layout.align().max(align_of::<FreeItem>()),
        )
        .expect("slab buffer size exceeds size of virtual memory");

        Self {
            item_layout,
            item_size,
            buffer_layout,
        }
    }

    #[must_use]
    pub(crate) fn item_layout(&self) -> Layout {
        self.item_layout
    }

    #[must_use]
    pub(crate) fn item_size(&self) -> NonZero<usize> {
        self.item_size
    }

    #[must_use]
    pub(crate) fn buffer_layout(&self) -> Layout {
        self.buffer_layout
    }
}

/// Describes one fixed-capacity slab of a [`PoolContainer`][crate::PoolContainer].
///
/// The descriptor may or may not be backed by a raw buffer. A descriptor without a buffer
/// is a recyclable entry in the container's collection of descriptors.
///
/// Vacant slots of a materialized slab form an intrusive singly linked list: the bytes
/// of each vacant slot hold a [`FreeItem`] pointing at the next vacant slot. A parallel
/// bitmap records which slots are allocated, so that validity can be checked without
/// ever reading from an allocated slot.
///
/// The descriptor does not know its own geometry, the container passes its [`SlotLayout`]
/// to every operation that touches the buffer. The buffer is not released when the
/// descriptor is dropped; that is the job of [`release()`](Self::release).
#[derive(Debug)]
pub(crate) struct SlabDescriptor<const ELEMENT_COUNT: usize> {
    /// Bit `i` is set if item `i` is allocated.
    mask: Box<[u64]>,

    /// Base of the buffer holding `ELEMENT_COUNT` slots, `None` if not materialized.
    data: Option<NonNull<u8>>,

    /// Number of allocated items, always equal to the number of bits set in `mask`.
    count: usize,

    /// Head of the intrusive free list. `None` if the slab is full or not materialized.
    next_free_item: Option<usize>,

    /// Next slab in the container's list of slabs with vacant slots.
    next_free_slab: Option<usize>,
}

impl<const ELEMENT_COUNT: usize> SlabDescriptor<ELEMENT_COUNT> {
    #[expect(
        clippy::integer_division,
        reason = "ELEMENT_COUNT is a multiple of the mask word size"
    )]
    const MASK_WORDS: usize = ELEMENT_COUNT / BITS_PER_MASK_WORD;

    /// Creates a descriptor that is not backed by a buffer.
    #[must_use]
    pub(crate) fn new() -> Self {
        const {
            assert!(
                ELEMENT_COUNT >= BITS_PER_MASK_WORD && ELEMENT_COUNT.is_power_of_two(),
                "ELEMENT_COUNT must be a power of two and a multiple of 64"
            );
        }

        Self {
            mask: vec![0; Self::MASK_WORDS].into_boxed_slice(),
            data: None,
            count: 0,
            next_free_item: None,
            next_free_slab: None,
        }
    }

    /// Allocates the backing buffer and threads all slots into the free list.
    ///
    /// Allocation failure is not recoverable and aborts via [`handle_alloc_error`].
    ///
    /// # Panics
    ///
    /// Panics if the descriptor is already materialized.
    pub(crate) fn materialize(&mut self, layout: &SlotLayout) {
        assert!(
            self.data.is_none(),
            "attempted to materialize a slab that already has a buffer"
        );

        let buffer_layout = layout.buffer_layout();

        // SAFETY: The buffer layout has non-zero size because both the slot size and the
        // element count are non-zero.
        let data = unsafe { alloc(buffer_layout) };

        let Some(data) = NonNull::new(data) else {
            handle_alloc_error(buffer_layout);
        };

        self.data = Some(data);
        self.mask.fill(0);
        self.count = 0;

        for item in 0..ELEMENT_COUNT {
            // Cannot overflow because item < ELEMENT_COUNT.
            let next = item.wrapping_add(1);
            let next_free_item = (next < ELEMENT_COUNT).then_some(next);

            // SAFETY: The slot is inside the buffer we just allocated, at least as large as
            // FreeItem and not allocated, so we are free to store the link in it.
            unsafe {
                self.free_item_storage(item, layout)
                    .write_unaligned(FreeItem::new(next_free_item));
            }
        }

        self.next_free_item = Some(0);

        #[cfg(debug_assertions)]
        self.integrity_check(layout);
    }

    /// Frees the backing buffer, if any, leaving a recyclable descriptor behind.
    ///
    /// Any items still allocated in the slab are forgotten without being dropped.
    pub(crate) fn release(&mut self, layout: &SlotLayout) {
        if let Some(data) = self.data.take() {
            // SAFETY: The buffer was allocated in materialize() with this same layout,
            // which never changes during the lifetime of the container.
            unsafe {
                dealloc(data.as_ptr(), layout.buffer_layout());
            }
        }

        self.mask.fill(0);
        self.count = 0;
        self.next_free_item = None;
    }

    #[must_use]
    pub(crate) fn is_materialized(&self) -> bool {
        self.data.is_some()
    }

    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Can be mutated to infinitely growing memory use.
    pub(crate) fn count(&self) -> usize {
        self.count
    }

    #[must_use]
    pub(crate) fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Whether the slab is materialized and every slot in it is allocated.
    #[must_use]
    pub(crate) fn is_full(&self) -> bool {
        self.is_materialized() && self.next_free_item.is_none()
    }

    /// Whether the slab has at least one vacant slot, i.e. belongs in the free-slab list.
    #[must_use]
    pub(crate) fn has_free_item(&self) -> bool {
        self.next_free_item.is_some()
    }

    #[must_use]
    pub(crate) fn next_free_slab(&self) -> Option<usize> {
        self.next_free_slab
    }

    pub(crate) fn set_next_free_slab(&mut self, next_free_slab: Option<usize>) {
        self.next_free_slab = next_free_slab;
    }

    /// Splits an item index into the mask word index and the bit within that word.
    fn bit_position(item: usize) -> (usize, u64) {
        assert!(
            item < ELEMENT_COUNT,
            "item {item} index out of bounds in slab of capacity {ELEMENT_COUNT}"
        );

        (item >> 6, 1_u64 << (item & 63))
    }

    pub(crate) fn set_allocated(&mut self, item: usize) {
        let (word, bit) = Self::bit_position(item);

        #[expect(
            clippy::indexing_slicing,
            reason = "bit_position() guarantees the word is within the mask"
        )]
        {
            self.mask[word] |= bit;
        }
    }

    pub(crate) fn clear_allocated(&mut self, item: usize) {
        let (word, bit) = Self::bit_position(item);

        #[expect(
            clippy::indexing_slicing,
            reason = "bit_position() guarantees the word is within the mask"
        )]
        {
            self.mask[word] &= !bit;
        }
    }

    #[must_use]
    pub(crate) fn is_allocated(&self, item: usize) -> bool {
        let (word, bit) = Self::bit_position(item);

        #[expect(
            clippy::indexing_slicing,
            reason = "bit_position() guarantees the word is within the mask"
        )]
        let word = self.mask[word];

        word & bit != 0
    }

    /// Returns a pointer to the first byte of slot `item`.
    ///
    /// # Panics
    ///
    /// Panics if the slab is not materialized or `item` is out of bounds.
    #[must_use]
    pub(crate) fn item_ptr(&self, item: usize, layout: &SlotLayout) -> NonNull<u8> {
        assert!(
            item < ELEMENT_COUNT,
            "item {item} index out of bounds in slab of capacity {ELEMENT_COUNT}"
        );

        let data = self
            .data
            .expect("attempted to access a slot of a slab that has no buffer");

        // Cannot overflow because the whole buffer fits in virtual memory.
        let offset = item.wrapping_mul(layout.item_size().get());

        // SAFETY: The offset is within the buffer because item < ELEMENT_COUNT and the
        // buffer holds ELEMENT_COUNT slots of item_size bytes each.
        unsafe { data.add(offset) }
    }

    /// Reinterprets slot `item` as the free list link stored in it.
    ///
    /// The returned pointer may only be read or written while the slot is not allocated,
    /// and only with unaligned accesses.
    #[must_use]
    pub(crate) fn free_item_storage(&self, item: usize, layout: &SlotLayout) -> NonNull<FreeItem> {
        self.item_ptr(item, layout).cast::<FreeItem>()
    }

    /// Returns the index of the slot containing `address` if it lies within this slab's buffer.
    #[must_use]
    #[allow(
        clippy::integer_division,
        reason = "the divisor is NonZero and truncation to the containing slot is intended"
    )]
    pub(crate) fn find_item(&self, address: usize, layout: &SlotLayout) -> Option<usize> {
        let data = self.data?;

        let offset = address.checked_sub(data.as_ptr().addr())?;

        (offset < layout.buffer_layout().size()).then(|| offset / layout.item_size())
    }

    /// Takes the head of the free list, marks it allocated and returns its index.
    ///
    /// # Panics
    ///
    /// Panics if the slab has no vacant slot.
    #[must_use]
    pub(crate) fn allocate_free_item(&mut self, layout: &SlotLayout) -> usize {
        let item = self
            .next_free_item
            .expect("slab in the free-slab list must have a vacant slot");

        assert!(
            !self.is_allocated(item),
            "free list of slab points to allocated item {item}"
        );

        // SAFETY: The slot is vacant (checked above), so it holds a valid link.
        let link = unsafe { self.free_item_storage(item, layout).read_unaligned() };

        self.set_allocated(item);
        self.next_free_item = link.next_free_item();

        // Cannot overflow because the slab had a vacant slot, so count < ELEMENT_COUNT.
        self.count = self.count.wrapping_add(1);

        #[cfg(debug_assertions)]
        self.integrity_check(layout);

        item
    }

    /// Marks `item` as vacant and returns the remaining number of allocated items.
    ///
    /// If items remain, the slot is pushed to the head of the free list. If the slab
    /// became empty the free list is left alone because the caller is expected to
    /// release the buffer.
    ///
    /// # Panics
    ///
    /// Panics if `item` is out of bounds or not allocated.
    #[must_use]
    pub(crate) fn deallocate_item(&mut self, item: usize, layout: &SlotLayout) -> usize {
        assert!(
            self.is_allocated(item),
            "attempted to deallocate item {item} which is not allocated in slab of capacity {ELEMENT_COUNT}"
        );
        assert!(
            self.count > 0,
            "allocated item {item} found in slab with zero count"
        );

        self.clear_allocated(item);

        // Cannot wrap because we asserted above that count is non-zero.
        self.count = self.count.wrapping_sub(1);

        if self.count != 0 {
            // SAFETY: The slot was just marked vacant and belongs to the buffer, so we
            // are free to store the link in it.
            unsafe {
                self.free_item_storage(item, layout)
                    .write_unaligned(FreeItem::new(self.next_free_item));
            }

            self.next_free_item = Some(item);

            #[cfg(debug_assertions)]
            self.integrity_check(layout);
        }

        self.count
    }

    /// Indexes of all allocated items, in ascending order.
    pub(crate) fn allocated_items(&self) -> impl Iterator<Item = usize> + '_ {
        self.mask
            .iter()
            .enumerate()
            .flat_map(|(word_index, &word)| {
                // Cannot overflow because word_index < ELEMENT_COUNT / 64.
                let base = word_index.wrapping_mul(BITS_PER_MASK_WORD);
                let mut remaining = word;

                iter::from_fn(move || {
                    if remaining == 0 {
                        return None;
                    }

                    let bit = remaining.trailing_zeros() as usize;

                    // Clear the lowest set bit. Cannot wrap because remaining is non-zero.
                    remaining &= remaining.wrapping_sub(1);

                    Some(base.wrapping_add(bit))
                })
            })
    }

    /// Verifies the bookkeeping of the slab against the contents of its slots.
    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(debug_assertions)]
    #[allow(
        clippy::indexing_slicing,
        reason = "integrity check indexes a local array sized to the slab"
    )]
    pub(crate) fn integrity_check(&self, layout: &SlotLayout) {
        let popcount = self
            .mask
            .iter()
            .map(|word| word.count_ones() as usize)
            .sum::<usize>();

        assert_eq!(
            self.count, popcount,
            "slab count {} does not match the number of allocation bits {popcount}",
            self.count
        );

        if !self.is_materialized() {
            assert_eq!(self.count, 0, "slab without a buffer has allocated items");
            assert!(
                self.next_free_item.is_none(),
                "slab without a buffer has a free list"
            );
            return;
        }

        let mut visited = vec![false; ELEMENT_COUNT];
        let mut free_items = 0_usize;
        let mut cursor = self.next_free_item;

        while let Some(item) = cursor {
            assert!(
                item < ELEMENT_COUNT,
                "free list points to out of bounds item {item} in slab of capacity {ELEMENT_COUNT}"
            );
            assert!(
                !self.is_allocated(item),
                "free list points to allocated item {item}"
            );
            assert!(!visited[item], "free list visits item {item} twice");

            visited[item] = true;
            free_items = free_items.wrapping_add(1);

            // SAFETY: The slot is vacant (checked above), so it holds a valid link.
            cursor = unsafe { self.free_item_storage(item, layout).read_unaligned() }
                .next_free_item();
        }

        assert_eq!(
            free_items,
            ELEMENT_COUNT.wrapping_sub(self.count),
            "free list length does not match the number of vacant slots"
        );
    }
}

// SAFETY: The descriptor exclusively owns the buffer behind its raw pointer. It does not
// share the pointer with other threads and does not rely on thread-local state, so moving
// the descriptor to another thread is sound. It is not Sync because NonNull is not.
unsafe impl<const ELEMENT_COUNT: usize> Send for SlabDescriptor<ELEMENT_COUNT> {}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::indexing_slicing,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use new_zealand::nz;
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(SlabDescriptor<64>: Send, std::fmt::Debug);
    assert_not_impl_any!(SlabDescriptor<64>: Sync);

    fn layout_of<T>() -> SlotLayout {
        SlotLayout::calculate(Layout::new::<T>(), nz!(64))
    }

    #[test]
    fn free_item_is_one_pointer_wide() {
        assert_eq!(size_of::<FreeItem>(), size_of::<usize>());
        assert_eq!(align_of::<FreeItem>(), align_of::<usize>());
    }

    #[test]
    fn free_item_round_trips_next_index() {
        assert_eq!(FreeItem::new(None).next_free_item(), None);
        assert_eq!(FreeItem::new(Some(0)).next_free_item(), Some(0));
        assert_eq!(FreeItem::new(Some(63)).next_free_item(), Some(63));
    }

    #[test]
    fn slot_is_at_least_one_pointer_wide() {
        let layout = layout_of::<u8>();

        assert_eq!(layout.item_size().get(), size_of::<usize>());
        assert_eq!(layout.buffer_layout().size(), 64 * size_of::<usize>());
        assert_eq!(layout.item_layout(), Layout::new::<u8>());
    }

    #[test]
    fn slot_respects_item_alignment() {
        #[repr(C, align(32))]
        struct Aligned {
            _data: [u8; 40],
        }

        let layout = layout_of::<Aligned>();

        assert_eq!(layout.item_size().get(), 64);
        assert_eq!(layout.buffer_layout().align(), 32);
    }

    #[test]
    fn slot_is_padded_to_item_alignment_only() {
        let layout = SlotLayout::calculate(Layout::from_size_align(12, 4).unwrap(), nz!(64));
        assert_eq!(layout.item_size().get(), 12);

        let layout = SlotLayout::calculate(Layout::from_size_align(20, 1).unwrap(), nz!(64));
        assert_eq!(layout.item_size().get(), 20);

        let layout = SlotLayout::calculate(Layout::from_size_align(10, 4).unwrap(), nz!(64));
        assert_eq!(layout.item_size().get(), 12);
    }

    #[test]
    fn buffer_is_at_least_pointer_aligned() {
        let layout = SlotLayout::calculate(Layout::from_size_align(12, 1).unwrap(), nz!(64));

        assert_eq!(layout.buffer_layout().align(), align_of::<FreeItem>());
        assert_eq!(layout.buffer_layout().size(), 64 * 12);
    }

    #[test]
    fn free_list_works_with_unaligned_slots() {
        let layout = SlotLayout::calculate(Layout::from_size_align(12, 1).unwrap(), nz!(64));
        let mut descriptor = SlabDescriptor::<64>::new();
        descriptor.materialize(&layout);

        let items = (0..64)
            .map(|_| descriptor.allocate_free_item(&layout))
            .collect::<Vec<_>>();
        assert_eq!(items, (0..64).collect::<Vec<_>>());

        // Odd slots start at 12 * odd, which is not pointer-aligned.
        for item in [1, 3, 5] {
            _ = descriptor.deallocate_item(item, &layout);
        }

        assert_eq!(descriptor.allocate_free_item(&layout), 5);
        assert_eq!(descriptor.allocate_free_item(&layout), 3);
        assert_eq!(descriptor.allocate_free_item(&layout), 1);

        descriptor.release(&layout);
    }

    #[test]
    fn new_descriptor_is_not_materialized() {
        let descriptor = SlabDescriptor::<64>::new();

        assert!(!descriptor.is_materialized());
        assert!(descriptor.is_empty());
        assert!(!descriptor.is_full());
        assert!(!descriptor.has_free_item());
        assert_eq!(descriptor.next_free_slab(), None);
    }

    #[test]
    fn materialize_threads_free_list_in_order() {
        let layout = layout_of::<u64>();
        let mut descriptor = SlabDescriptor::<64>::new();
        descriptor.materialize(&layout);

        assert!(descriptor.is_materialized());
        assert!(descriptor.has_free_item());

        for expected in 0..64 {
            assert_eq!(descriptor.allocate_free_item(&layout), expected);
        }

        assert!(descriptor.is_full());
        assert_eq!(descriptor.count(), 64);

        descriptor.release(&layout);
    }

    #[test]
    fn allocation_bits_track_items() {
        let mut descriptor = SlabDescriptor::<128>::new();

        descriptor.set_allocated(0);
        descriptor.set_allocated(63);
        descriptor.set_allocated(64);
        descriptor.set_allocated(127);

        assert!(descriptor.is_allocated(0));
        assert!(descriptor.is_allocated(63));
        assert!(descriptor.is_allocated(64));
        assert!(descriptor.is_allocated(127));
        assert!(!descriptor.is_allocated(1));
        assert!(!descriptor.is_allocated(65));

        descriptor.clear_allocated(63);
        assert!(!descriptor.is_allocated(63));
        assert!(descriptor.is_allocated(64));

        assert_eq!(
            descriptor.allocated_items().collect::<Vec<_>>(),
            vec![0, 64, 127]
        );
    }

    #[test]
    #[should_panic]
    fn bit_out_of_bounds_panics() {
        let descriptor = SlabDescriptor::<64>::new();
        _ = descriptor.is_allocated(64);
    }

    #[test]
    fn deallocated_item_is_reused_first() {
        let layout = layout_of::<u32>();
        let mut descriptor = SlabDescriptor::<64>::new();
        descriptor.materialize(&layout);

        let a = descriptor.allocate_free_item(&layout);
        let b = descriptor.allocate_free_item(&layout);
        assert_eq!((a, b), (0, 1));

        assert_eq!(descriptor.deallocate_item(a, &layout), 1);
        assert!(!descriptor.is_allocated(a));
        assert!(descriptor.is_allocated(b));

        assert_eq!(descriptor.allocate_free_item(&layout), a);
        assert_eq!(descriptor.allocate_free_item(&layout), 2);

        descriptor.release(&layout);
    }

    #[test]
    fn last_deallocation_leaves_free_list_to_caller() {
        let layout = layout_of::<u32>();
        let mut descriptor = SlabDescriptor::<64>::new();
        descriptor.materialize(&layout);

        let item = descriptor.allocate_free_item(&layout);
        assert_eq!(descriptor.deallocate_item(item, &layout), 0);
        assert!(descriptor.is_empty());

        descriptor.release(&layout);
        assert!(!descriptor.is_materialized());
        assert!(!descriptor.has_free_item());
    }

    #[test]
    #[should_panic]
    fn double_deallocate_panics() {
        let layout = layout_of::<u32>();
        let mut descriptor = SlabDescriptor::<64>::new();
        descriptor.materialize(&layout);

        let a = descriptor.allocate_free_item(&layout);
        let _b = descriptor.allocate_free_item(&layout);

        _ = descriptor.deallocate_item(a, &layout);
        _ = descriptor.deallocate_item(a, &layout);
    }

    #[test]
    #[should_panic]
    fn allocate_from_full_slab_panics() {
        let layout = layout_of::<u32>();
        let mut descriptor = SlabDescriptor::<64>::new();
        descriptor.materialize(&layout);

        for _ in 0..65 {
            _ = descriptor.allocate_free_item(&layout);
        }
    }

    #[test]
    fn item_pointers_are_strided_by_item_size() {
        let layout = layout_of::<[u64; 3]>();
        let mut descriptor = SlabDescriptor::<64>::new();
        descriptor.materialize(&layout);

        let first = descriptor.item_ptr(0, &layout).as_ptr().addr();
        let tenth = descriptor.item_ptr(10, &layout).as_ptr().addr();

        assert_eq!(tenth - first, 10 * 24);

        descriptor.release(&layout);
    }

    #[test]
    fn find_item_maps_interior_pointers_to_slot() {
        let layout = layout_of::<u64>();
        let mut descriptor = SlabDescriptor::<64>::new();
        descriptor.materialize(&layout);

        let base = descriptor.item_ptr(0, &layout).as_ptr().addr();

        assert_eq!(descriptor.find_item(base, &layout), Some(0));
        assert_eq!(descriptor.find_item(base + 8, &layout), Some(1));
        assert_eq!(descriptor.find_item(base + 8 * 63 + 7, &layout), Some(63));
        assert_eq!(descriptor.find_item(base + 8 * 64, &layout), None);
        assert_eq!(descriptor.find_item(base - 1, &layout), None);

        descriptor.release(&layout);
        assert_eq!(descriptor.find_item(base, &layout), None);
    }

    #[test]
    fn slot_memory_is_usable_while_allocated() {
        let layout = layout_of::<u64>();
        let mut descriptor = SlabDescriptor::<64>::new();
        descriptor.materialize(&layout);

        let items = (0..64)
            .map(|_| descriptor.allocate_free_item(&layout))
            .collect::<Vec<_>>();

        for &item in &items {
            unsafe {
                descriptor
                    .item_ptr(item, &layout)
                    .cast::<u64>()
                    .write(item as u64 * 3);
            }
        }

        for &item in &items {
            unsafe {
                assert_eq!(
                    descriptor.item_ptr(item, &layout).cast::<u64>().read(),
                    item as u64 * 3
                );
            }
        }

        descriptor.release(&layout);
    }

    #[test]
    fn release_resets_to_recyclable_state() {
        let layout = layout_of::<u64>();
        let mut descriptor = SlabDescriptor::<64>::new();
        descriptor.materialize(&layout);

        _ = descriptor.allocate_free_item(&layout);
        _ = descriptor.allocate_free_item(&layout);

        descriptor.release(&layout);

        assert!(!descriptor.is_materialized());
        assert!(descriptor.is_empty());
        assert_eq!(descriptor.allocated_items().count(), 0);

        // A released descriptor can be materialized again from scratch.
        descriptor.materialize(&layout);
        assert_eq!(descriptor.allocate_free_item(&layout), 0);
        descriptor.release(&layout);
    }
}
