use std::alloc::Layout;
use std::cell::Cell;
use std::marker::PhantomData;

use crate::{DropPolicy, PoolContainer};

/// Builder for creating an instance of [`PoolContainer`].
///
/// The container needs to know the size of its items at construction time. Use
/// `.item_size()` to provide a raw byte count, `.layout()` to provide a specific layout or
/// `.layout_of::<T>()` to use the layout of a type.
///
/// The item size is mandatory, whereas other settings are optional. Sizes smaller than
/// one pointer are rounded up, because vacant slots store a free list link.
///
/// # Examples
///
/// Using a raw item size:
///
/// ```
/// use slab_pool::PoolContainer;
///
/// let pool = PoolContainer::<64>::builder().item_size(24).build();
/// assert_eq!(pool.item_size(), 24);
/// ```
///
/// Using type-based layout:
///
/// ```
/// use slab_pool::PoolContainer;
///
/// let pool = PoolContainer::<64>::builder().layout_of::<u128>().build();
/// assert_eq!(pool.item_size(), size_of::<u128>());
/// ```
///
/// # Thread safety
///
/// The builder is thread-mobile ([`Send`]) and can be safely transferred between threads,
/// allowing pool configuration to happen on different threads than where the pool is used.
/// However, it is not thread-safe ([`Sync`]) as it contains mutable configuration state.
#[derive(Debug)]
#[must_use]
pub struct PoolContainerBuilder<const ELEMENT_COUNT: usize> {
    item_layout: Option<Layout>,
    drop_policy: DropPolicy,

    // Prevents Sync while allowing Send - builders are thread-mobile but not thread-safe
    _not_sync: PhantomData<Cell<()>>,
}

impl<const ELEMENT_COUNT: usize> PoolContainerBuilder<ELEMENT_COUNT> {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            item_layout: None,
            drop_policy: DropPolicy::default(),
            _not_sync: PhantomData,
        }
    }

    /// Sets the size in bytes of each item, without any alignment requirement.
    ///
    /// The slot stride is exactly `size`, or one pointer if `size` is smaller. The slab
    /// buffer is pointer-aligned, so slots are pointer-aligned whenever `size` is a multiple
    /// of the pointer width. Use [`layout()`](Self::layout) to request a specific alignment.
    ///
    /// # Panics
    ///
    /// Panics if `size` exceeds `isize::MAX`.
    ///
    /// # Examples
    ///
    /// ```
    /// use slab_pool::PoolContainer;
    ///
    /// // Sizes below one pointer width are clamped up.
    /// let pool = PoolContainer::<64>::builder().item_size(1).build();
    /// assert_eq!(pool.item_size(), size_of::<usize>());
    ///
    /// // Larger sizes are used as-is.
    /// let pool = PoolContainer::<64>::builder().item_size(12).build();
    /// assert_eq!(pool.item_size(), 12);
    /// ```
    #[inline]
    pub fn item_size(mut self, size: usize) -> Self {
        let layout =
            Layout::from_size_align(size, 1).expect("item size must not exceed isize::MAX");
        self.item_layout = Some(layout);
        self
    }

    /// Sets the memory layout of the items stored in the pool.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::alloc::Layout;
    ///
    /// use slab_pool::PoolContainer;
    ///
    /// let layout = Layout::from_size_align(48, 16).unwrap();
    /// let pool = PoolContainer::<64>::builder().layout(layout).build();
    /// assert_eq!(pool.item_layout(), layout);
    /// ```
    #[inline]
    pub fn layout(mut self, layout: Layout) -> Self {
        self.item_layout = Some(layout);
        self
    }

    /// Sets the memory layout of the items stored in the pool based on a type.
    ///
    /// # Examples
    ///
    /// ```
    /// use slab_pool::PoolContainer;
    ///
    /// let pool = PoolContainer::<64>::builder().layout_of::<[u32; 6]>().build();
    /// assert_eq!(pool.item_size(), 24);
    /// ```
    #[inline]
    pub fn layout_of<T>(mut self) -> Self {
        self.item_layout = Some(Layout::new::<T>());
        self
    }

    /// Sets the [drop policy][DropPolicy] for the pool. This governs how
    /// to treat live allocations when the pool is dropped.
    ///
    /// # Examples
    ///
    /// ```
    /// use slab_pool::{DropPolicy, PoolContainer};
    ///
    /// let pool = PoolContainer::<64>::builder()
    ///     .layout_of::<u64>()
    ///     .drop_policy(DropPolicy::MustNotDropItems)
    ///     .build();
    /// ```
    #[inline]
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    /// Builds the pool container with the specified configuration.
    ///
    /// # Panics
    ///
    /// Panics if no item size has been set using [`item_size`](Self::item_size),
    /// [`layout`](Self::layout) or [`layout_of`](Self::layout_of).
    #[must_use]
    #[inline]
    pub fn build(self) -> PoolContainer<ELEMENT_COUNT> {
        let layout = self.item_layout.expect(
            "item size must be set using .item_size(), .layout() or .layout_of::<T>() before calling .build()",
        );

        PoolContainer::new_inner(layout, self.drop_policy)
    }
}

#[cfg(test)]
mod tests {
    use std::alloc::Layout;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    type Builder = PoolContainerBuilder<64>;

    assert_impl_all!(Builder: Send, std::fmt::Debug);
    assert_not_impl_any!(Builder: Sync);

    #[test]
    fn builder_new_creates_default_state() {
        let builder = Builder::new();
        assert!(builder.item_layout.is_none());
        assert_eq!(builder.drop_policy, DropPolicy::default());
    }

    #[test]
    fn item_size_has_no_alignment_requirement() {
        let builder = Builder::new().item_size(12);
        assert_eq!(
            builder.item_layout,
            Some(Layout::from_size_align(12, 1).unwrap())
        );
    }

    #[test]
    fn item_size_is_max_of_requested_and_pointer_width() {
        assert_eq!(Builder::new().item_size(12).build().item_size(), 12);
        assert_eq!(Builder::new().item_size(20).build().item_size(), 20);
        assert_eq!(Builder::new().item_size(7).build().item_size(), size_of::<usize>());
    }

    #[test]
    fn zero_item_size_is_clamped() {
        let pool = Builder::new().item_size(0).build();
        assert_eq!(pool.item_size(), size_of::<usize>());
    }

    #[test]
    fn layout_of_sets_layout_correctly() {
        let builder = Builder::new().layout_of::<String>();
        assert_eq!(builder.item_layout, Some(Layout::new::<String>()));
    }

    #[test]
    fn layout_can_be_overridden() {
        let builder = Builder::new()
            .layout_of::<u32>()
            .item_size(100)
            .layout(Layout::new::<u64>());

        assert_eq!(builder.item_layout, Some(Layout::new::<u64>()));
    }

    #[test]
    fn drop_policy_sets_policy_correctly() {
        let builder = Builder::new().drop_policy(DropPolicy::MustNotDropItems);
        assert_eq!(builder.drop_policy, DropPolicy::MustNotDropItems);

        let builder = builder.drop_policy(DropPolicy::MayDropItems);
        assert_eq!(builder.drop_policy, DropPolicy::MayDropItems);
    }

    #[test]
    fn build_with_layout_succeeds() {
        let layout = Layout::new::<[u64; 4]>();
        let pool = Builder::new().layout(layout).build();

        assert_eq!(pool.item_layout(), layout);
        assert_eq!(pool.item_size(), 32);
        assert_eq!(pool.count(), 0);
        assert_eq!(pool.capacity(), 0);
    }

    #[test]
    #[should_panic]
    fn build_without_layout_panics() {
        let _pool = Builder::new().build();
    }

    #[test]
    #[should_panic]
    fn build_with_only_drop_policy_panics() {
        let _pool = Builder::new()
            .drop_policy(DropPolicy::MayDropItems)
            .build();
    }

    #[test]
    fn builder_is_debug() {
        let builder = Builder::new().layout_of::<u32>();
        let debug_output = format!("{builder:?}");
        assert!(debug_output.contains("PoolContainerBuilder"));
    }

    #[test]
    fn builder_can_move_between_threads() {
        let builder = Builder::new().layout_of::<u64>();
        let handle = std::thread::spawn(move || builder.build());
        let pool = handle.join().expect("thread completed successfully");
        assert_eq!(pool.item_size(), 8);
    }
}
