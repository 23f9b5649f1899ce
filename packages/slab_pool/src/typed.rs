use std::marker::PhantomData;
use std::mem::{self, MaybeUninit};
use std::ptr::{self, NonNull};
use std::thread;

use crate::{Address, DEFAULT_ELEMENT_COUNT, DropPolicy, PoolContainer};

/// A pool of values of type `T`, backed by a [`PoolContainer`].
///
/// Where the raw container hands out uninitialized bytes, the typed pool constructs a value
/// in every slot it allocates and drops the value again when the slot is returned. Values
/// still in the pool when it is dropped are dropped along with it, unless the pool was
/// created with [`DropPolicy::MustNotDropItems`].
///
/// # Examples
///
/// ```
/// use slab_pool::TypedPool;
///
/// let mut pool = TypedPool::<String, 64>::new();
///
/// let greeting = pool.insert("hello".to_string());
/// // SAFETY: The pointer refers to a live value and nothing else accesses it.
/// unsafe { (*greeting.as_ptr()).push_str(" world") };
///
/// // SAFETY: The pointer came from this pool and has not been removed yet.
/// let value = unsafe { pool.remove(greeting) };
/// assert_eq!(value, "hello world");
/// assert!(pool.is_empty());
/// ```
#[derive(Debug)]
pub struct TypedPool<T, const ELEMENT_COUNT: usize = DEFAULT_ELEMENT_COUNT> {
    // The container itself never drops anything; we drop values ourselves and then let it
    // release the memory.
    container: PoolContainer<ELEMENT_COUNT>,

    drop_policy: DropPolicy,

    _values: PhantomData<T>,
}

impl<T, const ELEMENT_COUNT: usize> TypedPool<T, ELEMENT_COUNT> {
    /// Creates an empty pool that drops any remaining values when it is dropped.
    #[must_use]
    pub fn new() -> Self {
        Self::with_drop_policy(DropPolicy::default())
    }

    /// Creates an empty pool with the given [drop policy][DropPolicy].
    ///
    /// # Examples
    ///
    /// ```
    /// use slab_pool::{DropPolicy, TypedPool};
    ///
    /// let mut pool = TypedPool::<u64, 64>::with_drop_policy(DropPolicy::MustNotDropItems);
    ///
    /// let value = pool.insert(7);
    /// // SAFETY: The pointer came from this pool and has not been removed yet.
    /// unsafe { pool.deallocate(value) };
    ///
    /// // Dropping an empty pool is fine under any policy.
    /// drop(pool);
    /// ```
    #[must_use]
    pub fn with_drop_policy(drop_policy: DropPolicy) -> Self {
        Self {
            container: PoolContainer::builder()
                .layout_of::<T>()
                .drop_policy(DropPolicy::MayDropItems)
                .build(),
            drop_policy,
            _values: PhantomData,
        }
    }

    /// Allocates a slot and initializes it with `T::default()`.
    #[must_use]
    pub fn allocate(&mut self) -> NonNull<T>
    where
        T: Default,
    {
        self.insert(T::default())
    }

    /// Moves `value` into a newly allocated slot and returns a pointer to it.
    ///
    /// The pointer stays valid until the value is removed from the pool or the pool is dropped.
    #[must_use]
    pub fn insert(&mut self, value: T) -> NonNull<T> {
        // SAFETY: The closure fully initializes the value.
        unsafe {
            self.insert_with(|uninit: &mut MaybeUninit<T>| {
                uninit.write(value);
            })
        }
    }

    /// Allocates a slot and lets `f` initialize the value in place.
    ///
    /// If `f` panics, the slot is returned to the pool before the panic propagates.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::mem::MaybeUninit;
    ///
    /// use slab_pool::TypedPool;
    ///
    /// let mut pool = TypedPool::<[u8; 256], 64>::new();
    ///
    /// // SAFETY: The closure fully initializes the array.
    /// let buffer = unsafe {
    ///     pool.insert_with(|uninit: &mut MaybeUninit<[u8; 256]>| {
    ///         uninit.write([0xAA; 256]);
    ///     })
    /// };
    ///
    /// // SAFETY: The pointer came from this pool and has not been removed yet.
    /// let value = unsafe { pool.remove(buffer) };
    /// assert!(value.iter().all(|&byte| byte == 0xAA));
    /// ```
    ///
    /// # Safety
    ///
    /// The closure must fully initialize the `MaybeUninit<T>` before returning.
    #[must_use]
    pub unsafe fn insert_with(&mut self, f: impl FnOnce(&mut MaybeUninit<T>)) -> NonNull<T> {
        let address = self.container.allocate_item();
        let ptr = self.container.item_ptr(address).cast::<MaybeUninit<T>>();

        let guard = DeallocateOnUnwind {
            container: &mut self.container,
            address,
        };

        // SAFETY: The slot was just allocated for us, is aligned for T and nobody else has
        // a reference to it. MaybeUninit<T> has no validity requirements.
        f(unsafe { &mut *ptr.as_ptr() });

        mem::forget(guard);

        ptr.cast::<T>()
    }

    /// Drops the value behind `ptr` and returns its slot to the pool.
    ///
    /// # Panics
    ///
    /// Panics if `ptr` does not point to a live value of this pool. The check happens before
    /// anything is dropped.
    ///
    /// # Safety
    ///
    /// The caller must ensure that no references to the value exist and that the pointer is
    /// not used again after this call.
    #[track_caller]
    pub unsafe fn deallocate(&mut self, ptr: NonNull<T>) {
        let address = self.live_address(ptr);

        // SAFETY: The slot is live, so it holds an initialized T, and the caller guarantees
        // there are no outstanding references to it.
        unsafe {
            ptr::drop_in_place(ptr.as_ptr());
        }

        self.container.deallocate_address(address);
    }

    /// Moves the value behind `ptr` out of the pool and returns its slot.
    ///
    /// # Panics
    ///
    /// Panics if `ptr` does not point to a live value of this pool.
    ///
    /// # Safety
    ///
    /// The caller must ensure that no references to the value exist and that the pointer is
    /// not used again after this call.
    #[must_use]
    #[track_caller]
    pub unsafe fn remove(&mut self, ptr: NonNull<T>) -> T {
        let address = self.live_address(ptr);

        // SAFETY: The slot is live, so it holds an initialized T. The slot is returned right
        // after, so the value is never observed twice.
        let value = unsafe { ptr.read() };

        self.container.deallocate_address(address);

        value
    }

    /// Whether `ptr` points to a live value of this pool.
    #[must_use]
    pub fn is_allocated(&self, ptr: NonNull<T>) -> bool {
        self.slot_address(ptr)
            .is_some_and(|address| self.container.is_allocated_at(address))
    }

    /// The number of values in the pool.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.container.count()
    }

    /// Whether the pool contains no values.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.container.is_empty()
    }

    /// The number of values the pool can hold without allocating another slab.
    #[must_use]
    #[inline]
    pub fn capacity(&self) -> usize {
        self.container.capacity()
    }

    #[track_caller]
    fn live_address(&self, ptr: NonNull<T>) -> Address<ELEMENT_COUNT> {
        let address = self
            .slot_address(ptr)
            .unwrap_or_else(|| panic!("pointer {ptr:?} does not point to a slot of this pool"));

        assert!(
            self.container.is_allocated_at(address),
            "pointer {ptr:?} points to a slot that holds no value"
        );

        address
    }

    /// The address of the slot that starts at `ptr`, if any.
    fn slot_address(&self, ptr: NonNull<T>) -> Option<Address<ELEMENT_COUNT>> {
        self.container
            .find_pool(ptr)
            .filter(|&address| self.container.item_ptr(address) == ptr.cast::<u8>())
    }
}

impl<T, const ELEMENT_COUNT: usize> Default for TypedPool<T, ELEMENT_COUNT> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const ELEMENT_COUNT: usize> Drop for TypedPool<T, ELEMENT_COUNT> {
    fn drop(&mut self) {
        if matches!(self.drop_policy, DropPolicy::MustNotDropItems) {
            // If we are already panicking, we do not want to panic again because that will
            // simply obscure whatever the original panic was, leading to debug difficulties.
            if !thread::panicking() {
                assert!(
                    self.container.is_empty(),
                    "dropped a TypedPool with {} live values - this is forbidden by DropPolicy::MustNotDropItems",
                    self.container.count()
                );
            }

            return;
        }

        if !mem::needs_drop::<T>() {
            return;
        }

        for ptr in self.container.allocated_items() {
            // SAFETY: Every allocated slot of a typed pool holds an initialized T and we are
            // the last one with access to it.
            unsafe {
                ptr::drop_in_place(ptr.cast::<T>().as_ptr());
            }
        }
    }
}

/// Returns an allocated slot to the container unless forgotten.
struct DeallocateOnUnwind<'a, const ELEMENT_COUNT: usize> {
    container: &'a mut PoolContainer<ELEMENT_COUNT>,
    address: Address<ELEMENT_COUNT>,
}

impl<const ELEMENT_COUNT: usize> Drop for DeallocateOnUnwind<'_, ELEMENT_COUNT> {
    #[cfg_attr(test, mutants::skip)] // Only reachable when a panic unwinds through insert_with().
    fn drop(&mut self) {
        self.container.deallocate_address(self.address);
    }
}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use std::cell::Cell;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::rc::Rc;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(TypedPool<u64, 64>: Send, std::fmt::Debug);
    assert_not_impl_any!(TypedPool<u64, 64>: Sync);
    assert_not_impl_any!(TypedPool<Rc<u64>, 64>: Send);

    /// Counts how many times it has been dropped.
    struct DropCounter {
        drops: Rc<Cell<usize>>,
    }

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.drops.set(self.drops.get() + 1);
        }
    }

    #[test]
    fn allocate_default_constructs() {
        let mut pool = TypedPool::<u64, 64>::new();

        let ptr = pool.allocate();
        assert_eq!(unsafe { ptr.read() }, 0);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.capacity(), 64);

        unsafe { pool.deallocate(ptr) };
        assert!(pool.is_empty());
        assert_eq!(pool.capacity(), 0);
    }

    #[test]
    fn insert_and_remove_round_trip() {
        let mut pool = TypedPool::<String, 64>::new();

        let a = pool.insert("alpha".to_string());
        let b = pool.insert("beta".to_string());

        assert!(pool.is_allocated(a));
        assert!(pool.is_allocated(b));

        assert_eq!(unsafe { pool.remove(a) }, "alpha");
        assert!(!pool.is_allocated(a));
        assert_eq!(pool.len(), 1);

        assert_eq!(unsafe { pool.remove(b) }, "beta");
        assert!(pool.is_empty());
    }

    #[test]
    fn deallocate_drops_value() {
        let drops = Rc::new(Cell::new(0));
        let mut pool = TypedPool::<DropCounter, 64>::new();

        let ptr = pool.insert(DropCounter {
            drops: Rc::clone(&drops),
        });
        assert_eq!(drops.get(), 0);

        unsafe { pool.deallocate(ptr) };
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn remove_does_not_drop_value() {
        let drops = Rc::new(Cell::new(0));
        let mut pool = TypedPool::<DropCounter, 64>::new();

        let ptr = pool.insert(DropCounter {
            drops: Rc::clone(&drops),
        });

        let value = unsafe { pool.remove(ptr) };
        assert_eq!(drops.get(), 0);

        drop(value);
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn drop_drops_remaining_values() {
        let drops = Rc::new(Cell::new(0));
        let mut pool = TypedPool::<DropCounter, 64>::new();

        let pointers = (0..100)
            .map(|_| {
                pool.insert(DropCounter {
                    drops: Rc::clone(&drops),
                })
            })
            .collect::<Vec<_>>();

        for &ptr in pointers.iter().step_by(3) {
            unsafe { pool.deallocate(ptr) };
        }

        let removed = drops.get();
        assert_eq!(removed, 34);

        drop(pool);
        assert_eq!(drops.get(), 100);
    }

    #[test]
    #[should_panic]
    fn drop_with_values_panics_if_policy_must_not_drop() {
        let mut pool = TypedPool::<u32, 64>::with_drop_policy(DropPolicy::MustNotDropItems);
        _ = pool.insert(1);

        drop(pool);
    }

    #[test]
    fn drop_with_values_does_not_drop_them_if_policy_must_not_drop() {
        let drops = Rc::new(Cell::new(0));
        let mut pool =
            TypedPool::<DropCounter, 64>::with_drop_policy(DropPolicy::MustNotDropItems);

        _ = pool.insert(DropCounter {
            drops: Rc::clone(&drops),
        });

        let result = catch_unwind(AssertUnwindSafe(move || drop(pool)));

        assert!(result.is_err());
        assert_eq!(drops.get(), 0);
    }

    #[test]
    fn insert_with_panic_returns_slot() {
        let mut pool = TypedPool::<u64, 64>::new();
        let keep = pool.insert(1);

        let result = catch_unwind(AssertUnwindSafe(|| unsafe {
            pool.insert_with(|_: &mut MaybeUninit<u64>| panic!("initialization failed"))
        }));

        assert!(result.is_err());
        assert_eq!(pool.len(), 1);
        assert!(pool.is_allocated(keep));

        // The slot that was being initialized is the next one handed out.
        let next = pool.insert(2);
        assert_eq!(next.as_ptr().addr(), keep.as_ptr().addr() + size_of::<u64>());
    }

    #[test]
    fn zero_sized_values_are_supported() {
        let mut pool = TypedPool::<(), 64>::new();

        let a = pool.insert(());
        let b = pool.insert(());
        assert_ne!(a, b);
        assert_eq!(pool.len(), 2);

        unsafe {
            pool.deallocate(a);
            pool.deallocate(b);
        }

        assert!(pool.is_empty());
    }

    #[test]
    #[should_panic]
    fn deallocate_twice_panics() {
        let mut pool = TypedPool::<u64, 64>::new();
        let a = pool.insert(1);
        let _b = pool.insert(2);

        unsafe {
            pool.deallocate(a);
            pool.deallocate(a);
        }
    }

    #[test]
    #[should_panic]
    fn deallocate_foreign_pointer_panics() {
        let mut pool = TypedPool::<u64, 64>::new();
        _ = pool.insert(1);

        let mut local = 5_u64;
        unsafe { pool.deallocate(NonNull::from(&mut local)) };
    }

    #[test]
    #[should_panic]
    fn deallocate_misaligned_interior_pointer_panics() {
        let mut pool = TypedPool::<[u64; 2], 64>::new();
        let ptr = pool.insert([1, 2]);

        let interior = unsafe { ptr.cast::<u64>().add(1).cast::<[u64; 2]>() };
        unsafe { pool.deallocate(interior) };
    }

    #[test]
    fn interior_pointer_is_not_allocated() {
        let mut pool = TypedPool::<[u64; 2], 64>::new();
        let ptr = pool.insert([1, 2]);

        let interior = unsafe { ptr.cast::<u64>().add(1).cast::<[u64; 2]>() };
        assert!(!pool.is_allocated(interior));
        assert!(pool.is_allocated(ptr));
    }

    #[test]
    fn is_allocated_follows_slot_and_slab_lifetime() {
        let mut pool = TypedPool::<u64, 64>::new();

        let mut local = 5_u64;
        assert!(!pool.is_allocated(NonNull::from(&mut local)));

        let first = pool.insert(1);
        let second = pool.insert(2);

        unsafe { pool.deallocate(first) };
        assert!(!pool.is_allocated(first));
        assert!(pool.is_allocated(second));

        // The slab is released with its last value, so the slot is no longer found at all.
        unsafe { pool.deallocate(second) };
        assert_eq!(pool.capacity(), 0);
        assert!(!pool.is_allocated(second));
    }

    #[test]
    fn default_is_empty() {
        let pool = TypedPool::<String, 64>::default();

        assert!(pool.is_empty());
        assert_eq!(pool.capacity(), 0);
    }
}
