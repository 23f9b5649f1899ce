//! Integration tests exercising the public API of `slab_pool`.

use std::cell::Cell;
use std::collections::HashSet;
use std::ptr::NonNull;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::thread;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use slab_pool::{DropPolicy, Error, PoolContainer, TypedPool};

const ELEMENT_COUNT: usize = 64;

type Pool = PoolContainer<ELEMENT_COUNT>;

#[test]
fn allocations_are_unique_and_within_pool() {
    let mut pool = Pool::new(16);

    let pointers = (0..1000).map(|_| pool.do_allocate()).collect::<Vec<_>>();
    let unique = pointers.iter().copied().collect::<HashSet<_>>();

    assert_eq!(unique.len(), pointers.len());

    for &ptr in &pointers {
        assert!(pool.find_pool(ptr).is_some());
        assert!(pool.is_allocated(ptr));
    }

    for ptr in pointers {
        pool.do_deallocate(ptr);
    }

    assert!(pool.is_empty());
}

#[test]
fn deallocated_slot_is_reused_first() {
    let mut pool = Pool::new(8);

    let a = pool.do_allocate();
    let b = pool.do_allocate();

    pool.do_deallocate(a);
    let c = pool.do_allocate();

    assert_eq!(c, a);
    assert_eq!(pool.capacity(), ELEMENT_COUNT);

    pool.do_deallocate(b);
    pool.do_deallocate(c);
}

#[test]
fn grows_by_one_slab_when_full() {
    let mut pool = Pool::new(8);

    let mut pointers = (0..ELEMENT_COUNT)
        .map(|_| pool.do_allocate())
        .collect::<Vec<_>>();
    assert_eq!(pool.capacity(), ELEMENT_COUNT);

    pointers.push(pool.do_allocate());
    assert_eq!(pool.capacity(), 2 * ELEMENT_COUNT);

    for ptr in pointers {
        pool.do_deallocate(ptr);
    }
}

#[test]
fn shrinks_when_slab_becomes_empty() {
    let mut pool = Pool::new(8);

    let first = (0..ELEMENT_COUNT)
        .map(|_| pool.allocate_item())
        .collect::<Vec<_>>();

    for address in first {
        pool.deallocate_address(address);
    }

    assert_eq!(pool.capacity(), 0);
    assert_eq!(pool.count(), 0);

    // The released descriptor is reused, so the next allocation lands in slab 0 again.
    let again = pool.allocate_item();
    assert_eq!(again.slab_index(), 0);
    assert_eq!(again.item_index(), 0);

    pool.deallocate_address(again);
}

#[test]
fn concrete_grow_and_shrink_scenario() {
    let mut pool = Pool::new(8);

    let full = (0..64).map(|_| pool.do_allocate()).collect::<Vec<_>>();
    assert_eq!(pool.capacity(), 64);
    assert_eq!(pool.count(), 64);

    let extra = pool.do_allocate();
    assert_eq!(pool.capacity(), 128);
    assert_eq!(pool.count(), 65);

    pool.do_deallocate(extra);
    assert_eq!(pool.capacity(), 64);
    assert_eq!(pool.count(), 64);

    for ptr in full {
        pool.do_deallocate(ptr);
    }

    assert_eq!(pool.capacity(), 0);
}

#[test]
fn random_interleaving_conserves_count() {
    let mut rng = SmallRng::seed_from_u64(42);
    let mut pool = Pool::new(24);
    let mut live: Vec<NonNull<u8>> = Vec::new();

    let mut allocations = 0_usize;
    let mut deallocations = 0_usize;

    for step in 0..20_000_usize {
        // Bias towards allocation in the first half and towards deallocation in the second,
        // so the pool both grows across many slabs and shrinks back.
        let allocate_probability = if step < 10_000 { 0.6 } else { 0.4 };

        if live.is_empty() || rng.random_bool(allocate_probability) {
            let ptr = pool.do_allocate();

            // Stamp each slot so that we can detect overlapping allocations.
            // SAFETY: The slot is 24 bytes and aligned for usize.
            unsafe { ptr.cast::<usize>().write(step) };

            live.push(ptr);
            allocations += 1;
        } else {
            let index = rng.random_range(0..live.len());
            let ptr = live.swap_remove(index);

            assert!(pool.is_allocated(ptr));
            pool.do_deallocate(ptr);
            assert!(!pool.is_allocated(ptr));

            deallocations += 1;
        }

        assert_eq!(pool.count(), allocations - deallocations);
        assert_eq!(pool.count(), live.len());
        assert!(pool.count() <= pool.capacity());
    }

    let stamps = live
        .iter()
        // SAFETY: Every live slot was stamped when it was allocated.
        .map(|ptr| unsafe { ptr.cast::<usize>().read() })
        .collect::<HashSet<_>>();
    assert_eq!(stamps.len(), live.len());

    for ptr in live {
        pool.do_deallocate(ptr);
    }

    assert_eq!(pool.count(), 0);
    assert_eq!(pool.capacity(), 0);
}

#[test]
fn validity_query_tracks_lifecycle() {
    let mut pool = Pool::new(8);
    let mut local = 0_u64;
    let foreign = NonNull::from(&mut local).cast::<u8>();

    assert!(!pool.is_allocated(foreign));

    let ptr = pool.do_allocate();
    let keep = pool.do_allocate();
    assert!(pool.is_allocated(ptr));
    assert!(pool.is_allocated(ptr));
    assert!(!pool.is_allocated(foreign));

    pool.do_deallocate(ptr);
    assert!(!pool.is_allocated(ptr));
    assert!(!pool.is_allocated(ptr));

    pool.do_deallocate(keep);

    // The slab is gone entirely, so the pointer is no longer even inside the pool.
    assert!(!pool.is_allocated(keep));
    assert_eq!(pool.find_pool(keep), None);
}

#[test]
fn try_deallocate_reports_errors() {
    let mut pool = Pool::new(8);
    let mut local = 0_u64;
    let foreign = NonNull::from(&mut local).cast::<u8>();

    assert!(matches!(
        pool.try_deallocate(foreign),
        Err(Error::ForeignPointer { .. })
    ));

    let a = pool.do_allocate();
    let b = pool.do_allocate();

    assert_eq!(pool.try_deallocate(a), Ok(()));
    assert_eq!(
        pool.try_deallocate(a),
        Err(Error::NotAllocated {
            slab_index: 0,
            item_index: 0,
        })
    );

    assert_eq!(pool.try_deallocate(b), Ok(()));
    assert!(pool.is_empty());
}

#[test]
fn default_element_count_pool() {
    let mut pool: PoolContainer = PoolContainer::new(8);

    let ptr = pool.do_allocate();
    assert_eq!(pool.capacity(), slab_pool::DEFAULT_ELEMENT_COUNT);
    assert_eq!(pool.slab_capacity(), slab_pool::DEFAULT_ELEMENT_COUNT);

    pool.do_deallocate(ptr);
}

#[test]
fn typed_pool_drops_each_value_once() {
    struct Tracked(Rc<Cell<usize>>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    let drops = Rc::new(Cell::new(0));
    let mut pool = TypedPool::<Tracked, ELEMENT_COUNT>::new();

    let pointers = (0..150)
        .map(|_| pool.insert(Tracked(Rc::clone(&drops))))
        .collect::<Vec<_>>();

    for &ptr in &pointers[..50] {
        // SAFETY: Each pointer came from this pool and is removed only once.
        unsafe { pool.deallocate(ptr) };
    }

    assert_eq!(drops.get(), 50);
    assert_eq!(pool.len(), 100);

    drop(pool);
    assert_eq!(drops.get(), 150);
}

#[test]
#[should_panic]
fn typed_pool_must_not_drop_items_panics() {
    let mut pool =
        TypedPool::<String, ELEMENT_COUNT>::with_drop_policy(DropPolicy::MustNotDropItems);
    _ = pool.insert("leaked".to_string());

    drop(pool);
}

#[test]
fn pool_can_be_shared_behind_mutex() {
    let pool = Arc::new(Mutex::new(Pool::new(8)));

    let handles = (0..4)
        .map(|_| {
            let pool = Arc::clone(&pool);

            thread::spawn(move || {
                for _ in 0..100 {
                    let address = pool.lock().unwrap().allocate_item();
                    pool.lock().unwrap().deallocate_address(address);
                }

                let address = pool.lock().unwrap().allocate_item();
                address.get()
            })
        })
        .collect::<Vec<_>>();

    let addresses = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect::<HashSet<_>>();

    assert_eq!(addresses.len(), 4);
    assert_eq!(pool.lock().unwrap().count(), 4);
}

#[test]
fn pool_can_move_between_threads() {
    let mut pool = Pool::new(8);
    let address = pool.allocate_item();

    let pool = thread::spawn(move || {
        pool.deallocate_address(address);
        pool
    })
    .join()
    .unwrap();

    assert!(pool.is_empty());
}
