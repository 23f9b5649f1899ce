//! Demonstrates raw slot allocation with `PoolContainer`, including how the pool grows
//! and shrinks one slab at a time.
//!
//! Slab lifecycle events are logged at debug level, so run this example to see them
//! interleaved with the output.

use std::ptr::NonNull;

use slab_pool::{Error, PoolContainer};

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    println!("=== PoolContainer Basic Usage ===");
    println!();

    let mut pool = PoolContainer::<64>::new(8);

    println!("Created pool:");
    println!("  Item size: {} bytes", pool.item_size());
    println!("  Slab capacity: {} items", pool.slab_capacity());
    println!("  Initial capacity: {}", pool.capacity());
    println!();

    // Fill exactly one slab.
    let mut pointers = (0..64).map(|_| pool.do_allocate()).collect::<Vec<_>>();

    for (index, ptr) in pointers.iter().enumerate() {
        // SAFETY: Every slot is 8 bytes large and aligned for u64.
        unsafe { ptr.cast::<u64>().write(index as u64) };
    }

    println!("After 64 allocations:");
    println!("  Count: {}", pool.count());
    println!("  Capacity: {}", pool.capacity());
    println!();

    // One more allocation does not fit and materializes a second slab.
    let extra = pool.do_allocate();

    println!("After one more allocation:");
    println!("  Count: {}", pool.count());
    println!("  Capacity: {}", pool.capacity());
    println!();

    // Returning the only item in the second slab releases that slab again.
    pool.do_deallocate(extra);

    println!("After deallocating it again:");
    println!("  Count: {}", pool.count());
    println!("  Capacity: {}", pool.capacity());
    println!();

    // A freed slot is the next one handed out.
    let freed = pointers.swap_remove(10);
    pool.do_deallocate(freed);
    let reused = pool.do_allocate();

    println!("Freed slot reused: {}", freed == reused);
    pointers.push(reused);

    // Any pointer can be checked for being a live allocation of the pool.
    let mut local = 0_u64;
    let foreign = NonNull::from(&mut local).cast::<u8>();

    println!("Pool slot is allocated: {}", pool.is_allocated(reused));
    println!("Stack variable is allocated: {}", pool.is_allocated(foreign));

    match pool.try_deallocate(foreign) {
        Ok(()) => println!("Unexpectedly deallocated a foreign pointer"),
        Err(Error::ForeignPointer { address }) => {
            println!("Rejected foreign pointer {address:#x}");
        }
        Err(error) => println!("Rejected foreign pointer: {error}"),
    }

    println!();

    for ptr in pointers {
        pool.do_deallocate(ptr);
    }

    println!("After deallocating everything:");
    println!("  Count: {}", pool.count());
    println!("  Capacity: {}", pool.capacity());
}
