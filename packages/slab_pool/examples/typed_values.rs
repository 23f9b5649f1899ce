//! Demonstrates `TypedPool`, which constructs and drops values in pool slots.

use std::mem::MaybeUninit;

use slab_pool::{DropPolicy, TypedPool};

#[derive(Debug, Default)]
struct Particle {
    position: [f32; 3],
    velocity: [f32; 3],
}

impl Drop for Particle {
    fn drop(&mut self) {
        println!("  Dropping particle at {:?}", self.position);
    }
}

fn main() {
    println!("=== TypedPool Usage ===");
    println!();

    let mut pool = TypedPool::<Particle, 64>::new();

    // Default-constructed values.
    let resting = pool.allocate();

    // Values moved into the pool.
    let moving = pool.insert(Particle {
        position: [1.0, 2.0, 3.0],
        velocity: [0.5, 0.0, 0.0],
    });

    // In-place initialization.
    // SAFETY: The closure fully initializes the particle.
    let falling = unsafe {
        pool.insert_with(|uninit: &mut MaybeUninit<Particle>| {
            uninit.write(Particle {
                position: [0.0, 10.0, 0.0],
                velocity: [0.0, -9.8, 0.0],
            });
        })
    };

    println!("Pool holds {} particles, capacity {}", pool.len(), pool.capacity());
    println!();

    // SAFETY: No other reference to the particle exists while we update it.
    unsafe {
        let particle = &mut *moving.as_ptr();

        for (position, velocity) in particle.position.iter_mut().zip(particle.velocity) {
            *position += velocity;
        }
    }

    println!("Removing the moving particle:");
    // SAFETY: The pointer came from this pool and is removed only once.
    let particle = unsafe { pool.remove(moving) };
    println!("  Removed {particle:?}");
    drop(particle);
    println!();

    println!("Deallocating the resting particle:");
    // SAFETY: The pointer came from this pool and is removed only once.
    unsafe { pool.deallocate(resting) };
    println!();

    println!("Is the falling particle still allocated? {}", pool.is_allocated(falling));
    println!();

    println!("Dropping the pool with one particle left:");
    drop(pool);
    println!();

    // A pool that insists on being emptied before it is dropped.
    let mut strict = TypedPool::<Particle, 64>::with_drop_policy(DropPolicy::MustNotDropItems);
    let particle = strict.allocate();

    println!("Emptying the strict pool before dropping it:");
    // SAFETY: The pointer came from this pool and is removed only once.
    unsafe { strict.deallocate(particle) };
    drop(strict);
}
