//! A fixed-element-size slab pool allocator with O(1) allocation and deallocation.
//!
//! This crate provides [`PoolContainer`], a pool of equally sized raw memory slots. The pool
//! grows in fixed-capacity slabs of `ELEMENT_COUNT` slots and releases a slab's memory as soon
//! as its last allocation is returned.
//!
//! # Key Features
//!
//! - **Constant-time operations**: Allocation and deallocation never search for space
//! - **Stable addresses**: Slots never move while they are allocated
//! - **Validity queries**: Any pointer can be checked for being a live allocation of the pool
//! - **Automatic shrinking**: Empty slabs give their memory back immediately
//! - **Typed access**: [`TypedPool<T>`] constructs and drops values on top of the raw pool
//! - **Flexible drop policies**: Configure behavior when a pool is dropped with live allocations
//! - **Thread mobility**: Pools can be moved between threads (but not shared without synchronization)
//!
//! # How it works
//!
//! Each slab has a descriptor holding an allocation bitmap and the head of an intrusive free
//! list. The free list is stored in the vacant slots themselves, which is why every slot is at
//! least one pointer wide. Slabs with at least one vacant slot are chained into a free-slab
//! list, so the next allocation always comes from the head of that list.
//!
//! Descriptors of released slabs stay in the pool and are reused before the pool creates new
//! ones. Every allocation can be named by its [`Address`]: slab index times `ELEMENT_COUNT`
//! plus the index of the slot within the slab.
//!
//! # Examples
//!
//! ## Raw allocation
//!
//! ```rust
//! use slab_pool::PoolContainer;
//!
//! let mut pool = PoolContainer::<64>::new(24);
//!
//! let ptr = pool.do_allocate();
//! // SAFETY: The slot is 24 bytes large and aligned for u64.
//! unsafe { ptr.cast::<[u64; 3]>().write([1, 2, 3]) };
//!
//! assert!(pool.is_allocated(ptr));
//!
//! pool.do_deallocate(ptr);
//! assert!(pool.is_empty());
//! ```
//!
//! ## Fallible deallocation
//!
//! ```rust
//! use slab_pool::{Error, PoolContainer};
//!
//! let mut pool: PoolContainer = PoolContainer::new(16);
//!
//! let mut local = 0_u128;
//! let foreign = std::ptr::NonNull::from(&mut local).cast::<u8>();
//!
//! assert!(matches!(
//!     pool.try_deallocate(foreign),
//!     Err(Error::ForeignPointer { .. })
//! ));
//! ```
//!
//! ## Typed values
//!
//! ```rust
//! use slab_pool::TypedPool;
//!
//! let mut pool = TypedPool::<Vec<u32>>::new();
//!
//! let numbers = pool.insert(vec![1, 2, 3]);
//! assert_eq!(pool.len(), 1);
//!
//! // SAFETY: The pointer came from this pool and has not been removed yet.
//! let numbers = unsafe { pool.remove(numbers) };
//! assert_eq!(numbers, [1, 2, 3]);
//! ```

mod address;
mod builder;
mod container;
mod descriptor;
mod drop_policy;
mod error;
mod typed;

pub use address::Address;
pub use builder::*;
pub use container::{DEFAULT_ELEMENT_COUNT, PoolContainer};
pub(crate) use descriptor::{SlabDescriptor, SlotLayout};
pub use drop_policy::*;
pub use error::Error;
pub use typed::TypedPool;
