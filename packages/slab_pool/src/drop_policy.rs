/// Determines what happens when a pool is dropped while it still has live allocations.
///
/// By default, the pool releases its memory regardless of what is still allocated in it.
///
/// # Examples
///
/// ```
/// use slab_pool::{DropPolicy, PoolContainer};
///
/// // The drop policy is set at pool creation time.
/// let pool = PoolContainer::<64>::builder()
///     .item_size(16)
///     .drop_policy(DropPolicy::MustNotDropItems)
///     .build();
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum DropPolicy {
    /// The pool releases its memory when dropped, even if allocations are still live.
    ///
    /// A [`PoolContainer`][crate::PoolContainer] does not know the type of its items, so live
    /// allocations are released without running any destructor. A
    /// [`TypedPool`][crate::TypedPool] drops its remaining values first. This is the default.
    #[default]
    MayDropItems,

    /// The pool will panic if it still has live allocations when it is dropped.
    ///
    /// The memory is still released before the panic. This may be valuable if the owner
    /// of the pool is expected to return every allocation before tearing the pool down,
    /// for example because out of band pointers to the items may still exist.
    MustNotDropItems,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_may_drop_items() {
        assert_eq!(DropPolicy::default(), DropPolicy::MayDropItems);
    }
}
