use parking_lot::RwLock;
use parking_lot::RwLockReadGuard;
use parking_lot::RwLockWriteGuard;
use std::sync::Arc;

/// A convenience type alias for [Arc<RwLock<T>>].
///
/// The lock is the [parking_lot] one, so acquiring it never returns a poison
/// error.
///
/// # Example
///
/// ```
/// use callconv::shared::Shared;
/// use callconv::shared::SharedExt;
///
/// let lock: Shared<i32> = Shared::new(42.into());
/// assert_eq!(*lock.rd(), 42);
/// ```
pub type Shared<T> = Arc<RwLock<T>>;

/// A convenience trait around [RwLock].
///
/// The schedule cache hands out one `Shared` slot per cache key. Readers of a
/// populated slot use [SharedExt::rd]; whoever computes or replaces the entry
/// holds [SharedExt::wr] for the whole computation, which makes the write
/// guard the per-key gate.
pub trait SharedExt<T: ?Sized> {
    /// Convenience method for reading.
    fn rd(&self) -> RwLockReadGuard<'_, T>;
    /// Convenience method for writing.
    fn wr(&self) -> RwLockWriteGuard<'_, T>;
}

impl<T: ?Sized> SharedExt<T> for Shared<T> {
    fn rd(&self) -> RwLockReadGuard<'_, T> {
        self.read()
    }
    fn wr(&self) -> RwLockWriteGuard<'_, T> {
        self.write()
    }
}

#[test]
fn test_shared() {
    let lock: Shared<Vec<i32>> = Shared::new(vec![1].into());
    lock.wr().push(2);
    assert_eq!(*lock.rd(), vec![1, 2]);
}
