//! A `Sync` cell for state that is mutated only while a [`crate::lock::SpinLock`]
//! (or, for single-threaded init/shutdown, nothing at all) is held.
//!
//! This is the usual escape hatch allocator crates reach for to put raw,
//! mutable pointer-laden structs into `static` storage: the compiler can't
//! see the external lock discipline that makes the access safe, so we
//! assert `Sync` ourselves and rely on documented call-site discipline
//! instead of the type system.

use core::cell::UnsafeCell;

pub struct Racy<T>(UnsafeCell<T>);

unsafe impl<T> Sync for Racy<T> {}

impl<T> Racy<T> {
    pub const fn new(value: T) -> Racy<T> {
        Racy(UnsafeCell::new(value))
    }

    #[inline]
    pub fn get(&self) -> *mut T {
        self.0.get()
    }
}
