//! Test-and-set byte locks and the lock-less free stack.
//!
//! A holder must never call back into the allocator while holding one of
//! these locks. Locks spin on `pause` for a bounded budget, then yield to
//! the scheduler and retry; the sleep is always eventually-terminating,
//! never a hard failure.

use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, Ordering};

use crate::os;
use crate::stats::Stats;

#[inline]
fn cpu_relax() {
    core::hint::spin_loop();
}

/// A single test-and-set byte lock with a bounded spin-then-yield
/// discipline.
pub struct SpinLock {
    locked: AtomicBool,
}

impl SpinLock {
    pub const fn new() -> SpinLock {
        SpinLock { locked: AtomicBool::new(false) }
    }

    /// Single non-blocking attempt, used by the free-path's opportunistic
    /// probe across up to `MAX_LOCK_PROBES` size classes before falling
    /// back to the lock-less stack.
    #[inline]
    pub fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Spin up to `spin_budget` pause cycles, then yield to the OS and
    /// retry, recording every yield into `stats` (globally, and against
    /// `class_idx` when this lock belongs to a size class).
    pub fn lock(&self, spin_budget: u32, stats: &Stats, class_idx: Option<usize>) {
        loop {
            let mut spins = 0u32;
            loop {
                if self.try_lock() {
                    return;
                }
                if spins >= spin_budget {
                    break;
                }
                cpu_relax();
                spins += 1;
            }
            stats.record_sleep(class_idx);
            os::yield_thread();
        }
    }

    #[inline]
    pub fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

/// A single-CAS stack of deferred-free blocks. The intrusive `next`
/// pointer is written into the first word of
/// the (otherwise unused) free block's payload, immediately after its
/// header -- the same slot the small-block pool's intra-pool free list
/// uses once the block is handed back under the lock.
pub struct LockFreeStack {
    head: AtomicPtr<u8>,
}

impl LockFreeStack {
    pub const fn new() -> LockFreeStack {
        LockFreeStack { head: AtomicPtr::new(core::ptr::null_mut()) }
    }

    /// Push `block` (a user pointer) onto the stack. Linearizable.
    pub unsafe fn push(&self, block: *mut u8) {
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            core::ptr::write(block as *mut *mut u8, head);
            match self.head.compare_exchange_weak(
                head,
                block,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => head = actual,
            }
        }
    }

    /// Detach the entire stack atomically. Not linearizable with respect
    /// to concurrent drains, but this is only ever called by the current
    /// lock holder, so there is at most one drainer at a time.
    pub fn drain(&self) -> *mut u8 {
        self.head.swap(core::ptr::null_mut(), Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Relaxed).is_null()
    }
}

/// Reads the `next` pointer an element was pushed with.
#[inline]
pub unsafe fn stack_next(block: *mut u8) -> *mut u8 {
    core::ptr::read(block as *mut *mut u8)
}

/// A monotonic heartbeat, incremented whenever a sleep occurs; used only
/// for an optional timestamp-counter accounting path -- disabled by
/// default since the counter is emulated, and thus meaningless, under
/// virtualization.
pub static SLEEP_CYCLES: AtomicU64 = AtomicU64::new(0);
