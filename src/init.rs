//! Process-wide singleton state and the init/shutdown lifecycle.
//!
//! There is exactly one heap per process: every arena, size-class record,
//! medium namespace, and large-block list lives in `static` storage here,
//! reached through [`crate::racy::Racy`] where it is mutated under a lock.
//! `init()` is idempotent and safe to call from every entry point before
//! touching any of that state; `shutdown()` is an idempotent no-op after
//! the first call (decided in DESIGN.md).

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::large::LargeState;
use crate::medium::MediumNamespaces;
use crate::small::Arenas;
use crate::stats::Stats;

static INITIALIZED: AtomicBool = AtomicBool::new(false);
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

static STATS: Stats = Stats::new();
static ARENAS: Arenas = Arenas::new();
static MEDIUM: MediumNamespaces = MediumNamespaces::new();
static LARGE: LargeState = LargeState::new();

/// Ensures the OS layer and process-wide state are ready. Called from every
/// public entry point; cheap after the first call.
#[inline]
pub fn init() {
    if INITIALIZED.load(Ordering::Acquire) {
        return;
    }
    if !INITIALIZED.swap(true, Ordering::AcqRel) {
        crate::os::os_init();
        log::info!("heap initialized");
    }
}

/// Idempotent teardown hook: a second call is a documented no-op rather
/// than an error, since a process may legitimately call it from more than
/// one shutdown path (an explicit call plus an `atexit` handler, for
/// instance).
pub fn shutdown() {
    if SHUTDOWN.swap(true, Ordering::AcqRel) {
        return;
    }
    #[cfg(feature = "report-leaks")]
    {
        let snapshot = stats().small.snapshot();
        if snapshot.current != 0 {
            log::warn!("report-leaks: {} bytes of small allocations still live at shutdown", snapshot.current);
        }
        let snapshot = stats().medium.snapshot();
        if snapshot.current != 0 {
            log::warn!("report-leaks: {} bytes of medium allocations still live at shutdown", snapshot.current);
        }
        let snapshot = stats().large.snapshot();
        if snapshot.current != 0 {
            log::warn!("report-leaks: {} bytes of large allocations still live at shutdown", snapshot.current);
        }
    }
}

#[inline]
pub fn stats() -> &'static Stats {
    &STATS
}

#[inline]
pub fn arenas() -> &'static Arenas {
    &ARENAS
}

#[inline]
pub fn medium() -> &'static MediumNamespaces {
    &MEDIUM
}

#[inline]
pub fn large() -> &'static LargeState {
    &LARGE
}

/// A per-thread numeric identity, used only to pick a tiny arena under
/// `booster`'s per-thread selection. Not required to be stable or dense --
/// any OS thread handle works as hash input.
#[cfg(not(windows))]
pub fn thread_id() -> usize {
    unsafe { libc::pthread_self() as usize }
}

#[cfg(windows)]
pub fn thread_id() -> usize {
    unsafe { winapi::um::processthreadsapi::GetCurrentThreadId() as usize }
}

/// Knuth's 32-bit multiplicative hash, used to scatter thread ids across
/// tiny arenas under `booster`: callers shift the result right by
/// `32 - arena_bits()` to land in `[0, NUM_ARENAS)`.
#[inline]
pub fn knuth_hash32(x: usize) -> u32 {
    (x as u32).wrapping_mul(2654435761)
}

static ROUND_ROBIN: AtomicUsize = AtomicUsize::new(0);

/// Next round-robin cursor value, used by non-`booster` builds to spread
/// allocations across tiny arenas without a per-thread hash.
#[inline]
pub fn next_round_robin() -> usize {
    ROUND_ROBIN.fetch_add(1, Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init();
        init();
        assert!(INITIALIZED.load(Ordering::Relaxed));
    }

    #[test]
    fn knuth_hash_is_deterministic() {
        assert_eq!(knuth_hash32(42), knuth_hash32(42));
    }
}
