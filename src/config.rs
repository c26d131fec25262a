//! Compile-time tuning knobs, all derived from Cargo features.
//!
//! Every constant here is derived purely from Cargo features so that a
//! build's behavior is fully determined at compile time, matching the
//! teacher crate's `#[cfg(...)]` gating style in `os.rs`.

/// Header word size, in bytes. One machine word precedes every block.
pub const HEADER_SIZE: usize = core::mem::size_of::<usize>();

/// Tiny/boost boundary: 128 B normally, 256 B under `boost`/`booster`.
#[cfg(any(feature = "boost", feature = "booster"))]
pub const MAX_TINY_BLOCK_SIZE: usize = 256;
#[cfg(not(any(feature = "boost", feature = "booster")))]
pub const MAX_TINY_BLOCK_SIZE: usize = 128;

/// Number of tiny arenas beyond the main `Small` array.
///
/// Default build: 7 extra arenas (8 total including `Small`).
/// `booster`: 127 extra tiny arenas.
#[cfg(feature = "booster")]
pub const NUM_TINY_ARENAS: usize = 127;
#[cfg(not(feature = "booster"))]
pub const NUM_TINY_ARENAS: usize = 7;

/// Total arena count, including the main `Small` array at index 0.
pub const NUM_ARENAS: usize = NUM_TINY_ARENAS + 1;

/// `booster` hashes the thread id to pick an arena; other builds round-robin.
#[cfg(feature = "booster")]
pub const PER_THREAD_ARENA_SELECTION: bool = true;
#[cfg(not(feature = "booster"))]
pub const PER_THREAD_ARENA_SELECTION: bool = false;

/// Number of independent medium-allocator namespaces.
///
/// `booster` keeps small-block-pool backing separate per tiny arena bucket
/// to reduce medium-lock contention; smaller builds use a single shared
/// namespace (namespace 0 also backs small-block pools under `boost`).
#[cfg(feature = "booster")]
pub const NUM_MEDIUM_NAMESPACES: usize = 4;
#[cfg(not(feature = "booster"))]
pub const NUM_MEDIUM_NAMESPACES: usize = 1;

/// Namespace index small-block pools are carved out of.
#[cfg(any(feature = "boost", feature = "booster"))]
pub const SMALL_POOL_NAMESPACE: usize = NUM_MEDIUM_NAMESPACES - 1;
#[cfg(not(any(feature = "boost", feature = "booster")))]
pub const SMALL_POOL_NAMESPACE: usize = 0;

/// Arena-bits constant `A` used for the per-thread hash shift.
pub const fn arena_bits() -> u32 {
    let mut bits = 0u32;
    let mut n = NUM_TINY_ARENAS;
    while n > 0 {
        n >>= 1;
        bits += 1;
    }
    bits
}

/// Whether this build always falls back to alloc+copy+free for large growth.
#[cfg(feature = "no-remap")]
pub const LARGE_REMAP_ENABLED: bool = false;
#[cfg(not(feature = "no-remap"))]
pub const LARGE_REMAP_ENABLED: bool = true;

/// Full per-arena counters and peak tracking vs. approximate release counters.
#[cfg(any(feature = "debug", feature = "server"))]
pub const DEBUG_STATS: bool = true;
#[cfg(not(any(feature = "debug", feature = "server")))]
pub const DEBUG_STATS: bool = false;

/// Spin budgets before a lock holder yields to the OS scheduler.
pub const SPIN_BUDGET_SMALL: u32 = 500;
pub const SPIN_BUDGET_MEDIUM: u32 = 2500;
pub const SPIN_BUDGET_LARGE: u32 = 5000;

/// Bounded number of size classes a freer probes before giving up and
/// deferring to the lock-less stack.
pub const MAX_LOCK_PROBES: usize = 3;
