//! A tiered, multi-thread-friendly heap allocator backed directly by OS
//! virtual-memory calls. No libc heap functions are used: every byte
//! handed to a caller traces back to an anonymous `mmap` (`VirtualAlloc`
//! on Windows), carved up by the tiny/small, medium, or large tier
//! according to [`config::MAX_TINY_BLOCK_SIZE`],
//! [`sizeclass::MAX_SMALL_BLOCK_SIZE`], and [`medium::MAX_MEDIUM_BLOCK_SIZE`].
#![no_std]

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::null_mut;

mod config;
mod header;
mod init;
mod large;
mod lock;
mod medium;
mod os;
mod racy;
mod sizeclass;
mod small;
mod stats;

pub use header::Header;
pub use sizeclass::MAX_SMALL_BLOCK_SIZE;
pub use medium::MAX_MEDIUM_BLOCK_SIZE;
pub use stats::{HeapStatus, SmallBlockContention, SmallBlockStat, SortOrder};

use config::HEADER_SIZE;

/// Alignment every tier already guarantees without extra bookkeeping: size
/// classes are multiples of 16, and medium / large blocks are carved from
/// page-aligned OS mappings. Requests at or below this go through the
/// plain tiered path; above it, [`alloc_aligned`] over-allocates (block
/// sizes are always multiples of 16, which this natural alignment relies
/// on).
const NATURAL_ALIGN: usize = 16;

/// Ensures the allocator's process-wide state and OS layer are ready.
/// Safe, cheap, and idempotent to call from every entry point below;
/// callers that want to control the exact moment of first initialization
/// (rather than lazily on first `alloc`) may call it directly.
pub fn init() {
    init::init();
}

/// Tears down the allocator. A second call is a documented no-op
/// (DESIGN.md), not an error.
pub fn shutdown() {
    init::shutdown();
}

#[inline]
fn medium_info() -> &'static medium::MediumInfo {
    init::medium().get(0)
}

/// Allocates at least `size` bytes, dispatching to the tiny/small, medium,
/// or large tier by size. `size == 0` is coerced to `1`. Returns null on
/// OS-mapping failure; allocator state is left unchanged in that case.
pub fn alloc(size: usize) -> *mut u8 {
    init::init();
    let size = if size == 0 { 1 } else { size };
    let stats = init::stats();
    if size <= sizeclass::MAX_SMALL_BLOCK_SIZE - HEADER_SIZE {
        small::alloc_small(init::arenas(), size, stats)
    } else if size <= medium::MAX_MEDIUM_BLOCK_SIZE - HEADER_SIZE {
        medium::alloc_medium(medium_info(), size, stats)
    } else {
        large::alloc_large(init::large(), size, stats)
    }
}

/// Like [`alloc`], but the returned block's usable bytes are zero-filled.
pub fn alloc_zeroed(size: usize) -> *mut u8 {
    let ptr = alloc(size);
    if !ptr.is_null() {
        let usable = size_of(ptr);
        unsafe { core::ptr::write_bytes(ptr, 0, usable) };
    }
    ptr
}

/// Frees a block previously returned by [`alloc`]/[`alloc_zeroed`]/
/// [`realloc`]. Returns the block's nominal size, or 0 for a null pointer
/// or a detected double free. Double-free detection is centralized here
/// (read once, before any tier-specific mutation) so it applies uniformly
/// across tiers.
pub fn free(ptr: *mut u8) -> usize {
    if ptr.is_null() {
        return 0;
    }
    let stats = init::stats();
    unsafe {
        let header = Header::from_user_ptr(ptr);
        if header.is_free() {
            return 0;
        }
        if header.is_medium() {
            let nominal = header.size() - 2 * HEADER_SIZE;
            medium::free_medium(medium_info(), ptr, stats);
            nominal
        } else if header.is_large() {
            large::free_large(init::large(), ptr, stats)
        } else {
            small::free_small(init::arenas(), ptr, stats)
        }
    }
}

/// Like [`free`], but the caller additionally states the size it believes
/// the block to be. `size` is a hint only -- callers pass pointers
/// [`alloc`] actually returned, so there is nothing to validate it against
/// beyond what [`free`] already does.
pub fn free_sized(ptr: *mut u8, size: usize) -> isize {
    let _ = size;
    free(ptr) as isize
}

/// The usable size of a live allocation. Always `size_of(alloc(s)) >= s`.
pub fn size_of(ptr: *mut u8) -> usize {
    if ptr.is_null() {
        return 0;
    }
    unsafe {
        let header = Header::from_user_ptr(ptr);
        if header.is_medium() {
            header.size() - 2 * HEADER_SIZE
        } else if header.is_large() {
            header.size()
        } else {
            small::size_of_small(ptr)
        }
    }
}

/// Copies the lesser of `old`'s usable size and `new_size` bytes into a
/// freshly allocated block, then frees `old` -- the shared terminal case
/// every tier's in-place realloc bails out to. `server` builds rely on LLVM
/// lowering `copy_nonoverlapping` to `rep movsb` on modern x86_64 for the
/// wide copies this path performs on large reallocations, rather than
/// hand-rolling a SIMD copy loop here.
fn fallback_realloc(old: *mut u8, new_size: usize) -> *mut u8 {
    let old_size = size_of(old);
    let new_ptr = alloc(new_size);
    if new_ptr.is_null() {
        return null_mut();
    }
    let copy_len = old_size.min(new_size);
    unsafe { core::ptr::copy_nonoverlapping(old, new_ptr, copy_len) };
    free(old);
    new_ptr
}

/// Resizes the allocation pointed to by `*ptr_ref` to at least `size`
/// bytes, writing the (possibly new) pointer back through `ptr_ref`.
/// `size == 0` means free: `*ptr_ref` is freed and set to null. A null
/// `*ptr_ref` behaves as a plain `alloc`.
pub fn realloc(ptr_ref: &mut *mut u8, size: usize) -> *mut u8 {
    let old = *ptr_ref;
    if size == 0 {
        free(old);
        *ptr_ref = null_mut();
        return null_mut();
    }
    if old.is_null() {
        let p = alloc(size);
        *ptr_ref = p;
        return p;
    }
    let stats = init::stats();
    let new_ptr = unsafe {
        let header = Header::from_user_ptr(old);
        if header.is_medium() {
            medium::realloc_medium(medium_info(), old, size, stats).unwrap_or_else(|| fallback_realloc(old, size))
        } else if header.is_large() {
            large::realloc_large(init::large(), old, size, stats).unwrap_or_else(|| fallback_realloc(old, size))
        } else {
            small::realloc_small(old, size).unwrap_or_else(|| fallback_realloc(old, size))
        }
    };
    *ptr_ref = new_ptr;
    new_ptr
}

/// Allocates `size` bytes aligned to `align`. Requests at or
/// below [`NATURAL_ALIGN`] go straight to [`alloc`]; above it, the block
/// is over-allocated and an offset word recovering the true base pointer
/// is written immediately before the aligned pointer returned to the
/// caller -- the only allocation shape in this crate that carries
/// anything beyond the tier's own one-word header. Pair with
/// [`free_aligned`] / [`size_of_aligned`], not [`free`] / [`size_of`].
pub fn alloc_aligned(size: usize, align: usize) -> *mut u8 {
    if align <= NATURAL_ALIGN {
        return alloc(size);
    }
    debug_assert!(align.is_power_of_two());
    let slack = align + core::mem::size_of::<usize>();
    let total = match size.checked_add(slack) {
        Some(v) => v,
        None => return null_mut(),
    };
    let raw = alloc(total);
    if raw.is_null() {
        return null_mut();
    }
    let raw_addr = raw as usize;
    let aligned_addr = (raw_addr + core::mem::size_of::<usize>() + align - 1) & !(align - 1);
    let user_ptr = aligned_addr as *mut u8;
    unsafe { core::ptr::write((user_ptr as *mut usize).offset(-1), raw_addr) };
    user_ptr
}

/// Frees a block obtained from [`alloc_aligned`].
pub fn free_aligned(ptr: *mut u8) -> usize {
    if ptr.is_null() {
        return 0;
    }
    unsafe {
        let raw_addr = core::ptr::read((ptr as *mut usize).offset(-1));
        free(raw_addr as *mut u8)
    }
}

/// The usable size of a block obtained from [`alloc_aligned`].
pub fn size_of_aligned(ptr: *mut u8) -> usize {
    if ptr.is_null() {
        return 0;
    }
    unsafe {
        let raw_addr = core::ptr::read((ptr as *mut usize).offset(-1));
        size_of(raw_addr as *mut u8) - (ptr as usize - raw_addr)
    }
}

/// A snapshot of the whole-process allocator status.
pub fn current_heap_status() -> HeapStatus {
    stats::snapshot(init::stats())
}

/// Per-size-class allocation/occupancy status. Returns a fixed-size
/// buffer and the number of
/// leading rows actually populated (`min(max, NUM_SIZE_CLASSES)`).
pub fn small_block_status(max: usize, order: SortOrder) -> ([SmallBlockStat; sizeclass::NUM_SIZE_CLASSES], usize) {
    stats::small_block_status(init::stats(), max, order)
}

/// Per-size-class lock-contention status, highest sleep count first.
pub fn small_block_contention(max: usize) -> ([SmallBlockContention; sizeclass::NUM_SIZE_CLASSES], usize) {
    stats::small_block_contention(init::stats(), max)
}

/// Installs this allocator as the process's `#[global_allocator]`.
pub struct TierMalloc;

unsafe impl GlobalAlloc for TierMalloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() <= NATURAL_ALIGN {
            alloc(layout.size())
        } else {
            alloc_aligned(layout.size(), layout.align())
        }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if layout.align() <= NATURAL_ALIGN {
            alloc_zeroed(layout.size())
        } else {
            let ptr = alloc_aligned(layout.size(), layout.align());
            if !ptr.is_null() {
                core::ptr::write_bytes(ptr, 0, layout.size());
            }
            ptr
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if layout.align() <= NATURAL_ALIGN {
            free(ptr);
        } else {
            free_aligned(ptr);
        }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() <= NATURAL_ALIGN {
            let mut p = ptr;
            crate::realloc(&mut p, new_size)
        } else {
            let new_ptr = alloc_aligned(new_size, layout.align());
            if !new_ptr.is_null() {
                let old_size = size_of_aligned(ptr);
                core::ptr::copy_nonoverlapping(ptr, new_ptr, old_size.min(new_size));
                free_aligned(ptr);
            }
            new_ptr
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern crate std;
    use std::sync::Mutex;

    static TEST_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn round_trip_size_property() {
        let _guard = TEST_LOCK.lock().unwrap();
        for s in [1usize, 7, 16, 40, 128, 257, 2048, 3000, 70_000, 500_000].iter() {
            let p = alloc(*s);
            assert!(!p.is_null());
            assert!(size_of(p) >= *s, "size_of({}) < requested", s);
            free(p);
        }
    }

    #[test]
    fn zero_size_coerces_to_one() {
        let _guard = TEST_LOCK.lock().unwrap();
        let p = alloc(0);
        assert!(!p.is_null());
        assert!(size_of(p) >= 1);
        free(p);
    }

    #[test]
    fn alloc_zeroed_is_zero_filled() {
        let _guard = TEST_LOCK.lock().unwrap();
        let p = alloc_zeroed(64);
        assert!(!p.is_null());
        unsafe {
            for i in 0..64 {
                assert_eq!(*p.add(i), 0);
            }
        }
        free(p);
    }

    #[test]
    fn double_free_returns_zero_and_does_not_crash() {
        let _guard = TEST_LOCK.lock().unwrap();
        let p = alloc(48);
        assert!(free(p) > 0);
        assert_eq!(free(p), 0);
    }

    #[test]
    fn scenario_s1_tiny_alloc_nominal_size() {
        let _guard = TEST_LOCK.lock().unwrap();
        let p = alloc(40);
        unsafe { core::ptr::write_bytes(p, 0xAA, 40) };
        assert_eq!(free(p), 48);
    }

    #[test]
    fn realloc_preserves_content_across_tiers() {
        let _guard = TEST_LOCK.lock().unwrap();
        let mut p = alloc(100);
        unsafe { core::ptr::write_bytes(p, 0x5A, 100) };
        let q = realloc(&mut p, 200);
        assert!(!q.is_null());
        assert!(size_of(q) >= 200);
        unsafe {
            for i in 0..100 {
                assert_eq!(*q.add(i), 0x5A);
            }
        }
        free(q);
    }

    #[test]
    fn realloc_to_zero_frees_and_nulls() {
        let _guard = TEST_LOCK.lock().unwrap();
        let mut p = alloc(64);
        let q = realloc(&mut p, 0);
        assert!(q.is_null());
        assert!(p.is_null());
    }

    #[test]
    fn alloc_aligned_honors_alignment() {
        let _guard = TEST_LOCK.lock().unwrap();
        let p = alloc_aligned(100, 128);
        assert!(!p.is_null());
        assert_eq!(p as usize % 128, 0);
        assert!(size_of_aligned(p) >= 100);
        free_aligned(p);
    }

    #[test]
    fn heap_status_reflects_allocation() {
        let _guard = TEST_LOCK.lock().unwrap();
        let before = current_heap_status().small.current;
        let p = alloc(32);
        let after = current_heap_status().small.current;
        assert!(after > before);
        free(p);
    }
}
