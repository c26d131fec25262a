//! Direct operating-system virtual-memory primitives. No libc heap
//! functions are used anywhere in this crate -- only anonymous
//! mmap/munmap (or VirtualAlloc/VirtualFree), an optional remap, a region
//! query, and a scheduler yield.

#[cfg(not(windows))]
use libc::{mmap, mremap, munmap, MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, MREMAP_MAYMOVE, PROT_READ, PROT_WRITE};
#[cfg(windows)]
use winapi::shared::basetsd::SIZE_T;
#[cfg(windows)]
use winapi::shared::minwindef::{FALSE, LPVOID};
#[cfg(windows)]
use winapi::um::memoryapi::{VirtualAlloc, VirtualFree, VirtualQuery};
#[cfg(windows)]
use winapi::um::processthreadsapi::SwitchToThread;
#[cfg(windows)]
use winapi::um::sysinfoapi::GetSystemInfo;
#[cfg(windows)]
use winapi::um::winnt::{MEMORY_BASIC_INFORMATION, MEM_COMMIT, MEM_FREE, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE};

use core::ptr::null_mut;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::stats::Stats;

/// PMD (middle page directory) alignment on x86-64, used for large blocks
/// at or above the hugepage threshold.
pub const PMD_ALIGNMENT: usize = 2 * 1024 * 1024;
/// Below this, large blocks are rounded to 64 KB granularity.
pub const LARGE_GRANULARITY: usize = 64 * 1024;
/// Threshold (a tunable heuristic) above which Linux large blocks round
/// up to PMD alignment for transparent hugepages.
pub const HUGEPAGE_THRESHOLD: usize = 4 * 1024 * 1024;

static PAGE_SIZE: AtomicUsize = AtomicUsize::new(4096);

#[inline]
pub fn page_size() -> usize {
    PAGE_SIZE.load(Ordering::Relaxed)
}

#[inline]
fn align_up(size: usize, align: usize) -> usize {
    (size + align - 1) / align * align
}

/// Rounds a large-block mapping request up to [`LARGE_GRANULARITY`], or to
/// [`PMD_ALIGNMENT`] once the request reaches [`HUGEPAGE_THRESHOLD`] on
/// Linux, where the wider alignment lets the kernel back the mapping with
/// transparent huge pages.
#[inline]
pub fn round_large_size(size: usize) -> usize {
    #[cfg(target_os = "linux")]
    {
        if size >= HUGEPAGE_THRESHOLD {
            return align_up(size, PMD_ALIGNMENT);
        }
    }
    align_up(size, LARGE_GRANULARITY)
}

/// One-time OS layer setup, called from [`crate::init::init`].
pub fn os_init() {
    #[cfg(windows)]
    unsafe {
        let mut si = core::mem::zeroed();
        GetSystemInfo(&mut si);
        if si.dwPageSize > 0 {
            PAGE_SIZE.store(si.dwPageSize as usize, Ordering::Relaxed);
        }
    }
    #[cfg(not(windows))]
    unsafe {
        let result = libc::sysconf(libc::_SC_PAGESIZE);
        if result > 0 {
            PAGE_SIZE.store(result as usize, Ordering::Relaxed);
        }
    }
}

/// Reserve+commit `size` bytes of anonymous, zero-filled private memory.
/// Returns null on failure; never retries.
pub fn os_alloc(size: usize, stats: &Stats) -> *mut u8 {
    if size == 0 {
        return null_mut();
    }
    let size = align_up(size, page_size());
    stats.mmap_calls.count.fetch_add(1, Ordering::Relaxed);

    #[cfg(windows)]
    let p = unsafe {
        VirtualAlloc(null_mut(), size as SIZE_T, MEM_RESERVE | MEM_COMMIT, PAGE_READWRITE) as *mut u8
    };
    #[cfg(not(windows))]
    let p = unsafe {
        let raw = mmap(null_mut(), size, PROT_READ | PROT_WRITE, MAP_PRIVATE | MAP_ANONYMOUS, -1, 0);
        if raw == MAP_FAILED {
            null_mut()
        } else {
            raw as *mut u8
        }
    };

    if p.is_null() {
        log::warn!("os_alloc failed for size {}: {}", size, last_os_error());
    }
    p
}

/// Reserve+commit `size` bytes aligned to `align` (a power of two >= the
/// page size), by over-allocating and trimming.
pub fn os_alloc_aligned(size: usize, align: usize, stats: &Stats) -> *mut u8 {
    debug_assert!(align.is_power_of_two() && align >= page_size());
    let size = align_up(size, page_size());

    let over_size = match size.checked_add(align) {
        Some(v) => v,
        None => return null_mut(),
    };
    let raw = os_alloc(over_size, stats);
    if raw.is_null() {
        return null_mut();
    }
    let raw_addr = raw as usize;
    let aligned_addr = align_up(raw_addr, align);
    let pre = aligned_addr - raw_addr;
    let mid = size;
    let post = over_size - pre - mid;

    if pre > 0 {
        os_free(raw, pre, stats);
    }
    if post > 0 {
        os_free((aligned_addr + mid) as *mut u8, post, stats);
    }
    aligned_addr as *mut u8
}

/// Release `size` bytes previously returned by [`os_alloc`] or
/// [`os_alloc_aligned`]. No-op on a null pointer or zero size.
pub fn os_free(addr: *mut u8, size: usize, stats: &Stats) {
    if addr.is_null() || size == 0 {
        return;
    }
    #[cfg(windows)]
    let ok = unsafe { VirtualFree(addr as LPVOID, 0, MEM_RELEASE) != 0 };
    #[cfg(not(windows))]
    let ok = unsafe { munmap(addr as *mut core::ffi::c_void, size) == 0 };

    if !ok {
        log::warn!("os_free failed: addr {:p}, size {}: {}", addr, size, last_os_error());
    }
}

/// Attempt an in-place, possibly-moving grow of a large block on Linux
/// using the kernel's TLB-remap primitive. Not available (and not
/// attempted) on other platforms or under the `no-remap` feature.
#[cfg(all(target_os = "linux", not(feature = "no-remap")))]
pub fn os_remap(addr: *mut u8, old_size: usize, new_size: usize) -> Option<*mut u8> {
    let new_size = align_up(new_size, page_size());
    unsafe {
        let result = mremap(addr as *mut core::ffi::c_void, old_size, new_size, MREMAP_MAYMOVE);
        if result == MAP_FAILED {
            None
        } else {
            Some(result as *mut u8)
        }
    }
}

#[cfg(not(all(target_os = "linux", not(feature = "no-remap"))))]
pub fn os_remap(_addr: *mut u8, _old_size: usize, _new_size: usize) -> Option<*mut u8> {
    None
}

/// Query whether the virtual-memory region immediately following `addr`
/// (of size `after_size`) is free, for the Windows in-place large-grow
/// path on the Windows large-block in-place grow path.
#[cfg(windows)]
pub fn region_is_free(addr: *mut u8, after_size: usize) -> bool {
    unsafe {
        let mut info: MEMORY_BASIC_INFORMATION = core::mem::zeroed();
        let written = VirtualQuery(addr as LPVOID, &mut info, core::mem::size_of::<MEMORY_BASIC_INFORMATION>() as SIZE_T);
        written != 0 && info.State == MEM_FREE && info.RegionSize >= after_size as SIZE_T
    }
}

#[cfg(not(windows))]
pub fn region_is_free(_addr: *mut u8, _after_size: usize) -> bool {
    false
}

/// Reserve then commit the adjacent region in two steps, for atomicity
/// against racing allocators.
#[cfg(windows)]
pub fn reserve_and_commit_adjacent(addr: *mut u8, size: usize) -> bool {
    unsafe {
        let reserved = VirtualAlloc(addr as LPVOID, size as SIZE_T, MEM_RESERVE, PAGE_READWRITE);
        if reserved.is_null() || reserved as *mut u8 != addr {
            return false;
        }
        let committed = VirtualAlloc(addr as LPVOID, size as SIZE_T, MEM_COMMIT, PAGE_READWRITE);
        !committed.is_null()
    }
}

#[cfg(not(windows))]
pub fn reserve_and_commit_adjacent(_addr: *mut u8, _size: usize) -> bool {
    false
}

/// Release the scheduler's hold on this thread for roughly 10ns, invoked
/// only after a lock's spin budget is exhausted.
pub fn yield_thread() {
    #[cfg(windows)]
    unsafe {
        if SwitchToThread() == FALSE as i32 {
            // No other thread was ready to run; a plain pause is the best
            // we can do without a sleep API in this minimal OS surface.
            core::hint::spin_loop();
        }
    }
    #[cfg(not(windows))]
    unsafe {
        let ts = libc::timespec { tv_sec: 0, tv_nsec: 10 };
        libc::nanosleep(&ts, null_mut());
    }
}

#[cfg(not(windows))]
fn last_os_error() -> errno::Errno {
    errno::errno()
}

#[cfg(windows)]
fn last_os_error() -> u32 {
    unsafe { winapi::um::errhandlingapi::GetLastError() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_free_roundtrip() {
        let stats = Stats::new();
        os_init();
        let p = os_alloc(8192, &stats);
        assert!(!p.is_null());
        assert_eq!(p as usize % page_size(), 0);
        os_free(p, 8192, &stats);
    }

    #[test]
    fn aligned_alloc_is_aligned() {
        let stats = Stats::new();
        os_init();
        let align = 1 << 20;
        let p = os_alloc_aligned(align * 2, align, &stats);
        assert!(!p.is_null());
        assert_eq!(p as usize % align, 0);
        os_free(p, align * 2, &stats);
    }
}
