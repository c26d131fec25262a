//! The large-tier allocator: direct OS map/unmap per block, a single
//! global circular list, in-place grow (Linux remap / Windows adjacent
//! reservation), and lazily-reclaimed frees so a same-pointer double free
//! can still be detected.

use core::ptr::null_mut;

use crate::config::{HEADER_SIZE, SPIN_BUDGET_LARGE};
use crate::header::Header;
use crate::lock::{stack_next, LockFreeStack, SpinLock};
use crate::medium::MAX_MEDIUM_BLOCK_SIZE;
use crate::os;
use crate::racy::Racy;
use crate::stats::Stats;

const LARGE_NODE_SIZE: usize = core::mem::size_of::<LargeNode>();
/// Total bookkeeping bytes in front of the user pointer: the list node plus
/// the one-word tagged header every tier shares.
const OVERHEAD: usize = LARGE_NODE_SIZE + HEADER_SIZE;

/// Growth overshoot factors, expressed as eighths so the arithmetic stays
/// integer-only in `no_std`.
const GROW_NUM_BIG: usize = 9; // 12.5% -> *9/8 for blocks > 128 MiB
const GROW_DEN_BIG: usize = 8;
const GROW_NUM_SMALL: usize = 5; // 25% -> *5/4 otherwise
const GROW_DEN_SMALL: usize = 4;
const BIG_BLOCK_THRESHOLD: usize = 128 * 1024 * 1024;

/// Persistent circular-list node, permanently resident in front of every
/// large block's header (never reused for anything else, unlike the
/// intrusive bin links the medium tier writes into freed payloads).
#[repr(C)]
struct LargeNode {
    prev: *mut LargeNode,
    next: *mut LargeNode,
    /// Total OS-mapped span starting at this node's own address.
    mapped_size: usize,
    /// Windows segmented-grow path only: the adjacent region reserved in
    /// addition to `mapped_size`, unmapped separately at reclaim time.
    extra_base: *mut u8,
    extra_size: usize,
}

pub struct LargeState {
    lock: SpinLock,
    sentinel: Racy<LargeNode>,
    initialized: Racy<bool>,
    /// Blocks unlinked by `free_large` but not yet handed back to the OS.
    /// Deferring the actual `munmap` lets a same-pointer double free still
    /// observe `IS_FREE` before the page disappears -- see DESIGN.md for
    /// why an immediate unmap can't satisfy both requirements at once.
    pending_unmap: LockFreeStack,
}

impl LargeState {
    pub const fn new() -> LargeState {
        LargeState {
            lock: SpinLock::new(),
            sentinel: Racy::new(LargeNode {
                prev: null_mut(),
                next: null_mut(),
                mapped_size: 0,
                extra_base: null_mut(),
                extra_size: 0,
            }),
            initialized: Racy::new(false),
            pending_unmap: LockFreeStack::new(),
        }
    }
}

unsafe fn ensure_initialized(state: &LargeState) {
    let flag = state.initialized.get();
    if *flag {
        return;
    }
    let sentinel = state.sentinel.get();
    (*sentinel).prev = sentinel;
    (*sentinel).next = sentinel;
    *flag = true;
}

unsafe fn list_insert(state: &LargeState, node: *mut LargeNode) {
    let sentinel = state.sentinel.get();
    (*node).prev = sentinel;
    (*node).next = (*sentinel).next;
    (*(*sentinel).next).prev = node;
    (*sentinel).next = node;
}

unsafe fn list_remove(node: *mut LargeNode) {
    (*(*node).prev).next = (*node).next;
    (*(*node).next).prev = (*node).prev;
}

#[inline]
unsafe fn node_of(user_ptr: *mut u8) -> *mut LargeNode {
    user_ptr.sub(OVERHEAD) as *mut LargeNode
}

#[inline]
unsafe fn header_of(user_ptr: *mut u8) -> Header {
    Header::from_user_ptr(user_ptr)
}

/// Unmaps every block still sitting in `pending_unmap`. Safe to call with
/// no lock held: each entry was already unlinked from the active list by
/// the `free_large` call that pushed it.
fn drain_pending(state: &LargeState, stats: &Stats) {
    unsafe {
        let mut ptr = state.pending_unmap.drain();
        while !ptr.is_null() {
            let next = stack_next(ptr);
            let header = header_of(ptr);
            let node_ptr = node_of(ptr);
            let node = core::ptr::read(node_ptr);
            if header.large_segmented() && !node.extra_base.is_null() {
                os::os_free(node.extra_base, node.extra_size, stats);
            }
            os::os_free(node_ptr as *mut u8, node.mapped_size, stats);
            ptr = next;
        }
    }
}

/// Allocates a large block of at least `request` bytes.
pub fn alloc_large(state: &LargeState, request: usize, stats: &Stats) -> *mut u8 {
    drain_pending(state, stats);

    let total_request = match request.checked_add(OVERHEAD) {
        Some(v) => v,
        None => return null_mut(),
    };
    let mapped_size = os::round_large_size(total_request);
    let raw = os::os_alloc(mapped_size, stats);
    if raw.is_null() {
        return null_mut();
    }

    let usable = mapped_size - OVERHEAD;
    let node_ptr = raw as *mut LargeNode;
    let user_ptr = unsafe {
        core::ptr::write(
            node_ptr,
            LargeNode { prev: null_mut(), next: null_mut(), mapped_size, extra_base: null_mut(), extra_size: 0 },
        );
        let user_ptr = raw.add(OVERHEAD);
        header_of(user_ptr).write_medium_or_large(usable, 0, true);
        user_ptr
    };

    state.lock.lock(SPIN_BUDGET_LARGE, stats, None);
    unsafe {
        ensure_initialized(state);
        list_insert(state, node_ptr);
    }
    state.lock.unlock();

    stats.large.update(usable as i64);
    user_ptr
}

/// Frees a large block. Returns 0 for a null pointer or a detected double
/// free; otherwise the nominal block size.
pub fn free_large(state: &LargeState, user_ptr: *mut u8, stats: &Stats) -> usize {
    if user_ptr.is_null() {
        return 0;
    }
    unsafe {
        let header = header_of(user_ptr);
        if header.is_free() {
            return 0;
        }
        let usable = header.size();
        header.set_free(true);

        let node_ptr = node_of(user_ptr);
        state.lock.lock(SPIN_BUDGET_LARGE, stats, None);
        list_remove(node_ptr);
        state.lock.unlock();

        stats.large.update(-(usable as i64));
        state.pending_unmap.push(user_ptr);
        usable
    }
}

#[cfg(all(target_os = "linux", not(feature = "no-remap")))]
unsafe fn try_remap_grow(state: &LargeState, user_ptr: *mut u8, new_usable: usize, stats: &Stats) -> Option<*mut u8> {
    let node_ptr = node_of(user_ptr);
    let old_mapped_size = (*node_ptr).mapped_size;
    let new_mapped_size = os::round_large_size(new_usable + OVERHEAD);
    if new_mapped_size <= old_mapped_size {
        return None;
    }
    let old_base = node_ptr as *mut u8;
    let new_base = os::os_remap(old_base, old_mapped_size, new_mapped_size)?;

    let old_prev = (*node_ptr).prev;
    let old_next = (*node_ptr).next;
    let new_node = new_base as *mut LargeNode;
    (*new_node).mapped_size = new_mapped_size;

    state.lock.lock(SPIN_BUDGET_LARGE, stats, None);
    if old_prev == node_ptr as *mut LargeNode {
        // Degenerate single-entry list: the sentinel itself moved with us.
        (*new_node).prev = new_node;
        (*new_node).next = new_node;
    } else {
        (*old_prev).next = new_node;
        (*old_next).prev = new_node;
    }
    state.lock.unlock();

    let new_user_ptr = new_base.add(OVERHEAD);
    header_of(new_user_ptr).write_medium_or_large(new_mapped_size - OVERHEAD, 0, true);
    Some(new_user_ptr)
}

#[cfg(not(all(target_os = "linux", not(feature = "no-remap"))))]
unsafe fn try_remap_grow(_state: &LargeState, _user_ptr: *mut u8, _new_usable: usize, _stats: &Stats) -> Option<*mut u8> {
    None
}

#[cfg(windows)]
unsafe fn try_segmented_grow(user_ptr: *mut u8, new_usable: usize) -> bool {
    let node_ptr = node_of(user_ptr);
    let header = header_of(user_ptr);
    let old_usable = header.size();
    let extra_needed = match (new_usable + OVERHEAD).checked_sub((*node_ptr).mapped_size) {
        Some(v) if v > 0 => v,
        _ => return false,
    };
    let extra_needed = os::round_large_size(extra_needed);
    let region_start = (node_ptr as *mut u8).add((*node_ptr).mapped_size);
    if !os::region_is_free(region_start, extra_needed) {
        return false;
    }
    if !os::reserve_and_commit_adjacent(region_start, extra_needed) {
        return false;
    }
    (*node_ptr).extra_base = region_start;
    (*node_ptr).extra_size = extra_needed;
    let _ = old_usable;
    header.write_medium_or_large(new_usable, 0, true);
    header.set_large_segmented(true);
    true
}

#[cfg(not(windows))]
unsafe fn try_segmented_grow(_user_ptr: *mut u8, _new_usable: usize) -> bool {
    false
}

/// Reallocates a large block in place when possible. Returns `None` when
/// the caller must fall back to a cross-tier alloc+copy+free -- either
/// because the new size no longer belongs in the large tier, or because
/// no in-place growth path succeeded.
pub fn realloc_large(state: &LargeState, user_ptr: *mut u8, new_request: usize, stats: &Stats) -> Option<*mut u8> {
    unsafe {
        let header = header_of(user_ptr);
        let old_usable = header.size();

        if new_request <= old_usable && new_request.saturating_mul(2) >= old_usable {
            return Some(user_ptr);
        }
        if new_request < MAX_MEDIUM_BLOCK_SIZE {
            // Shrinking into small/medium territory: the caller owns the
            // cross-tier move (allocate there, copy, free here).
            return None;
        }
        if new_request <= old_usable {
            // Shrinks past the 50%-utilization threshold but stays in the
            // large tier: the block already fits, and only a tier-crossing
            // shrink needs to actually move memory, so keep the oversized
            // mapping rather than move for no reason.
            return Some(user_ptr);
        }

        let factor = if old_usable > BIG_BLOCK_THRESHOLD {
            (GROW_NUM_BIG, GROW_DEN_BIG)
        } else {
            (GROW_NUM_SMALL, GROW_DEN_SMALL)
        };
        let grown = (old_usable / factor.1).saturating_mul(factor.0);
        let target = new_request.max(grown);

        if let Some(p) = try_remap_grow(state, user_ptr, target, stats) {
            let new_usable = header_of(p).size();
            stats.large.update(new_usable as i64 - old_usable as i64);
            return Some(p);
        }
        if try_segmented_grow(user_ptr, target) {
            stats.large.update(target as i64 - old_usable as i64);
            return Some(user_ptr);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_free_roundtrip() {
        crate::os::os_init();
        let stats = Stats::new();
        let state = LargeState::new();
        let p = alloc_large(&state, 500_000, &stats);
        assert!(!p.is_null());
        unsafe {
            assert_eq!(header_of(p).size() % os::LARGE_GRANULARITY, 0);
        }
        assert!(free_large(&state, p, &stats) > 0);
    }

    #[test]
    fn double_free_is_not_fatal() {
        crate::os::os_init();
        let stats = Stats::new();
        let state = LargeState::new();
        let p = alloc_large(&state, 500_000, &stats);
        assert!(free_large(&state, p, &stats) > 0);
        assert_eq!(free_large(&state, p, &stats), 0);
    }

    #[test]
    fn null_free_returns_zero() {
        let stats = Stats::new();
        let state = LargeState::new();
        assert_eq!(free_large(&state, null_mut(), &stats), 0);
    }
}
