//! The medium-tier allocator: 1.25 MB OS-mapped super-pools, 1024
//! bitmap-indexed free bins, sequential feed, and immediate coalescing.

use core::ptr::null_mut;
use core::sync::atomic::Ordering;

use crate::config::{SPIN_BUDGET_MEDIUM, NUM_MEDIUM_NAMESPACES};
use crate::header::{Header, FLAG_IS_FREE, FLAG_IS_MEDIUM, FLAG_PREV_MEDIUM_FREE};
use crate::lock::{LockFreeStack, SpinLock};
use crate::os;
use crate::racy::Racy;
use crate::stats::Stats;

/// Super-pool span: a 1.25 MB OS-mapped region.
pub const SUPER_POOL_SIZE: usize = 20 * 64 * 1024;
const SUPER_POOL_HEADER_SIZE: usize = core::mem::size_of::<SuperPoolHeader>();
const SUPER_POOL_BODY_SIZE: usize = SUPER_POOL_SIZE - SUPER_POOL_HEADER_SIZE;

/// Rounding granularity for medium requests.
const MEDIUM_GRANULARITY: usize = 256;
/// Fixed per-block overhead folded into the rounded size (header + trailer
/// + padding for the free-list link that a binned block carries).
const MEDIUM_OVERHEAD: usize = 48;
/// `11 * 256 + 48`.
pub const MIN_MEDIUM: usize = 11 * MEDIUM_GRANULARITY + MEDIUM_OVERHEAD;
/// Approximate dispatch threshold: requests up to roughly 260 KB.
pub const MAX_MEDIUM_BLOCK_SIZE: usize = 260 * 1024;

const NUM_BIN_GROUPS: usize = 32;
const BINS_PER_GROUP: usize = 32;
const NUM_BINS: usize = NUM_BIN_GROUPS * BINS_PER_GROUP;

/// An intrusive doubly-linked-list node. For a real free block this lives
/// at the block's user pointer (the first 16 bytes of its payload, which
/// is otherwise unused while free); for a bin, it is the bin's permanent
/// self-looping sentinel storage. Both are addressed uniformly as `*mut u8`.
#[derive(Clone, Copy)]
struct FreeLink {
    prev: *mut u8,
    next: *mut u8,
}

impl FreeLink {
    const fn new() -> FreeLink {
        FreeLink { prev: null_mut(), next: null_mut() }
    }
}

#[inline]
unsafe fn link_read(ptr: *mut u8) -> FreeLink {
    core::ptr::read(ptr as *mut FreeLink)
}

#[inline]
unsafe fn link_write(ptr: *mut u8, link: FreeLink) {
    core::ptr::write(ptr as *mut FreeLink, link);
}

unsafe fn list_is_empty(sentinel: *mut u8) -> bool {
    link_read(sentinel).next == sentinel
}

unsafe fn list_push_front(sentinel: *mut u8, node: *mut u8) {
    let mut s = link_read(sentinel);
    let old_next = s.next;
    link_write(node, FreeLink { prev: sentinel, next: old_next });
    let mut n = link_read(old_next);
    n.prev = node;
    link_write(old_next, n);
    s.next = node;
    link_write(sentinel, s);
}

unsafe fn list_remove(node: *mut u8) {
    let l = link_read(node);
    let mut p = link_read(l.prev);
    p.next = l.next;
    link_write(l.prev, p);
    let mut n = link_read(l.next);
    n.prev = l.prev;
    link_write(l.next, n);
}

unsafe fn list_pop_front(sentinel: *mut u8) -> *mut u8 {
    let s = link_read(sentinel);
    if s.next == sentinel {
        return null_mut();
    }
    let node = s.next;
    list_remove(node);
    node
}

/// Persistent circular-list node for super-pools; unlike bin links this
/// lives in real, permanently-owned memory (the pool's own header), never
/// inside a block's reused payload.
#[repr(C)]
struct SuperPoolHeader {
    prev: *mut SuperPoolHeader,
    next: *mut SuperPoolHeader,
}

#[inline]
pub fn round_medium(request: usize) -> usize {
    let rounded = ((request + MEDIUM_GRANULARITY - 1) / MEDIUM_GRANULARITY) * MEDIUM_GRANULARITY
        + MEDIUM_OVERHEAD;
    rounded.max(MIN_MEDIUM)
}

#[inline]
fn bin_index(size: usize) -> usize {
    (size.saturating_sub(MIN_MEDIUM) / MEDIUM_GRANULARITY).min(NUM_BINS - 1)
}

#[inline]
fn bin_sentinel(state: &mut MediumState, bin: usize) -> *mut u8 {
    &mut state.bins[bin] as *mut FreeLink as *mut u8
}

struct MediumState {
    pools_sentinel: SuperPoolHeader,
    feed_pool: *mut SuperPoolHeader,
    feed_ptr: *mut u8,
    feed_remaining: usize,
    bins: [FreeLink; NUM_BINS],
    bin_bitmap: [u32; NUM_BIN_GROUPS],
    group_bitmap: u32,
    initialized: bool,
}

impl MediumState {
    const fn new() -> MediumState {
        MediumState {
            pools_sentinel: SuperPoolHeader { prev: null_mut(), next: null_mut() },
            feed_pool: null_mut(),
            feed_ptr: null_mut(),
            feed_remaining: 0,
            bins: [FreeLink::new(); NUM_BINS],
            bin_bitmap: [0; NUM_BIN_GROUPS],
            group_bitmap: 0,
            initialized: false,
        }
    }
}

pub struct MediumInfo {
    lock: SpinLock,
    prefetch_lock: SpinLock,
    prefetch: Racy<*mut SuperPoolHeader>,
    free_stack: LockFreeStack,
    state: Racy<MediumState>,
}

impl MediumInfo {
    pub const fn new() -> MediumInfo {
        MediumInfo {
            lock: SpinLock::new(),
            prefetch_lock: SpinLock::new(),
            prefetch: Racy::new(null_mut()),
            free_stack: LockFreeStack::new(),
            state: Racy::new(MediumState::new()),
        }
    }
}

/// The `NUM_MEDIUM_NAMESPACES` independent medium namespaces.
pub struct MediumNamespaces {
    infos: [MediumInfo; NUM_MEDIUM_NAMESPACES],
}

impl MediumNamespaces {
    pub const fn new() -> MediumNamespaces {
        #[cfg(not(feature = "booster"))]
        {
            MediumNamespaces { infos: [MediumInfo::new()] }
        }
        #[cfg(feature = "booster")]
        {
            MediumNamespaces {
                infos: [
                    MediumInfo::new(),
                    MediumInfo::new(),
                    MediumInfo::new(),
                    MediumInfo::new(),
                ],
            }
        }
    }

    pub fn get(&self, namespace: usize) -> &MediumInfo {
        &self.infos[namespace % NUM_MEDIUM_NAMESPACES]
    }
}

unsafe fn ensure_initialized(state: &mut MediumState) {
    if state.initialized {
        return;
    }
    let sentinel = &mut state.pools_sentinel as *mut SuperPoolHeader;
    state.pools_sentinel.prev = sentinel;
    state.pools_sentinel.next = sentinel;
    for bin in state.bins.iter_mut() {
        let self_ptr = bin as *mut FreeLink as *mut u8;
        bin.prev = self_ptr;
        bin.next = self_ptr;
    }
    state.initialized = true;
}

unsafe fn pool_bounds(pool: *mut SuperPoolHeader) -> (*mut u8, *mut u8) {
    let start = (pool as *mut u8).add(SUPER_POOL_HEADER_SIZE);
    (start, start.add(SUPER_POOL_BODY_SIZE))
}

/// Locates the super-pool owning `addr`. Super-pools are not given a
/// power-of-two alignment matching their size (the span is fixed at
/// 1.25 MB, which is not a power of two), so this walks the namespace's
/// pool list; acceptable since it only runs on the rarer coalescing edges
/// (whole-pool-freed, cross-pool boundary checks), not the common path.
unsafe fn find_owning_pool(state: &MediumState, addr: *mut u8) -> *mut SuperPoolHeader {
    let sentinel = &state.pools_sentinel as *const SuperPoolHeader as *mut SuperPoolHeader;
    let mut node = (*sentinel).next;
    while node != sentinel {
        let (start, end) = pool_bounds(node);
        if addr >= start && addr < end {
            return node;
        }
        node = (*node).next;
    }
    null_mut()
}

unsafe fn pool_insert(state: &mut MediumState, pool: *mut SuperPoolHeader) {
    let sentinel = &mut state.pools_sentinel as *mut SuperPoolHeader;
    (*pool).prev = sentinel;
    (*pool).next = (*sentinel).next;
    (*(*sentinel).next).prev = pool;
    (*sentinel).next = pool;
}

unsafe fn pool_remove(pool: *mut SuperPoolHeader) {
    (*(*pool).prev).next = (*pool).next;
    (*(*pool).next).prev = (*pool).prev;
}

unsafe fn bin_occupy(state: &mut MediumState, bin: usize) {
    let g = bin / BINS_PER_GROUP;
    let b = bin % BINS_PER_GROUP;
    state.bin_bitmap[g] |= 1 << b;
    state.group_bitmap |= 1 << g;
}

unsafe fn bin_vacate_if_empty(state: &mut MediumState, bin: usize) {
    let sentinel = bin_sentinel(state, bin);
    if list_is_empty(sentinel) {
        let g = bin / BINS_PER_GROUP;
        let b = bin % BINS_PER_GROUP;
        state.bin_bitmap[g] &= !(1 << b);
        if state.bin_bitmap[g] == 0 {
            state.group_bitmap &= !(1 << g);
        }
    }
}

unsafe fn bin_insert(state: &mut MediumState, user_ptr: *mut u8, size: usize) {
    let bin = bin_index(size);
    let sentinel = bin_sentinel(state, bin);
    list_push_front(sentinel, user_ptr);
    bin_occupy(state, bin);
}

unsafe fn bin_remove(state: &mut MediumState, user_ptr: *mut u8, size: usize) {
    list_remove(user_ptr);
    bin_vacate_if_empty(state, bin_index(size));
}

/// Finds the lowest non-empty bin at or above `target_bin`: exact bin
/// preferred, else the next bin up, searching first
/// within the target's group and then across subsequent groups.
unsafe fn find_free_bin(state: &MediumState, target_bin: usize) -> Option<usize> {
    let target_group = target_bin / BINS_PER_GROUP;
    let target_bit = target_bin % BINS_PER_GROUP;

    let mask = if target_bit == 31 { 1u32 << 31 } else { !0u32 << target_bit };
    let bits = state.bin_bitmap[target_group] & mask;
    if bits != 0 {
        return Some(target_group * BINS_PER_GROUP + bits.trailing_zeros() as usize);
    }

    if target_group + 1 >= NUM_BIN_GROUPS {
        return None;
    }
    let group_mask = !0u32 << (target_group + 1);
    let groups = state.group_bitmap & group_mask;
    if groups == 0 {
        return None;
    }
    let g = groups.trailing_zeros() as usize;
    let bits2 = state.bin_bitmap[g];
    if bits2 == 0 {
        return None;
    }
    Some(g * BINS_PER_GROUP + bits2.trailing_zeros() as usize)
}

/// Returns `user_ptr` wrapped as `usize` to simplify pointer arithmetic.
#[inline]
unsafe fn header_at(addr: *mut u8) -> Header {
    Header::from_user_ptr(addr.add(crate::config::HEADER_SIZE))
}

#[inline]
fn trailer_ptr(block_addr: *mut u8, size: usize) -> *mut usize {
    unsafe { block_addr.add(size).sub(core::mem::size_of::<usize>()) as *mut usize }
}

unsafe fn write_block(block_addr: *mut u8, size: usize, free: bool, prev_free: bool) {
    let header = header_at(block_addr);
    let mut flags = FLAG_IS_MEDIUM;
    if free {
        flags |= FLAG_IS_FREE;
    }
    if prev_free {
        flags |= FLAG_PREV_MEDIUM_FREE;
    }
    header.write_medium_or_large(size, flags & !FLAG_IS_MEDIUM, false);
    core::ptr::write(trailer_ptr(block_addr, size), size);
}

unsafe fn set_prev_free_flag(following_block_addr: *mut u8, set: bool) {
    header_at(following_block_addr).set_prev_medium_free(set);
}

/// Allocates a fresh super-pool, preferring a speculatively pre-mapped one.
unsafe fn obtain_super_pool(info: &MediumInfo, stats: &Stats) -> *mut SuperPoolHeader {
    let slot = info.prefetch.get();
    let existing = *slot;
    if !existing.is_null() {
        *slot = null_mut();
        return existing;
    }
    let raw = os::os_alloc(SUPER_POOL_SIZE, stats);
    if raw.is_null() {
        return null_mut();
    }
    stats.segments.update(SUPER_POOL_SIZE as i64);
    raw as *mut SuperPoolHeader
}

/// Opportunistically maps a spare super-pool outside the main lock, to
/// hide mmap latency at contention points.
pub fn maybe_prefetch(info: &MediumInfo, stats: &Stats) {
    unsafe {
        if !(*info.prefetch.get()).is_null() {
            return;
        }
        if !info.prefetch_lock.try_lock() {
            return;
        }
        if (*info.prefetch.get()).is_null() {
            let raw = os::os_alloc(SUPER_POOL_SIZE, stats);
            if !raw.is_null() {
                stats.segments.update(SUPER_POOL_SIZE as i64);
                *info.prefetch.get() = raw as *mut SuperPoolHeader;
            }
        }
        info.prefetch_lock.unlock();
    }
}

unsafe fn install_new_pool(state: &mut MediumState, pool: *mut SuperPoolHeader) {
    pool_insert(state, pool);
    let (start, end) = pool_bounds(pool);
    state.feed_pool = pool;
    state.feed_ptr = start;
    state.feed_remaining = end as usize - start as usize;
}

unsafe fn carve_from_feed(state: &mut MediumState, size: usize) -> *mut u8 {
    let block_addr = state.feed_ptr;
    state.feed_ptr = state.feed_ptr.add(size);
    state.feed_remaining -= size;
    write_block(block_addr, size, false, false);
    block_addr.add(crate::config::HEADER_SIZE)
}

/// Allocates a medium block of at least `request` bytes.
pub fn alloc_medium(info: &MediumInfo, request: usize, stats: &Stats) -> *mut u8 {
    let size = round_medium(request);
    info.lock.lock(SPIN_BUDGET_MEDIUM, stats, None);
    let result: Option<(*mut u8, usize)> = unsafe {
        let state = &mut *info.state.get();
        ensure_initialized(state);

        let target_bin = bin_index(size);
        if let Some(bin) = find_free_bin(state, target_bin) {
            let block_user_ptr = list_pop_front(bin_sentinel(state, bin));
            bin_vacate_if_empty(state, bin);
            let block_addr = (block_user_ptr as *mut u8).sub(crate::config::HEADER_SIZE);
            let header = header_at(block_addr);
            let block_size = header.size();
            let prev_free = header.prev_medium_free();

            let allocated_size;
            if block_size >= size + MIN_MEDIUM {
                allocated_size = size;
                let suffix_addr = block_addr.add(size);
                let suffix_size = block_size - size;
                write_block(block_addr, size, false, prev_free);
                write_block(suffix_addr, suffix_size, true, false);
                bin_insert(state, suffix_addr.add(crate::config::HEADER_SIZE), suffix_size);
                let following = suffix_addr.add(suffix_size);
                let owner = find_owning_pool(state, suffix_addr);
                let limit = if state.feed_pool == owner { state.feed_ptr } else { pool_bounds(owner).1 };
                if following < limit {
                    set_prev_free_flag(following, true);
                }
            } else {
                allocated_size = block_size;
                write_block(block_addr, block_size, false, prev_free);
                let following = block_addr.add(block_size);
                let owner = find_owning_pool(state, block_addr);
                let limit = if state.feed_pool == owner { state.feed_ptr } else { pool_bounds(owner).1 };
                if following < limit {
                    set_prev_free_flag(following, false);
                }
            }
            Some((block_user_ptr, allocated_size))
        } else if state.feed_remaining >= size {
            Some((carve_from_feed(state, size), size))
        } else {
            if state.feed_remaining > 0 {
                let remainder_addr = state.feed_ptr;
                let remainder_size = state.feed_remaining;
                write_block(remainder_addr, remainder_size, true, false);
                bin_insert(state, remainder_addr.add(crate::config::HEADER_SIZE), remainder_size);
                state.feed_remaining = 0;
            }
            let pool = obtain_super_pool(info, stats);
            if pool.is_null() {
                None
            } else {
                install_new_pool(state, pool);
                Some((carve_from_feed(state, size), size))
            }
        }
    };
    info.lock.unlock();
    match result {
        Some((ptr, allocated_size)) => {
            stats.medium.update((allocated_size - 2 * crate::config::HEADER_SIZE) as i64);
            ptr
        }
        None => null_mut(),
    }
}

unsafe fn free_one(state: &mut MediumState, user_ptr: *mut u8, stats: &Stats) {
    let mut block_addr = (user_ptr as *mut u8).sub(crate::config::HEADER_SIZE);
    let header = header_at(block_addr);
    let mut size = header.size();
    let own_payload = size - 2 * crate::config::HEADER_SIZE;
    let owner = find_owning_pool(state, block_addr);
    if owner.is_null() {
        log::error!("medium free: unexpected pointer {:p} not owned by any super-pool", user_ptr);
        return;
    }
    let (body_start, body_end) = pool_bounds(owner);
    let feed_limit = if state.feed_pool == owner { state.feed_ptr } else { body_end };

    // Merge forward.
    let mut next_addr = block_addr.add(size);
    if next_addr < feed_limit {
        let next_header = header_at(next_addr);
        if next_header.is_free() {
            let next_size = next_header.size();
            bin_remove(state, next_addr.add(crate::config::HEADER_SIZE), next_size);
            size += next_size;
        }
    }

    // Merge backward.
    if header.prev_medium_free() && block_addr > body_start {
        let prev_size = core::ptr::read(block_addr.sub(core::mem::size_of::<usize>()) as *mut usize);
        let prev_addr = block_addr.sub(prev_size);
        if prev_addr >= body_start {
            bin_remove(state, prev_addr.add(crate::config::HEADER_SIZE), prev_size);
            block_addr = prev_addr;
            size += prev_size;
        }
    }

    // Only this block's own payload was ever added to `stats.medium`; any
    // neighbor merged in above already subtracted itself when it was freed.
    stats.medium.update(-(own_payload as i64));

    if size == SUPER_POOL_BODY_SIZE {
        if owner == state.feed_pool {
            state.feed_ptr = body_start;
            state.feed_remaining = SUPER_POOL_BODY_SIZE;
        } else {
            pool_remove(owner);
            stats.segments.update(-(SUPER_POOL_SIZE as i64));
            os::os_free(owner as *mut u8, SUPER_POOL_SIZE, stats);
        }
        return;
    }

    write_block(block_addr, size, true, false);
    next_addr = block_addr.add(size);
    let limit = if state.feed_pool == owner { state.feed_ptr } else { body_end };
    if next_addr < limit {
        set_prev_free_flag(next_addr, true);
    }
    bin_insert(state, block_addr.add(crate::config::HEADER_SIZE), size);
}

/// Frees a medium block, coalescing with free neighbors.
pub fn free_medium(info: &MediumInfo, user_ptr: *mut u8, stats: &Stats) {
    if !info.lock.try_lock() {
        unsafe { info.free_stack.push(user_ptr) };
        return;
    }
    unsafe {
        let state = &mut *info.state.get();
        free_one(state, user_ptr, stats);
        // Drain deferred frees while still holding the lock.
        let mut drained = info.free_stack.drain();
        while !drained.is_null() {
            let next = crate::lock::stack_next(drained);
            free_one(state, drained, stats);
            drained = next;
        }
    }
    info.lock.unlock();
}

/// Reallocates a medium block in place when possible. Returns `None` when
/// the caller must fall back to alloc+copy+free.
pub fn realloc_medium(info: &MediumInfo, user_ptr: *mut u8, new_request: usize, stats: &Stats) -> Option<*mut u8> {
    let new_size = round_medium(new_request);
    info.lock.lock(SPIN_BUDGET_MEDIUM, stats, None);
    let result = unsafe {
        let state = &mut *info.state.get();
        let block_addr = (user_ptr as *mut u8).sub(crate::config::HEADER_SIZE);
        let header = header_at(block_addr);
        let old_size = header.size();
        let old_payload = old_size - 2 * crate::config::HEADER_SIZE;

        if new_request <= old_payload && new_request.saturating_mul(2) >= old_payload {
            Some(user_ptr)
        } else if new_size < old_size {
            let suffix_addr = block_addr.add(new_size);
            let mut suffix_size = old_size - new_size;
            let owner = find_owning_pool(state, block_addr);
            let (_, body_end) = pool_bounds(owner);
            let feed_limit = if state.feed_pool == owner { state.feed_ptr } else { body_end };
            let mut next_addr = suffix_addr.add(suffix_size);
            if next_addr < feed_limit {
                let next_header = header_at(next_addr);
                if next_header.is_free() {
                    let next_size = next_header.size();
                    bin_remove(state, next_addr.add(crate::config::HEADER_SIZE), next_size);
                    suffix_size += next_size;
                }
            }
            let prev_free = header.prev_medium_free();
            write_block(block_addr, new_size, false, prev_free);
            write_block(suffix_addr, suffix_size, true, false);
            bin_insert(state, suffix_addr.add(crate::config::HEADER_SIZE), suffix_size);
            next_addr = suffix_addr.add(suffix_size);
            let limit = if state.feed_pool == owner { state.feed_ptr } else { body_end };
            if next_addr < limit {
                set_prev_free_flag(next_addr, true);
            }
            stats.medium.update(-((old_size - new_size) as i64));
            Some(user_ptr)
        } else {
            let owner = find_owning_pool(state, block_addr);
            let (_, body_end) = pool_bounds(owner);
            let feed_limit = if state.feed_pool == owner { state.feed_ptr } else { body_end };
            let next_addr = block_addr.add(old_size);
            let mut grown_to: Option<usize> = None;
            if next_addr < feed_limit {
                let next_header = header_at(next_addr);
                if next_header.is_free() {
                    let next_size = next_header.size();
                    if old_size + next_size >= new_size {
                        bin_remove(state, next_addr.add(crate::config::HEADER_SIZE), next_size);
                        let combined = old_size + next_size;
                        let prev_free = header.prev_medium_free();
                        if combined >= new_size + MIN_MEDIUM {
                            write_block(block_addr, new_size, false, prev_free);
                            let suffix_addr = block_addr.add(new_size);
                            let suffix_size = combined - new_size;
                            write_block(suffix_addr, suffix_size, true, false);
                            bin_insert(state, suffix_addr.add(crate::config::HEADER_SIZE), suffix_size);
                            let following = suffix_addr.add(suffix_size);
                            if following < feed_limit {
                                set_prev_free_flag(following, true);
                            }
                            grown_to = Some(new_size);
                        } else {
                            write_block(block_addr, combined, false, prev_free);
                            grown_to = Some(combined);
                        }
                    }
                }
            }
            match grown_to {
                Some(final_size) => {
                    stats.medium.update((final_size - old_size) as i64);
                    Some(user_ptr)
                }
                None => None,
            }
        }
    };
    info.lock.unlock();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::Stats;

    #[test]
    fn alloc_free_single_namespace() {
        crate::os::os_init();
        let stats = Stats::new();
        let info = MediumInfo::new();
        let p = alloc_medium(&info, 10_000, &stats);
        assert!(!p.is_null());
        free_medium(&info, p, &stats);
    }

    #[test]
    fn coalesces_three_adjacent_blocks() {
        crate::os::os_init();
        let stats = Stats::new();
        let info = MediumInfo::new();
        let a = alloc_medium(&info, 4096, &stats);
        let b = alloc_medium(&info, 4096, &stats);
        let c = alloc_medium(&info, 4096, &stats);
        assert!(!a.is_null() && !b.is_null() && !c.is_null());
        free_medium(&info, a, &stats);
        free_medium(&info, c, &stats);
        free_medium(&info, b, &stats);
        // After freeing all three, a fresh allocation that fits inside the
        // merged span should succeed without mapping a new super-pool.
        let mmaps_before = stats.mmap_calls.count.load(Ordering::Relaxed);
        let d = alloc_medium(&info, 10_000, &stats);
        assert!(!d.is_null());
        assert_eq!(stats.mmap_calls.count.load(Ordering::Relaxed), mmaps_before);
    }

    #[test]
    fn realloc_preserves_bytes() {
        crate::os::os_init();
        let stats = Stats::new();
        let info = MediumInfo::new();
        let p = alloc_medium(&info, 3000, &stats);
        unsafe {
            core::ptr::write_bytes(p, 0xAB, 3000);
        }
        let q = realloc_medium(&info, p, 20_000, &stats).unwrap_or_else(|| {
            panic!("expected in-place or compatible growth")
        });
        unsafe {
            for i in 0..3000 {
                assert_eq!(*q.add(i), 0xAB);
            }
        }
    }
}
