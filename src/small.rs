//! The tiny/small allocator: fixed-slot pools carved from medium-tier
//! blocks, arenas, and the lock-less deferred-free fallback.

use core::ptr::null_mut;
use core::sync::atomic::Ordering;

use crate::config::{
    HEADER_SIZE, MAX_TINY_BLOCK_SIZE, NUM_ARENAS, NUM_TINY_ARENAS, PER_THREAD_ARENA_SELECTION,
    SMALL_POOL_NAMESPACE, SPIN_BUDGET_SMALL,
};
use crate::header::Header;
use crate::init;
use crate::lock::{LockFreeStack, SpinLock};
use crate::medium;
use crate::racy::Racy;
use crate::sizeclass::{class_index, class_size, NUM_SIZE_CLASSES};
use crate::stats::Stats;

/// Size of the medium-tier block requested to back each small pool. Rounded
/// up by the medium allocator's own granularity; the pool's actual capacity
/// is derived from whatever usable size comes back, not this nominal value.
const SMALL_POOL_BACKING_SIZE: usize = 64 * 1024;

/// One carved-out chunk of equal-size slots.
#[repr(C)]
struct SmallPool {
    prev: *mut SmallPool,
    next: *mut SmallPool,
    /// Owning size-class record, for the free path to find the right lock.
    owner: *mut SizeClassRecord,
    /// LIFO list of slots that have been allocated at least once and freed.
    free_list: *mut u8,
    slots_base: *mut u8,
    capacity: u32,
    free_count: u32,
    class_idx: u32,
}

struct SizeClassState {
    /// Head of the list of pools with at least one slot available (either
    /// on `free_list`, or -- for the pool pointed to by `feed_pool` -- still
    /// virgin capacity). Plain doubly-linked, not circular: removed pools
    /// are unlinked in O(1), and an empty record has a null head.
    partial_head: *mut SmallPool,
    feed_pool: *mut SmallPool,
    feed_next_slot: u32,
}

impl SizeClassState {
    const fn new() -> SizeClassState {
        SizeClassState { partial_head: null_mut(), feed_pool: null_mut(), feed_next_slot: 0 }
    }
}

/// Per-size-class, per-arena allocation state. The sequential-feed cursor
/// lives here, not on the pool, so a
/// pool only ever tracks its own slots while the record tracks which pool
/// is currently being carved.
pub struct SizeClassRecord {
    lock: SpinLock,
    free_stack: LockFreeStack,
    state: Racy<SizeClassState>,
}

impl SizeClassRecord {
    const fn new() -> SizeClassRecord {
        SizeClassRecord { lock: SpinLock::new(), free_stack: LockFreeStack::new(), state: Racy::new(SizeClassState::new()) }
    }
}

macro_rules! size_class_record_array {
    () => {
        [
            SizeClassRecord::new(), SizeClassRecord::new(), SizeClassRecord::new(), SizeClassRecord::new(),
            SizeClassRecord::new(), SizeClassRecord::new(), SizeClassRecord::new(), SizeClassRecord::new(),
            SizeClassRecord::new(), SizeClassRecord::new(), SizeClassRecord::new(), SizeClassRecord::new(),
            SizeClassRecord::new(), SizeClassRecord::new(), SizeClassRecord::new(), SizeClassRecord::new(),
            SizeClassRecord::new(), SizeClassRecord::new(), SizeClassRecord::new(), SizeClassRecord::new(),
            SizeClassRecord::new(), SizeClassRecord::new(), SizeClassRecord::new(), SizeClassRecord::new(),
            SizeClassRecord::new(), SizeClassRecord::new(), SizeClassRecord::new(), SizeClassRecord::new(),
            SizeClassRecord::new(), SizeClassRecord::new(), SizeClassRecord::new(), SizeClassRecord::new(),
            SizeClassRecord::new(), SizeClassRecord::new(), SizeClassRecord::new(), SizeClassRecord::new(),
            SizeClassRecord::new(), SizeClassRecord::new(), SizeClassRecord::new(), SizeClassRecord::new(),
            SizeClassRecord::new(), SizeClassRecord::new(), SizeClassRecord::new(), SizeClassRecord::new(),
            SizeClassRecord::new(), SizeClassRecord::new(),
        ]
    };
}

/// One arena: a full copy of the size-class table. Tiny arenas only ever
/// see lookups for tiny-range classes; the dispatch logic enforces that,
/// so there is no need for a separate, smaller record type here.
pub struct Arena {
    records: [SizeClassRecord; NUM_SIZE_CLASSES],
}

impl Arena {
    const fn new() -> Arena {
        Arena { records: size_class_record_array!() }
    }
}

/// The `NUM_TINY_ARENAS` tiny arenas plus the single main `Small` array:
/// `NUM_ARENAS == NUM_TINY_ARENAS + 1` in total, with the main array
/// always reachable at index `NUM_TINY_ARENAS`.
pub struct Arenas {
    tiny: [Arena; NUM_TINY_ARENAS],
    main: Arena,
}

impl Arenas {
    pub const fn new() -> Arenas {
        Arenas { tiny: tiny_arena_array(), main: Arena::new() }
    }

    fn get(&self, idx: usize) -> &Arena {
        if idx == NUM_TINY_ARENAS {
            &self.main
        } else {
            &self.tiny[idx]
        }
    }
}

#[cfg(not(feature = "booster"))]
const fn tiny_arena_array() -> [Arena; NUM_TINY_ARENAS] {
    [Arena::new(), Arena::new(), Arena::new(), Arena::new(), Arena::new(), Arena::new(), Arena::new()]
}

#[cfg(feature = "booster")]
const fn tiny_arena_array() -> [Arena; NUM_TINY_ARENAS] {
    // 127 entries; built with repeated literals since `[Arena::new(); N]`
    // requires `Arena: Copy`, which it deliberately is not.
    let mut arenas: [core::mem::MaybeUninit<Arena>; NUM_TINY_ARENAS] =
        unsafe { core::mem::MaybeUninit::uninit().assume_init() };
    let mut i = 0;
    while i < NUM_TINY_ARENAS {
        arenas[i] = core::mem::MaybeUninit::new(Arena::new());
        i += 1;
    }
    unsafe { core::mem::transmute_copy(&arenas) }
}

/// Picks a tiny-arena index in `[0, NUM_ARENAS)`: round-robin by default,
/// per-thread Knuth hash under `booster` -- the top `arena_bits()` bits of
/// the 32-bit hash, per spec's `(KNUTH_HASH32 * thread_id) >> (32 - A_BITS)`.
#[inline]
fn pick_tiny_arena() -> usize {
    if PER_THREAD_ARENA_SELECTION {
        let bits = crate::config::arena_bits();
        let hash = init::knuth_hash32(init::thread_id());
        ((hash >> (32 - bits)) as usize) % NUM_ARENAS
    } else {
        init::next_round_robin() % NUM_ARENAS
    }
}

#[inline]
unsafe fn slot_header_at(pool: *mut SmallPool, slot: u32) -> *mut u8 {
    let slot_size = class_size((*pool).class_idx as usize);
    (*pool).slots_base.add(slot as usize * slot_size)
}

unsafe fn unlink_partial(state: &mut SizeClassState, pool: *mut SmallPool) {
    if (*pool).prev.is_null() {
        state.partial_head = (*pool).next;
    } else {
        (*(*pool).prev).next = (*pool).next;
    }
    if !(*pool).next.is_null() {
        (*(*pool).next).prev = (*pool).prev;
    }
    (*pool).prev = null_mut();
    (*pool).next = null_mut();
}

unsafe fn link_partial_front(state: &mut SizeClassState, pool: *mut SmallPool) {
    (*pool).prev = null_mut();
    (*pool).next = state.partial_head;
    if !state.partial_head.is_null() {
        (*state.partial_head).prev = pool;
    }
    state.partial_head = pool;
}

/// Creates a new backing pool for `class_idx` on `record`, wiring it up as
/// the new feed pool: no existing pool has room, so map a fresh
/// medium-tier-backed chunk.
unsafe fn grow_new_pool(
    record: &SizeClassRecord,
    state: &mut SizeClassState,
    class_idx: usize,
    stats: &Stats,
) -> bool {
    let medium_info = init::medium().get(SMALL_POOL_NAMESPACE);
    let medium_ptr = medium::alloc_medium(medium_info, SMALL_POOL_BACKING_SIZE, stats);
    if medium_ptr.is_null() {
        return false;
    }
    Header::from_user_ptr(medium_ptr).set_small_pool_in_use(true);

    let usable = Header::from_user_ptr(medium_ptr).size() - 2 * HEADER_SIZE;
    let pool_struct_addr = medium_ptr.add(HEADER_SIZE) as *mut SmallPool;
    let slot_size = class_size(class_idx);
    let reserved_for_header = core::mem::size_of::<SmallPool>();
    let slots_base = (pool_struct_addr as *mut u8).add(reserved_for_header);
    let capacity = ((usable - reserved_for_header) / slot_size) as u32;

    core::ptr::write(
        pool_struct_addr,
        SmallPool {
            prev: null_mut(),
            next: null_mut(),
            owner: record as *const SizeClassRecord as *mut SizeClassRecord,
            free_list: null_mut(),
            slots_base,
            capacity,
            free_count: 0,
            class_idx: class_idx as u32,
        },
    );

    link_partial_front(state, pool_struct_addr);
    state.feed_pool = pool_struct_addr;
    state.feed_next_slot = 0;
    true
}

/// Allocates one `class_idx`-sized slot from `record`.
unsafe fn carve(record: &SizeClassRecord, state: &mut SizeClassState, class_idx: usize, stats: &Stats) -> *mut u8 {
    // Prefer a returned slot over virgin capacity: keeps hot pools hot.
    let mut pool = state.partial_head;
    while !pool.is_null() {
        if !(*pool).free_list.is_null() {
            let slot = (*pool).free_list;
            (*pool).free_list = crate::lock::stack_next(slot);
            (*pool).free_count -= 1;
            Header::from_user_ptr(slot).set_free(false);
            if (*pool).free_list.is_null() && !is_still_feedable(state, pool) {
                unlink_partial(state, pool);
            }
            let _ = stats;
            return slot;
        }
        pool = (*pool).next;
    }

    if !state.feed_pool.is_null() && state.feed_next_slot < (*state.feed_pool).capacity {
        let pool = state.feed_pool;
        let header_addr = slot_header_at(pool, state.feed_next_slot);
        state.feed_next_slot += 1;
        let user_ptr = header_addr.add(HEADER_SIZE);
        Header::from_user_ptr(user_ptr).write_small(pool as *mut u8, 0);
        if state.feed_next_slot == (*pool).capacity && (*pool).free_list.is_null() {
            unlink_partial(state, pool);
            state.feed_pool = null_mut();
        }
        return user_ptr;
    }

    if grow_new_pool(record, state, class_idx, stats) {
        return carve(record, state, class_idx, stats);
    }
    null_mut()
}

unsafe fn is_still_feedable(state: &SizeClassState, pool: *mut SmallPool) -> bool {
    state.feed_pool == pool && state.feed_next_slot < (*pool).capacity
}

/// Allocates a tiny/small block of at least `request` bytes.
pub fn alloc_small(arenas: &Arenas, request: usize, stats: &Stats) -> *mut u8 {
    let total = request + HEADER_SIZE;
    let class_idx = class_index(total);
    let tiny = class_size(class_idx) <= MAX_TINY_BLOCK_SIZE;
    let arena_idx = if tiny { pick_tiny_arena() } else { NUM_TINY_ARENAS };
    let arena = arenas.get(arena_idx);
    let record = &arena.records[class_idx];

    record.lock.lock(SPIN_BUDGET_SMALL, stats, Some(class_idx));
    stats.size_classes[class_idx].getmem_count.fetch_add(1, Ordering::Relaxed);
    let user_ptr = unsafe {
        let state = &mut *record.state.get();
        carve(record, state, class_idx, stats)
    };
    record.lock.unlock();

    if !user_ptr.is_null() {
        stats.small.update((class_size(class_idx) - HEADER_SIZE) as i64);
    }
    user_ptr
}

unsafe fn free_one_slot(state: &mut SizeClassState, user_ptr: *mut u8, stats: &Stats) -> usize {
    let header = Header::from_user_ptr(user_ptr);
    let pool = header.pool_ptr() as *mut SmallPool;
    let class_idx = (*pool).class_idx as usize;

    header.set_free(true);
    core::ptr::write(user_ptr as *mut *mut u8, (*pool).free_list);
    (*pool).free_list = user_ptr;
    (*pool).free_count += 1;
    stats.size_classes[class_idx].freemem_count.fetch_add(1, Ordering::Relaxed);
    stats.small.update(-((class_size(class_idx) - HEADER_SIZE) as i64));

    if (*pool).prev.is_null() && (*pool).next.is_null() && state.partial_head != pool {
        link_partial_front(state, pool);
    }

    let fully_carved = !(state.feed_pool == pool) || state.feed_next_slot == (*pool).capacity;
    if fully_carved && (*pool).free_count == (*pool).capacity {
        unlink_partial(state, pool);
        if state.feed_pool == pool {
            state.feed_pool = null_mut();
        }
        let medium_ptr = (pool as *mut u8).sub(HEADER_SIZE);
        let medium_info = init::medium().get(SMALL_POOL_NAMESPACE);
        medium::free_medium(medium_info, medium_ptr, stats);
    }

    class_size(class_idx) - HEADER_SIZE
}

/// Frees a tiny/small block, deferring to the lock-less stack on
/// contention and draining it once the lock is held.
pub fn free_small(arenas: &Arenas, user_ptr: *mut u8, stats: &Stats) -> usize {
    let _ = arenas;
    unsafe {
        let header = Header::from_user_ptr(user_ptr);
        let pool = header.pool_ptr() as *mut SmallPool;
        let record = &*(*pool).owner;
        let class_idx = (*pool).class_idx as usize;
        let nominal = class_size(class_idx) - HEADER_SIZE;

        if !record.lock.try_lock() {
            record.free_stack.push(user_ptr);
            return nominal;
        }

        let state = &mut *record.state.get();
        free_one_slot(state, user_ptr, stats);
        let mut drained = record.free_stack.drain();
        while !drained.is_null() {
            let next = crate::lock::stack_next(drained);
            free_one_slot(state, drained, stats);
            drained = next;
        }
        record.lock.unlock();
        nominal
    }
}

/// Grows or shrinks in place when the existing slot already fits; otherwise
/// returns `None` so the caller falls back to alloc+copy+free. Fixed slot
/// sizes mean realloc is just a fit check.
pub fn realloc_small(user_ptr: *mut u8, new_request: usize) -> Option<*mut u8> {
    unsafe {
        let header = Header::from_user_ptr(user_ptr);
        let pool = header.pool_ptr() as *mut SmallPool;
        let capacity = class_size((*pool).class_idx as usize) - HEADER_SIZE;
        if new_request <= capacity {
            Some(user_ptr)
        } else {
            None
        }
    }
}

/// The nominal (class) size of a live tiny/small allocation.
pub fn size_of_small(user_ptr: *mut u8) -> usize {
    unsafe {
        let header = Header::from_user_ptr(user_ptr);
        let pool = header.pool_ptr() as *mut SmallPool;
        class_size((*pool).class_idx as usize) - HEADER_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_free_small_roundtrip() {
        crate::os::os_init();
        let stats = Stats::new();
        let arenas = Arenas::new();
        let p = alloc_small(&arenas, 24, &stats);
        assert!(!p.is_null());
        assert_eq!(p as usize % 8, 0);
        free_small(&arenas, p, &stats);
    }

    #[test]
    fn reuses_freed_slot_before_growing_pool() {
        crate::os::os_init();
        let stats = Stats::new();
        let arenas = Arenas::new();
        let a = alloc_small(&arenas, 32, &stats);
        free_small(&arenas, a, &stats);
        let b = alloc_small(&arenas, 32, &stats);
        assert_eq!(a, b);
    }

    #[test]
    fn realloc_in_place_when_class_still_fits() {
        crate::os::os_init();
        let stats = Stats::new();
        let arenas = Arenas::new();
        let p = alloc_small(&arenas, 10, &stats);
        assert_eq!(realloc_small(p, 14), Some(p));
        free_small(&arenas, p, &stats);
    }
}
