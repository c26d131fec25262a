//! Allocator statistics. Read by an external status pretty-printer, never
//! written by it.

use core::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::config::DEBUG_STATS;
use crate::sizeclass::NUM_SIZE_CLASSES;

/// Current / cumulative / peak tracking for one tier.
pub struct StatCount {
    pub current: AtomicI64,
    pub allocated: AtomicI64,
    pub freed: AtomicI64,
    pub peak: AtomicI64,
}

impl StatCount {
    pub const fn new() -> StatCount {
        StatCount {
            current: AtomicI64::new(0),
            allocated: AtomicI64::new(0),
            freed: AtomicI64::new(0),
            peak: AtomicI64::new(0),
        }
    }

    /// `amount > 0` grows current/allocated; `amount < 0` shrinks
    /// current/freed. Spec.md §4.6 allows approximate (non-atomic) counters
    /// in release builds; we keep atomics uniformly since the cost is small
    /// and a torn counter would be a worse surprise for callers of
    /// `current_heap_status`. The distinction release builds actually skip
    /// is the richer per-arena breakdown, gated by `DEBUG_STATS` at call
    /// sites that would otherwise walk every arena.
    pub fn update(&self, amount: i64) {
        if amount == 0 {
            return;
        }
        let current = self.current.fetch_add(amount, Ordering::Relaxed) + amount;
        if amount > 0 {
            self.allocated.fetch_add(amount, Ordering::Relaxed);
            let mut peak = self.peak.load(Ordering::Relaxed);
            while current > peak {
                match self.peak.compare_exchange_weak(
                    peak,
                    current,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => break,
                    Err(actual) => peak = actual,
                }
            }
        } else {
            self.freed.fetch_add(-amount, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatCountSnapshot {
        StatCountSnapshot {
            current: self.current.load(Ordering::Relaxed),
            allocated: self.allocated.load(Ordering::Relaxed),
            freed: self.freed.load(Ordering::Relaxed),
            peak: self.peak.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatCountSnapshot {
    pub current: i64,
    pub allocated: i64,
    pub freed: i64,
    pub peak: i64,
}

/// A simple total/count accumulator.
pub struct StatCounter {
    pub total: AtomicI64,
    pub count: AtomicI64,
}

impl StatCounter {
    pub const fn new() -> StatCounter {
        StatCounter { total: AtomicI64::new(0), count: AtomicI64::new(0) }
    }
}

/// Per-size-class contention counters, plus the getmem/freemem pair used
/// to derive currently-outstanding counts.
pub struct SizeClassStats {
    pub sleep_count: AtomicU64,
    pub getmem_count: AtomicU64,
    pub freemem_count: AtomicU64,
}

impl SizeClassStats {
    pub const fn new() -> SizeClassStats {
        SizeClassStats {
            sleep_count: AtomicU64::new(0),
            getmem_count: AtomicU64::new(0),
            freemem_count: AtomicU64::new(0),
        }
    }
}

macro_rules! size_class_array {
    () => {
        [
            SizeClassStats::new(), SizeClassStats::new(), SizeClassStats::new(), SizeClassStats::new(),
            SizeClassStats::new(), SizeClassStats::new(), SizeClassStats::new(), SizeClassStats::new(),
            SizeClassStats::new(), SizeClassStats::new(), SizeClassStats::new(), SizeClassStats::new(),
            SizeClassStats::new(), SizeClassStats::new(), SizeClassStats::new(), SizeClassStats::new(),
            SizeClassStats::new(), SizeClassStats::new(), SizeClassStats::new(), SizeClassStats::new(),
            SizeClassStats::new(), SizeClassStats::new(), SizeClassStats::new(), SizeClassStats::new(),
            SizeClassStats::new(), SizeClassStats::new(), SizeClassStats::new(), SizeClassStats::new(),
            SizeClassStats::new(), SizeClassStats::new(), SizeClassStats::new(), SizeClassStats::new(),
            SizeClassStats::new(), SizeClassStats::new(), SizeClassStats::new(), SizeClassStats::new(),
            SizeClassStats::new(), SizeClassStats::new(), SizeClassStats::new(), SizeClassStats::new(),
            SizeClassStats::new(), SizeClassStats::new(), SizeClassStats::new(), SizeClassStats::new(),
            SizeClassStats::new(), SizeClassStats::new(),
        ]
    };
}

/// Global statistics. One instance lives in process-wide state.
pub struct Stats {
    pub small: StatCount,
    pub medium: StatCount,
    pub large: StatCount,
    pub segments: StatCount,
    pub mmap_calls: StatCounter,
    pub sleep_count: StatCounter,
    pub size_classes: [SizeClassStats; NUM_SIZE_CLASSES],
}

impl Stats {
    pub const fn new() -> Stats {
        Stats {
            small: StatCount::new(),
            medium: StatCount::new(),
            large: StatCount::new(),
            segments: StatCount::new(),
            mmap_calls: StatCounter::new(),
            sleep_count: StatCounter::new(),
            size_classes: size_class_array!(),
        }
    }

    pub fn record_sleep(&self, class_idx: Option<usize>) {
        self.sleep_count.total.fetch_add(1, Ordering::Relaxed);
        self.sleep_count.count.fetch_add(1, Ordering::Relaxed);
        if let Some(idx) = class_idx {
            self.size_classes[idx].sleep_count.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// A snapshot of the whole-process allocator status, consumed by an
/// external pretty printer.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeapStatus {
    pub small: StatCountSnapshot,
    pub medium: StatCountSnapshot,
    pub large: StatCountSnapshot,
    pub segments: StatCountSnapshot,
    pub mmap_calls: i64,
    pub sleep_count: i64,
    pub debug_stats_enabled: bool,
}

/// One size class's external-facing status row: its nominal size,
/// lifetime allocation count, and currently-outstanding count (derived as
/// `getmem_count - freemem_count`).
#[derive(Clone, Copy, Debug, Default)]
pub struct SmallBlockStat {
    pub block_size: u32,
    pub total: u64,
    pub current: u64,
}

/// One size class's contention row.
#[derive(Clone, Copy, Debug, Default)]
pub struct SmallBlockContention {
    pub block_size: u32,
    pub sleep_count: u64,
}

/// Sort order for [`small_block_status`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortOrder {
    AscendingSize,
    DescendingSize,
}

/// Fills a `[SmallBlockStat; NUM_SIZE_CLASSES]`-sized buffer with up to
/// `max` rows (one per size class, `class_size` from [`crate::sizeclass`]),
/// sorted per `order`. Returns the number of rows written. A fixed-size
/// stack buffer is used throughout since this crate has no heap to lend
/// its own caller -- the status printer is an external, out-of-scope
/// collaborator that only reads this data.
pub fn small_block_status(
    stats: &Stats,
    max: usize,
    order: SortOrder,
) -> ([SmallBlockStat; NUM_SIZE_CLASSES], usize) {
    let mut rows = [SmallBlockStat::default(); NUM_SIZE_CLASSES];
    for (idx, row) in rows.iter_mut().enumerate() {
        let class = &stats.size_classes[idx];
        let total = class.getmem_count.load(Ordering::Relaxed);
        let freed = class.freemem_count.load(Ordering::Relaxed);
        row.block_size = crate::sizeclass::class_size(idx) as u32;
        row.total = total;
        row.current = total.saturating_sub(freed);
    }
    if order == SortOrder::DescendingSize {
        rows.reverse();
    }
    let count = max.min(NUM_SIZE_CLASSES);
    (rows, count)
}

/// Fills a `[SmallBlockContention; NUM_SIZE_CLASSES]`-sized buffer with the
/// `max` most-contended size classes (highest sleep count first). Classes
/// that never slept are omitted.
pub fn small_block_contention(stats: &Stats, max: usize) -> ([SmallBlockContention; NUM_SIZE_CLASSES], usize) {
    let mut rows = [SmallBlockContention::default(); NUM_SIZE_CLASSES];
    let mut count = 0;
    for idx in 0..NUM_SIZE_CLASSES {
        let sleeps = stats.size_classes[idx].sleep_count.load(Ordering::Relaxed);
        if sleeps == 0 {
            continue;
        }
        rows[count] = SmallBlockContention { block_size: crate::sizeclass::class_size(idx) as u32, sleep_count: sleeps };
        count += 1;
    }
    // Selection sort descending by sleep_count: count <= NUM_SIZE_CLASSES (46),
    // so an O(n^2) pass is cheaper than pulling in a heap-backed sort.
    for i in 0..count {
        let mut max_idx = i;
        for j in (i + 1)..count {
            if rows[j].sleep_count > rows[max_idx].sleep_count {
                max_idx = j;
            }
        }
        rows.swap(i, max_idx);
    }
    (rows, count.min(max))
}

pub fn snapshot(stats: &Stats) -> HeapStatus {
    HeapStatus {
        small: stats.small.snapshot(),
        medium: stats.medium.snapshot(),
        large: stats.large.snapshot(),
        segments: stats.segments.snapshot(),
        mmap_calls: stats.mmap_calls.total.load(Ordering::Relaxed),
        sleep_count: stats.sleep_count.total.load(Ordering::Relaxed),
        debug_stats_enabled: DEBUG_STATS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_tracks_max_current() {
        let s = StatCount::new();
        s.update(100);
        s.update(-40);
        s.update(50);
        let snap = s.snapshot();
        assert_eq!(snap.current, 110);
        assert_eq!(snap.peak, 110);
        assert_eq!(snap.allocated, 150);
        assert_eq!(snap.freed, 40);
    }
}
