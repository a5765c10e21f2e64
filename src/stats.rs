use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of an allocator's counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Slabs obtained from the memory source.
    pub slabs_acquired: u64,
    /// Successful allocations.
    pub allocations: u64,
    /// Chunks handed back through `free`.
    pub frees: u64,
    /// Allocations that split their chunk and published a remainder.
    pub splits: u64,
    /// Allocations that returned an error.
    pub failures: u64,
}

impl AllocatorStats {
    /// Chunks currently held by callers.
    pub fn live_chunks(&self) -> u64 {
        self.allocations.saturating_sub(self.frees)
    }
}

/// Counters shared by all threads using one allocator. Relaxed everywhere:
/// they are diagnostics and never order any other memory access.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    slabs_acquired: AtomicU64,
    allocations: AtomicU64,
    frees: AtomicU64,
    splits: AtomicU64,
    failures: AtomicU64,
}

impl Counters {
    pub const fn new() -> Self {
        Self {
            slabs_acquired: AtomicU64::new(0),
            allocations: AtomicU64::new(0),
            frees: AtomicU64::new(0),
            splits: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn slab_acquired(&self) {
        self.slabs_acquired.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn allocated(&self) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn freed(&self) {
        self.frees.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn split(&self) {
        self.splits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn failed(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> AllocatorStats {
        AllocatorStats {
            slabs_acquired: self.slabs_acquired.load(Ordering::Relaxed),
            allocations: self.allocations.load(Ordering::Relaxed),
            frees: self.frees.load(Ordering::Relaxed),
            splits: self.splits.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let counters = Counters::new();
        counters.slab_acquired();
        counters.allocated();
        counters.allocated();
        counters.split();
        counters.freed();
        counters.failed();

        let stats = counters.snapshot();
        assert_eq!(
            AllocatorStats {
                slabs_acquired: 1,
                allocations: 2,
                frees: 1,
                splits: 1,
                failures: 1,
            },
            stats
        );
        assert_eq!(1, stats.live_chunks());
    }
}
