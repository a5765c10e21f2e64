#![allow(dead_code)]

use std::{
    ptr::NonNull,
    sync::{
        Arc, mpsc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use chunkalloc::{
    AllocatorConfig, ChunkAllocator, LockFreeAllocator, LockedAllocator, MemorySource, Strategy,
    SystemMemory,
};

#[derive(Clone, Copy, Debug)]
pub struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    pub fn new(seed: u64) -> Self {
        Self { state: seed.max(1) }
    }

    pub fn next_u64(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    pub fn gen_range_usize(&mut self, low: usize, high_inclusive: usize) -> usize {
        assert!(low <= high_inclusive);
        let span = high_inclusive - low + 1;
        low + (self.next_u64() as usize % span)
    }
}

/// System memory that counts requests and refuses everything past `limit`.
#[derive(Debug)]
pub struct MeteredMemory {
    requests: AtomicUsize,
    limit: usize,
}

impl MeteredMemory {
    pub fn unlimited() -> Self {
        Self::limited(usize::MAX)
    }

    pub fn limited(limit: usize) -> Self {
        Self {
            requests: AtomicUsize::new(0),
            limit,
        }
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

unsafe impl MemorySource for MeteredMemory {
    fn request(&self, len: usize) -> Option<NonNull<u8>> {
        let previous = self.requests.fetch_add(1, Ordering::SeqCst);
        if previous >= self.limit {
            return None;
        }

        SystemMemory.request(len)
    }
}

/// Builds `strategy` on top of `source`.
pub fn build<S: MemorySource + 'static>(
    strategy: Strategy,
    source: S,
    config: AllocatorConfig,
) -> Arc<dyn ChunkAllocator> {
    match strategy {
        Strategy::Locked => Arc::new(LockedAllocator::with_source(source, config)),
        Strategy::LockFree => Arc::new(LockFreeAllocator::with_source(source, config)),
    }
}

/// Runs `f` on its own thread and fails the test if it does not finish within
/// `limit`, which is how a deadlock or livelock shows up.
pub fn within<T, F>(limit: Duration, f: F) -> T
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(f());
    });

    rx.recv_timeout(limit)
        .expect("allocator run did not complete in time")
}
