use std::{
    ptr::{self, NonNull},
    sync::atomic::Ordering,
};

use parking_lot::Mutex;
use tracing::trace;

use crate::{
    ChunkAllocator, Strategy,
    chunk::{self, Chunk, ChunkHeader},
    error::AllocError,
    kernel::{MemorySource, SystemMemory},
    slab::{AllocatorConfig, acquire_slab},
    stats::{AllocatorStats, Counters},
};

/// Singly linked list of free chunks. Only ever touched with the allocator's
/// mutex held, so links are accessed with relaxed ordering: the lock already
/// provides all the synchronization we need.
///
/// ```text
///         +---------+     +---------+     +---------+
/// head -> | H  free | --> | H  free | --> | H  free | --> null
///         +---------+     +---------+     +---------+
/// ```
struct FreeList {
    head: *mut ChunkHeader,
}

// The list only stores pointers into slabs that live forever.
unsafe impl Send for FreeList {}

impl FreeList {
    const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
        }
    }

    /// Makes `header` the new head of the list.
    fn push(&mut self, header: NonNull<ChunkHeader>) {
        unsafe { ChunkHeader::link(header).store(self.head, Ordering::Relaxed) };
        self.head = header.as_ptr();
    }

    /// Unlinks and returns the first chunk that can hold `size` bytes.
    ///
    /// This is first-fit: we scan from the head and stop at the first
    /// candidate, even if a tighter one exists further down.
    fn take_first_fit(&mut self, size: usize) -> Option<NonNull<ChunkHeader>> {
        let mut prev: Option<NonNull<ChunkHeader>> = None;
        let mut current = NonNull::new(self.head);

        while let Some(node) = current {
            unsafe {
                let next = ChunkHeader::link(node).load(Ordering::Relaxed);

                if ChunkHeader::size_of(node) >= size {
                    match prev {
                        None => self.head = next,
                        Some(prev) => ChunkHeader::link(prev).store(next, Ordering::Relaxed),
                    }

                    return Some(node);
                }

                prev = Some(node);
                current = NonNull::new(next);
            }
        }

        None
    }
}

/// Free list allocator where every list mutation happens inside a single
/// [`parking_lot::Mutex`] critical section.
///
/// The lock is held only for a scan/unlink or a push. It is never held while
/// a new slab is requested from the [`MemorySource`], so a slow system call
/// does not stall threads that could be served from the existing pool.
pub struct LockedAllocator<S: MemorySource = SystemMemory> {
    free_list: Mutex<FreeList>,
    source: S,
    config: AllocatorConfig,
    counters: Counters,
}

impl LockedAllocator {
    /// Empty allocator with 64 MiB slabs from [`SystemMemory`].
    pub const fn new() -> Self {
        Self::with_source(SystemMemory, AllocatorConfig::DEFAULT)
    }

    pub const fn with_config(config: AllocatorConfig) -> Self {
        Self::with_source(SystemMemory, config)
    }
}

impl Default for LockedAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: MemorySource> LockedAllocator<S> {
    /// Empty allocator drawing its slabs from `source`. No memory is requested
    /// until the first allocation.
    pub const fn with_source(source: S, config: AllocatorConfig) -> Self {
        Self {
            free_list: Mutex::new(FreeList::new()),
            source,
            config,
            counters: Counters::new(),
        }
    }

    /// Largest request this allocator can serve.
    pub fn slab_capacity(&self) -> usize {
        self.config.chunk_capacity()
    }

    /// Number of chunks on the free list.
    pub fn free_chunks(&mut self) -> usize {
        unsafe { chunk::list_len(self.free_list.get_mut().head) }
    }
}

impl<S: MemorySource> ChunkAllocator for LockedAllocator<S> {
    fn allocate(&self, size: usize) -> Result<Chunk, AllocError> {
        let request = self.config.normalize(size).inspect_err(|_| {
            self.counters.failed();
        })?;

        let header = loop {
            // The guard is dropped at the end of this statement.
            let found = self.free_list.lock().take_first_fit(request);
            if let Some(header) = found {
                break header;
            }

            // Nothing fits. Bootstrap a slab without holding the lock, then
            // retry the scan: another thread may take the new chunk first, in
            // which case we simply go around again.
            let slab = acquire_slab(&self.source, &self.config, Strategy::Locked.name())
                .inspect_err(|_| self.counters.failed())?;
            self.counters.slab_acquired();

            self.free_list.lock().push(slab);
        };

        if let Some(remainder) = unsafe { chunk::split(header, request) } {
            trace!(
                request,
                remainder = unsafe { ChunkHeader::size_of(remainder) },
                "split chunk"
            );
            self.counters.split();
            self.free_list.lock().push(remainder);
        }

        self.counters.allocated();

        Ok(unsafe { Chunk::issue(header) })
    }

    fn free(&self, chunk: Chunk) {
        let header = chunk.into_free_header();
        self.free_list.lock().push(header);
        self.counters.freed();
    }

    fn stats(&self) -> AllocatorStats {
        self.counters.snapshot()
    }

    fn config(&self) -> &AllocatorConfig {
        &self.config
    }
}
