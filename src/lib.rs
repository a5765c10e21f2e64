//! Chunk sub-allocator built on top of large slabs obtained from the system.
//!
//! Two interchangeable strategies manage the pool of free chunks:
//!
//! - [`LockedAllocator`]: a singly linked free list behind a mutex.
//! - [`LockFreeAllocator`]: a Treiber stack updated with compare-and-swap.
//!
//! Both implement [`ChunkAllocator`], carve chunks out of slabs with the same
//! first-fit plus split policy and share the [`Chunk`] representation, so
//! they can be swapped freely and benchmarked against each other.
//!
//! ```text
//!                 Free list
//!
//!        +-----------+    +-----------+    +-----------+
//! head ->|H| free    | -> |H| free    | -> |H| free    | -> null
//!        +-----------+    +-----------+    +-----------+
//!
//!     Slab (64 MiB by default, never returned to the system)
//! +---+----------+---+----------+---+-----------------------------+
//! | H | issued   | H | issued   | H |      remainder (free)       |
//! +---+----------+---+----------+---+-----------------------------+
//! ```
//!
//! Freed chunks are never merged with their neighbours, so fragmentation only
//! grows over the life of an allocator.

mod chunk;
mod error;
mod kernel;
mod locked;
mod lockfree;
mod slab;
mod stats;
mod utils;

pub use chunk::{CHUNK_ALIGN, Chunk, ChunkState, HEADER_SIZE, MIN_CHUNK_SIZE};
pub use error::AllocError;
pub use kernel::{MemorySource, SystemMemory, page_size};
pub use locked::LockedAllocator;
pub use lockfree::LockFreeAllocator;
pub use slab::{AllocatorConfig, DEFAULT_SLAB_SIZE};
pub use stats::AllocatorStats;

/// Contract shared by every free list strategy.
pub trait ChunkAllocator: Send + Sync {
    /// Returns a chunk whose payload can hold at least `size` bytes.
    ///
    /// Requests are served first-fit from the free list. An oversized chunk is
    /// split and its tail goes back to the list. When nothing fits a new slab
    /// is requested from the memory source.
    fn allocate(&self, size: usize) -> Result<Chunk, AllocError>;

    /// Gives `chunk` back to the free list. It is not merged with anything.
    fn free(&self, chunk: Chunk);

    /// Snapshot of the allocator's counters.
    fn stats(&self) -> AllocatorStats;

    /// Configuration the allocator was built with.
    fn config(&self) -> &AllocatorConfig;
}

/// Free list strategy, for callers that pick one at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    Locked,
    LockFree,
}

impl Strategy {
    pub const ALL: [Strategy; 2] = [Strategy::Locked, Strategy::LockFree];

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Locked => "lock-based",
            Strategy::LockFree => "lock-free",
        }
    }

    /// Builds an allocator of this strategy backed by [`SystemMemory`].
    pub fn build(&self, config: AllocatorConfig) -> Box<dyn ChunkAllocator> {
        match self {
            Strategy::Locked => Box::new(LockedAllocator::with_config(config)),
            Strategy::LockFree => Box::new(LockFreeAllocator::with_config(config)),
        }
    }
}
