//! Slab bootstrap: the only place where the allocators talk to their
//! [`MemorySource`].

use std::ptr::NonNull;

use tracing::{debug, warn};

use crate::{
    chunk::{self, CHUNK_ALIGN, ChunkHeader, HEADER_SIZE, MIN_CHUNK_SIZE},
    error::AllocError,
    kernel::MemorySource,
};

/// Default slab size, 64 MiB.
pub const DEFAULT_SLAB_SIZE: usize = 64 * 1024 * 1024;

/// Tunables shared by both allocators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorConfig {
    slab_size: usize,
}

impl AllocatorConfig {
    pub const DEFAULT: Self = Self {
        slab_size: DEFAULT_SLAB_SIZE,
    };

    /// Smallest slab that still fits one header plus the smallest chunk.
    pub const MIN_SLAB_SIZE: usize = HEADER_SIZE + MIN_CHUNK_SIZE;

    /// Builds a configuration with slabs of `slab_size` bytes, header
    /// included.
    pub fn new(slab_size: usize) -> Result<Self, AllocError> {
        if slab_size < Self::MIN_SLAB_SIZE {
            return Err(AllocError::InvalidSlabSize {
                slab_size,
                minimum: Self::MIN_SLAB_SIZE,
            });
        }

        Ok(Self { slab_size })
    }

    /// Bytes requested from the memory source on every bootstrap.
    #[inline]
    pub fn slab_size(&self) -> usize {
        self.slab_size
    }

    /// Usable bytes of the chunk carved out of a fresh slab. This is also the
    /// largest request an allocator can ever serve.
    #[inline]
    pub fn chunk_capacity(&self) -> usize {
        // Keep the first chunk a multiple of the header alignment so that
        // every split boundary stays aligned.
        (self.slab_size - HEADER_SIZE) & !(CHUNK_ALIGN - 1)
    }

    /// Normalizes a caller's request and checks it against
    /// [`AllocatorConfig::chunk_capacity`]. A request that fails here could
    /// never be served, no matter how many slabs are acquired.
    pub fn normalize(&self, size: usize) -> Result<usize, AllocError> {
        let capacity = self.chunk_capacity();

        match chunk::normalize_request(size) {
            Some(request) if request <= capacity => Ok(request),
            _ => {
                warn!(size, capacity, "request can never fit in a slab");
                Err(AllocError::ExceedsSlabCapacity {
                    requested: size,
                    capacity,
                })
            }
        }
    }
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Requests one slab from `source` and writes a single Free chunk spanning
/// all of it. The chunk is not linked anywhere; inserting it into a free list
/// is the caller's job.
///
/// Exactly one call to [`MemorySource::request`] per invocation. Failures are
/// reported, never retried. `strategy` only labels the log events.
pub(crate) fn acquire_slab<S: MemorySource + ?Sized>(
    source: &S,
    config: &AllocatorConfig,
    strategy: &str,
) -> Result<NonNull<ChunkHeader>, AllocError> {
    let slab_size = config.slab_size();

    let Some(addr) = source.request(slab_size) else {
        warn!(strategy, slab_size, "memory source refused slab request");
        return Err(AllocError::OutOfMemory { slab_size });
    };

    debug!(strategy, slab_size, addr = ?addr, "acquired slab");

    // SAFETY: `MemorySource` guarantees `slab_size` writable, aligned bytes
    // that belong to us from now on.
    Ok(unsafe { ChunkHeader::init(addr, config.chunk_capacity()) })
}
