use thiserror::Error;

/// Failures surfaced by [`crate::ChunkAllocator::allocate`] and by
/// [`crate::AllocatorConfig::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The memory source could not provide a new slab.
    #[error("memory source could not provide a {slab_size} byte slab")]
    OutOfMemory { slab_size: usize },

    /// The request is larger than the usable capacity of a single slab, so no
    /// amount of bootstrapping could ever serve it.
    #[error("requested {requested} bytes but a slab holds at most {capacity} bytes")]
    ExceedsSlabCapacity { requested: usize, capacity: usize },

    /// The configured slab cannot hold a header plus the smallest chunk.
    #[error("slab size {slab_size} is below the minimum of {minimum} bytes")]
    InvalidSlabSize { slab_size: usize, minimum: usize },
}

impl AllocError {
    /// Whether this error means the allocation could not be satisfied for lack
    /// of memory, either right now or ever.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(
            self,
            AllocError::OutOfMemory { .. } | AllocError::ExceedsSlabCapacity { .. }
        )
    }
}
