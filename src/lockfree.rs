use std::{
    ptr::{self, NonNull},
    sync::atomic::{AtomicPtr, Ordering},
};

use tracing::trace;

use crate::{
    ChunkAllocator, Strategy,
    chunk::{self, Chunk, ChunkHeader},
    error::AllocError,
    kernel::{MemorySource, SystemMemory},
    slab::{AllocatorConfig, acquire_slab},
    stats::{AllocatorStats, Counters},
};

/// Treiber stack of free chunks. [`FreeStack::pop`] and
/// [`FreeStack::push_chain`] are the only operations that modify `head`.
///
/// # Progress
///
/// Both operations are lock-free but not wait-free: some thread always makes
/// progress, but an individual thread may lose the CAS race any number of
/// times under contention.
///
/// # ABA
///
/// There are no tagged pointers and no deferred reclamation. If between our
/// load of `head == A` and our CAS another thread pops `A`, pops `B` and
/// pushes `A` back, the CAS succeeds and installs the stale `B` as head even
/// though `B` is allocated. The same chunk can then be issued twice. Reading
/// the link of a chunk we do not own is still memory safe because slabs are
/// never unmapped (see [`MemorySource`]), but the hazard itself is left in
/// place.
struct FreeStack {
    head: AtomicPtr<ChunkHeader>,
}

impl FreeStack {
    const fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    fn pop(&self) -> Option<NonNull<ChunkHeader>> {
        loop {
            // Acquire pairs with the Release CAS in `push_chain`, making the
            // pushed chunk's header (size and link) visible to us.
            let head = NonNull::new(self.head.load(Ordering::Acquire))?;

            // Relaxed: the Acquire load above already ordered this read after
            // the write that published `head`.
            let next = unsafe { ChunkHeader::link(head).load(Ordering::Relaxed) };

            if self
                .head
                .compare_exchange_weak(head.as_ptr(), next, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return Some(head);
            }
        }
    }

    #[inline]
    fn push(&self, header: NonNull<ChunkHeader>) {
        self.push_chain(header, header);
    }

    /// Pushes the already linked chain `first ..= last` in one CAS. `last`'s
    /// link is overwritten.
    fn push_chain(&self, first: NonNull<ChunkHeader>, last: NonNull<ChunkHeader>) {
        let link = unsafe { ChunkHeader::link(last) };
        let mut head = self.head.load(Ordering::Relaxed);

        loop {
            link.store(head, Ordering::Relaxed);

            // Release publishes every write we made to the chain before this
            // point, including freshly written remainder headers.
            match self.head.compare_exchange_weak(
                head,
                first.as_ptr(),
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => head = observed,
            }
        }
    }
}

/// Undersized chunks popped during one allocation. They are linked through
/// their own link fields, which is fine since only we own them while they are
/// here, and go back to the stack as a single chain when the stash is dropped.
///
/// Holding them aside instead of pushing each one back immediately is what
/// prevents a thread from popping the same undersized head forever.
struct Stash<'a> {
    stack: &'a FreeStack,
    first: Option<NonNull<ChunkHeader>>,
    last: Option<NonNull<ChunkHeader>>,
    len: usize,
}

impl<'a> Stash<'a> {
    fn new(stack: &'a FreeStack) -> Self {
        Self {
            stack,
            first: None,
            last: None,
            len: 0,
        }
    }

    fn hold(&mut self, header: NonNull<ChunkHeader>) {
        let next = self.first.map_or(ptr::null_mut(), NonNull::as_ptr);
        unsafe { ChunkHeader::link(header).store(next, Ordering::Relaxed) };

        if self.last.is_none() {
            self.last = Some(header);
        }
        self.first = Some(header);
        self.len += 1;
    }
}

impl Drop for Stash<'_> {
    fn drop(&mut self) {
        if let (Some(first), Some(last)) = (self.first, self.last) {
            trace!(chunks = self.len, "returning undersized chunks");
            self.stack.push_chain(first, last);
        }
    }
}

/// Free list allocator built on a lock-free stack. Threads never block on
/// each other; they retry their compare-and-swap instead.
///
/// When several threads find the stack empty at the same time each of them
/// bootstraps its own slab. The extra slabs only enlarge the pool, no chunk
/// is ever handed out twice because of it.
pub struct LockFreeAllocator<S: MemorySource = SystemMemory> {
    stack: FreeStack,
    source: S,
    config: AllocatorConfig,
    counters: Counters,
}

impl LockFreeAllocator {
    /// Empty allocator with 64 MiB slabs from [`SystemMemory`].
    pub const fn new() -> Self {
        Self::with_source(SystemMemory, AllocatorConfig::DEFAULT)
    }

    pub const fn with_config(config: AllocatorConfig) -> Self {
        Self::with_source(SystemMemory, config)
    }
}

impl Default for LockFreeAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: MemorySource> LockFreeAllocator<S> {
    pub const fn with_source(source: S, config: AllocatorConfig) -> Self {
        Self {
            stack: FreeStack::new(),
            source,
            config,
            counters: Counters::new(),
        }
    }

    /// Largest request this allocator can serve.
    pub fn slab_capacity(&self) -> usize {
        self.config.chunk_capacity()
    }

    /// Number of chunks on the free stack. Needs exclusive access, nobody can
    /// push or pop while we walk.
    pub fn free_chunks(&mut self) -> usize {
        unsafe { chunk::list_len(*self.stack.head.get_mut()) }
    }
}

impl<S: MemorySource> ChunkAllocator for LockFreeAllocator<S> {
    fn allocate(&self, size: usize) -> Result<Chunk, AllocError> {
        let request = self.config.normalize(size).inspect_err(|_| {
            self.counters.failed();
        })?;

        // Dropped on every exit path, failures included.
        let mut stash = Stash::new(&self.stack);

        let header = loop {
            let Some(header) = self.stack.pop() else {
                let slab = acquire_slab(&self.source, &self.config, Strategy::LockFree.name())
                    .inspect_err(|_| self.counters.failed())?;
                self.counters.slab_acquired();
                self.stack.push(slab);
                continue;
            };

            if unsafe { ChunkHeader::size_of(header) } >= request {
                break header;
            }

            stash.hold(header);
        };

        // The remainder header is written before `push` publishes it with
        // Release ordering.
        if let Some(remainder) = unsafe { chunk::split(header, request) } {
            trace!(
                request,
                remainder = unsafe { ChunkHeader::size_of(remainder) },
                "split chunk"
            );
            self.counters.split();
            self.stack.push(remainder);
        }

        drop(stash);
        self.counters.allocated();

        Ok(unsafe { Chunk::issue(header) })
    }

    fn free(&self, chunk: Chunk) {
        self.stack.push(chunk.into_free_header());
        self.counters.freed();
    }

    fn stats(&self) -> AllocatorStats {
        self.counters.snapshot()
    }

    fn config(&self) -> &AllocatorConfig {
        &self.config
    }
}
