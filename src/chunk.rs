use std::{
    fmt, mem,
    ops::Range,
    ptr::{self, NonNull},
    sync::atomic::{AtomicPtr, Ordering},
};

use crate::utils::align;

/// Size of a chunk header. Every chunk pays this overhead in front of its
/// payload.
pub const HEADER_SIZE: usize = mem::size_of::<ChunkHeader>();

/// Alignment of every header, and therefore of every split boundary.
pub const CHUNK_ALIGN: usize = mem::align_of::<ChunkHeader>();

/// Smallest payload we ever hand out. Requests below this are rounded up.
pub const MIN_CHUNK_SIZE: usize = CHUNK_ALIGN;

/// Whether a chunk currently sits on a free list or belongs to a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChunkState {
    Free,
    Allocated,
}

/// Metadata placed in front of every chunk. The payload starts right after
/// this header and spans `size` bytes.
///
/// ```text
/// +---------------------+ <------+
/// |        size         |        |
/// +---------------------+        |
/// |        state        |        | -> Header (HEADER_SIZE bytes)
/// +---------------------+        |
/// |  next (Free only)   |        |
/// +---------------------+ <------+
/// |       Payload       |        |
/// |         ...         |        | -> `size` bytes
/// |         ...         |        |
/// +---------------------+ <------+
/// ```
///
/// Both free list strategies share this layout. The link is atomic because
/// the lock-free stack reads it from threads that do not own the chunk; the
/// mutex based list only touches it with the lock held and uses relaxed
/// accesses.
#[repr(C)]
pub struct ChunkHeader {
    /// Usable payload bytes, header excluded.
    pub size: usize,
    /// Free or Allocated.
    pub state: ChunkState,
    /// Next free chunk. Meaningless while the chunk is allocated.
    pub next: AtomicPtr<ChunkHeader>,
}

impl ChunkHeader {
    /// Writes a fresh Free header at `addr` and returns a pointer to it.
    ///
    /// # Safety
    ///
    /// `addr` must be aligned to [`CHUNK_ALIGN`] and valid for writes of
    /// `HEADER_SIZE + size` bytes that nobody else is using.
    pub(crate) unsafe fn init(addr: NonNull<u8>, size: usize) -> NonNull<ChunkHeader> {
        let header = addr.cast::<ChunkHeader>();

        unsafe {
            header.as_ptr().write(ChunkHeader {
                size,
                state: ChunkState::Free,
                next: AtomicPtr::new(ptr::null_mut()),
            });
        }

        header
    }

    /// Link field of `header`. Only the field is borrowed, other threads may
    /// be writing the rest of the header at the same time.
    ///
    /// # Safety
    ///
    /// `header` must point into memory that stays mapped for `'a`.
    #[inline]
    pub(crate) unsafe fn link<'a>(header: NonNull<ChunkHeader>) -> &'a AtomicPtr<ChunkHeader> {
        unsafe { &(*header.as_ptr()).next }
    }

    /// Payload size, read without borrowing the whole header.
    ///
    /// # Safety
    ///
    /// `header` must point to a valid chunk owned by the caller.
    #[inline]
    pub(crate) unsafe fn size_of(header: NonNull<ChunkHeader>) -> usize {
        unsafe { (*header.as_ptr()).size }
    }

    /// First byte of the payload.
    #[inline]
    pub(crate) fn payload(header: NonNull<ChunkHeader>) -> NonNull<u8> {
        // Offset arithmetic only, the payload is never read through the header.
        unsafe { header.cast::<u8>().add(HEADER_SIZE) }
    }
}

/// Normalizes a caller request into the payload size we actually carve out:
/// at least [`MIN_CHUNK_SIZE`] and a multiple of [`CHUNK_ALIGN`]. Returns
/// `None` on overflow.
#[inline]
pub(crate) fn normalize_request(size: usize) -> Option<usize> {
    let size = size.max(MIN_CHUNK_SIZE);
    if size > usize::MAX - CHUNK_ALIGN {
        return None;
    }

    Some(align(size, CHUNK_ALIGN))
}

/// Splits `header` so that it keeps exactly `request` payload bytes, turning
/// the tail into a brand new Free chunk. Returns the remainder, or `None`
/// (leaving the chunk untouched) when there is not enough room for another
/// header plus at least one byte of payload.
///
/// ```text
///  before:  | H | <------------------- S -------------------> |
///  after:   | H | <--- request ---> | H | <- S - request - H -> |
///                                   ^ remainder header
/// ```
///
/// No list is touched; publishing the remainder is the caller's job.
///
/// # Safety
///
/// The caller must own `header` exclusively (popped or unlinked from its free
/// list) and `request` must be a multiple of [`CHUNK_ALIGN`].
pub(crate) unsafe fn split(
    header: NonNull<ChunkHeader>,
    request: usize,
) -> Option<NonNull<ChunkHeader>> {
    debug_assert_eq!(0, request % CHUNK_ALIGN);

    unsafe {
        let size = ChunkHeader::size_of(header);
        if request + HEADER_SIZE >= size {
            return None;
        }

        let boundary = ChunkHeader::payload(header).add(request);
        let remainder = ChunkHeader::init(boundary, size - request - HEADER_SIZE);
        (*header.as_ptr()).size = request;

        Some(remainder)
    }
}

/// Handle to an allocated chunk.
///
/// A `Chunk` is the only way to reach the payload of an allocation, and
/// [`crate::ChunkAllocator::free`] consumes it, so safe code can neither free
/// it twice nor touch it after freeing.
pub struct Chunk {
    header: NonNull<ChunkHeader>,
}

// The payload belongs to whoever holds the handle, wherever they run.
unsafe impl Send for Chunk {}
unsafe impl Sync for Chunk {}

impl Chunk {
    /// Marks `header` as allocated and wraps it.
    ///
    /// # Safety
    ///
    /// `header` must point to a valid chunk that the caller just removed from
    /// a free list.
    pub(crate) unsafe fn issue(header: NonNull<ChunkHeader>) -> Self {
        // Field writes go through the raw pointer: a stale reader may still be
        // loading `next` from this header.
        unsafe {
            (*header.as_ptr()).state = ChunkState::Allocated;
        }

        Self { header }
    }

    /// Gives the header back, marked Free, ready to be linked into a list.
    pub(crate) fn into_free_header(self) -> NonNull<ChunkHeader> {
        let header = self.header;

        unsafe {
            (*header.as_ptr()).state = ChunkState::Free;
        }

        header
    }

    /// Usable payload bytes. At least the size that was requested.
    #[inline]
    pub fn size(&self) -> usize {
        unsafe { ChunkHeader::size_of(self.header) }
    }

    #[inline]
    pub fn state(&self) -> ChunkState {
        unsafe { (*self.header.as_ptr()).state }
    }

    /// Pointer to the first payload byte.
    #[inline]
    pub fn as_ptr(&self) -> NonNull<u8> {
        ChunkHeader::payload(self.header)
    }

    /// Address of the header, for diagnostics.
    #[inline]
    pub fn header_addr(&self) -> usize {
        self.header.as_ptr() as usize
    }

    /// Address range covered by the payload.
    pub fn addr_range(&self) -> Range<usize> {
        let start = self.as_ptr().as_ptr() as usize;
        start..start + self.size()
    }

    /// The payload as a byte slice.
    ///
    /// # Safety
    ///
    /// Nobody else may hold a handle to the same chunk. This always holds for
    /// [`crate::LockedAllocator`]. [`crate::LockFreeAllocator`] can issue a
    /// chunk twice when its free list hits the ABA hazard, in which case
    /// writing through this slice races with the other owner.
    pub unsafe fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.as_ptr().as_ptr(), self.size()) }
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("header", &self.header)
            .field("size", &self.size())
            .field("state", &self.state())
            .finish()
    }
}

/// Walks a null terminated list starting at `head` and counts its chunks.
///
/// # Safety
///
/// No other thread may mutate the list while it is being walked.
pub(crate) unsafe fn list_len(head: *mut ChunkHeader) -> usize {
    let mut len = 0;
    let mut current = head;

    while let Some(node) = NonNull::new(current) {
        len += 1;
        current = unsafe { ChunkHeader::link(node).load(Ordering::Relaxed) };
    }

    len
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Word aligned scratch memory, so tests can carve headers without a slab.
    fn scratch(words: usize) -> Vec<u64> {
        vec![0; words]
    }

    fn header_in(buf: &mut [u64]) -> NonNull<ChunkHeader> {
        let bytes = buf.len() * mem::size_of::<u64>();
        let addr = NonNull::new(buf.as_mut_ptr().cast::<u8>()).unwrap();
        unsafe { ChunkHeader::init(addr, bytes - HEADER_SIZE) }
    }

    #[test]
    fn header_layout() {
        assert_eq!(0, HEADER_SIZE % CHUNK_ALIGN);
        assert!(HEADER_SIZE >= 2 * mem::size_of::<usize>());
        assert!(MIN_CHUNK_SIZE >= 1);
    }

    #[test]
    fn requests_are_normalized() {
        assert_eq!(Some(MIN_CHUNK_SIZE), normalize_request(0));
        assert_eq!(Some(CHUNK_ALIGN), normalize_request(1));
        assert_eq!(Some(1024), normalize_request(1024));
        assert_eq!(Some(1024 + CHUNK_ALIGN), normalize_request(1025));
        assert_eq!(None, normalize_request(usize::MAX));
    }

    #[test]
    fn payload_follows_header() {
        let mut buf = scratch(64);
        let header = header_in(&mut buf);

        let payload = ChunkHeader::payload(header).as_ptr() as usize;
        assert_eq!(header.as_ptr() as usize + HEADER_SIZE, payload);
    }

    #[test]
    fn split_produces_exact_remainder() {
        let mut buf = scratch(128);
        let header = header_in(&mut buf);
        let original = unsafe { header.as_ref().size };
        let request = 64;

        let remainder = unsafe { split(header, request) }.expect("chunk should split");

        unsafe {
            assert_eq!(request, header.as_ref().size);
            assert_eq!(original - request - HEADER_SIZE, remainder.as_ref().size);
            assert_eq!(ChunkState::Free, remainder.as_ref().state);
        }

        // The remainder header starts right where the truncated payload ends.
        let payload_end = ChunkHeader::payload(header).as_ptr() as usize + request;
        assert_eq!(payload_end, remainder.as_ptr() as usize);
        assert_eq!(
            payload_end + HEADER_SIZE,
            ChunkHeader::payload(remainder).as_ptr() as usize
        );
        assert_eq!(0, remainder.as_ptr() as usize % CHUNK_ALIGN);
    }

    #[test]
    fn no_split_without_room_for_a_header() {
        let mut buf = scratch(16);
        let header = header_in(&mut buf);
        let size = unsafe { header.as_ref().size };

        // Exactly one header left over is not enough, payload would be empty.
        let request = size - HEADER_SIZE;
        assert!(unsafe { split(header, request) }.is_none());
        assert_eq!(size, unsafe { header.as_ref().size });

        let request = size - HEADER_SIZE - CHUNK_ALIGN;
        assert!(unsafe { split(header, request) }.is_some());
    }

    #[test]
    fn issue_and_release_flip_state() {
        let mut buf = scratch(32);
        let header = header_in(&mut buf);

        let mut chunk = unsafe { Chunk::issue(header) };
        assert_eq!(ChunkState::Allocated, chunk.state());

        let payload = unsafe { chunk.as_mut_slice() };
        payload.fill(7);
        let payload_len = payload.len();
        assert_eq!(chunk.size(), payload_len);
        assert_eq!(chunk.as_ptr().as_ptr() as usize, chunk.addr_range().start);

        let header = chunk.into_free_header();
        assert_eq!(ChunkState::Free, unsafe { header.as_ref().state });
    }

    #[test]
    fn list_len_follows_links() {
        let mut a = scratch(8);
        let mut b = scratch(8);
        let a = header_in(&mut a);
        let b = header_in(&mut b);

        unsafe {
            a.as_ref().next.store(b.as_ptr(), Ordering::Relaxed);
            assert_eq!(2, list_len(a.as_ptr()));
            assert_eq!(1, list_len(b.as_ptr()));
            assert_eq!(0, list_len(ptr::null_mut()));
        }
    }
}
