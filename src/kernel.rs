//! Platform layer. Everything that talks to the operating system to obtain
//! memory lives here, behind the [`MemorySource`] trait.
//!
//! The allocators never give memory back, so unlike a general purpose
//! allocator there is no `return_memory` counterpart: a slab obtained through
//! [`MemorySource::request`] stays mapped until the process exits.

use std::{
    ptr::NonNull,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

/// A coarse-grained source of raw memory blocks. Slab bootstrap is the only
/// consumer of this trait.
///
/// # Safety
///
/// Implementors must guarantee that every block returned by
/// [`MemorySource::request`]:
///
/// - is valid for reads and writes of `len` bytes,
/// - is aligned to at least [`crate::chunk::CHUNK_ALIGN`],
/// - is not handed out to anybody else,
/// - stays valid for as long as any allocator built on this source (or any
///   chunk carved from the block) is alive. In practice this means the block
///   is never unmapped.
///
/// The lock-free allocator reads link fields of chunks that another thread
/// may already own, which is only sound because of the last requirement.
pub unsafe trait MemorySource: Send + Sync {
    /// Requests a block where `len` bytes can be written safely. Returns
    /// `None` if the underlying provider cannot satisfy the request.
    fn request(&self, len: usize) -> Option<NonNull<u8>>;
}

unsafe impl<S: MemorySource + ?Sized> MemorySource for &S {
    fn request(&self, len: usize) -> Option<NonNull<u8>> {
        (**self).request(len)
    }
}

unsafe impl<S: MemorySource + ?Sized> MemorySource for Arc<S> {
    fn request(&self, len: usize) -> Option<NonNull<u8>> {
        (**self).request(len)
    }
}

/// Zero sized [`MemorySource`] backed by the operating system. Uses
/// `mmap` on unix and `VirtualAlloc` on Windows.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMemory;

/// Abstraction to handle low level memory operations and syscalls. Our top
/// level view of the allocator has nothing to do with the concrete APIs
/// offered by each kernel.
trait PlatformMemory {
    /// Requests a memory region of size `len`. Returns `None` if the
    /// underlying syscall fails.
    unsafe fn request_memory(len: usize) -> Option<NonNull<u8>>;

    /// Returns the virtual memory page size of the computer in bytes.
    unsafe fn page_size() -> usize;
}

/// Virtual memory page size of the computer, usually 4096. We only know it
/// at runtime, so the first call caches it here.
static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

/// Wrapper to calculate the computer's page size.
#[inline]
pub fn page_size() -> usize {
    match PAGE_SIZE.load(Ordering::Relaxed) {
        0 => {
            let size = unsafe { SystemMemory::page_size() };
            PAGE_SIZE.store(size, Ordering::Relaxed);
            size
        }
        size => size,
    }
}

unsafe impl MemorySource for SystemMemory {
    fn request(&self, len: usize) -> Option<NonNull<u8>> {
        if len == 0 {
            return None;
        }

        // The kernel hands out whole pages anyway.
        let len = crate::utils::checked_align(len, page_size())?;

        unsafe { SystemMemory::request_memory(len) }
    }
}

#[cfg(unix)]
mod unix {
    use super::{PlatformMemory, SystemMemory};

    use libc::{mmap, off_t, size_t};

    use std::{
        os::raw::{c_int, c_void},
        ptr::NonNull,
    };

    impl PlatformMemory for SystemMemory {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            // mmap parameters.
            const ADDR: *mut c_void = std::ptr::null_mut::<c_void>();
            // Read-Write only memory.
            const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
            // Private to our process and not backed by any file.
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
            const FD: c_int = -1;
            const OFFSET: off_t = 0;

            unsafe {
                match mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET) {
                    libc::MAP_FAILED => None,
                    addr => NonNull::new(addr.cast::<u8>()),
                }
            }
        }

        unsafe fn page_size() -> usize {
            unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize }
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::{mem::MaybeUninit, ptr::NonNull};

    use super::{PlatformMemory, SystemMemory};

    use ::windows::Win32::System::{Memory, SystemInformation};

    impl PlatformMemory for SystemMemory {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            // Read-Write only.
            let protection = Memory::PAGE_READWRITE;

            let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

            unsafe {
                let addr = Memory::VirtualAlloc(None, len, flags, protection);

                NonNull::new(addr.cast())
            }
        }

        unsafe fn page_size() -> usize {
            unsafe {
                let mut system_info = MaybeUninit::uninit();
                SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

                system_info.assume_init().dwPageSize as usize
            }
        }
    }
}
