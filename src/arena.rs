use std::ptr::NonNull;

/// Maximum number of bytes the arena will ever hand out. The whole region
/// is reserved up front and the break pointer moves through it, which is
/// what keeps any two payload addresses within a signed 32-bit delta of
/// each other (see [`crate::freelist`]).
pub(crate) const MAX_ARENA_SIZE: usize = 20 * 1024 * 1024;

/// The heap arena of the allocator. It is a single contiguous byte region
/// requested once from the operating system, grown one piece at a time by
/// moving an internal break pointer, `sbrk` style:
///
/// ```text
///  base                     break                        base + MAX_ARENA_SIZE
///   |                         |                                  |
///   v                         v                                  v
///   +-------------------------+----------------------------------+
///   |     handed out bytes    |        reserved, unused          |
///   +-------------------------+----------------------------------+
///
///              extend(n) returns the old break and moves it n bytes right
/// ```
///
/// The arena never shrinks; the reservation is only returned to the
/// operating system when the `Arena` is dropped.
pub struct Arena {
    /// First byte of the reservation.
    base: NonNull<u8>,
    /// Bytes handed out so far.
    brk: usize,
}

/// This trait provides an abstraction to handle low level memory operations
/// and syscalls. As the allocator, our top level view of this, has nothing
/// to do with the concrete implementations / APIs offered by each kernel.
trait PlatformMemory {
    /// Request a memory region of size `len`. It returns a Pointer to the
    /// given location or None if the underlying syscall fails.
    unsafe fn request_memory(len: usize) -> Option<NonNull<u8>>;

    /// Returns the memory of size `len` starting from `addr` back to the kernel.
    unsafe fn return_memory(addr: *mut u8, len: usize);
}


impl Arena {
    /// Reserves the whole [`MAX_ARENA_SIZE`] region and places the break at
    /// its start. The region handed back by the kernel is page aligned, so
    /// every address the break moves over is 8-byte aligned too.
    pub fn new() -> Result<Self, &'static str> {
        let base = unsafe { Self::request_memory(MAX_ARENA_SIZE) }
            .ok_or("arena: could not reserve backing memory")?;

        Ok(Self { base, brk: 0 })
    }

    /// Moves the break forward by `incr` bytes and returns the address of the
    /// first new byte, or `None` once the reservation is exhausted.
    ///
    /// `incr` must be a positive multiple of 8 so the break never leaves an
    /// 8-byte boundary.
    pub fn extend(&mut self, incr: usize) -> Option<NonNull<u8>> {
        debug_assert!(incr > 0 && incr % 8 == 0);

        if incr > MAX_ARENA_SIZE - self.brk {
            return None;
        }

        let old_brk = unsafe { NonNull::new_unchecked(self.base.as_ptr().add(self.brk)) };
        self.brk += incr;

        Some(old_brk)
    }

    /// First byte of the arena.
    pub fn lo(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    /// Last in-use byte of the arena, or the base address while nothing has
    /// been handed out yet.
    pub fn hi(&self) -> *mut u8 {
        if self.brk == 0 {
            return self.lo();
        }

        unsafe { self.base.as_ptr().add(self.brk - 1) }
    }

    /// Number of bytes handed out so far.
    pub fn size(&self) -> usize {
        self.brk
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        unsafe { Self::return_memory(self.base.as_ptr(), MAX_ARENA_SIZE) }
    }
}


#[cfg(unix)]
mod unix {
    use super::{Arena, PlatformMemory};

    use libc::{mmap, munmap, off_t, size_t};

    use std::{os::raw::{c_void, c_int}, ptr::NonNull};

    impl PlatformMemory for Arena {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            // mmap parameters.
            const ADDR: *mut c_void = std::ptr::null_mut::<c_void>();
            // Read-Write only memory.
            const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
            const FD: c_int = -1;
            const OFFSET: off_t = 0;

            unsafe {
                let addr = mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET);

                match addr {
                    libc::MAP_FAILED => None,
                    addr => Some(NonNull::new_unchecked(addr).cast::<u8>()),
                }
            }
        }

        unsafe fn return_memory(addr: *mut u8, len: usize) {
            unsafe { munmap(addr as *mut c_void, len as size_t); }
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::{ptr::NonNull, os::raw::c_void};

    use crate::arena::{Arena, PlatformMemory};

    use windows::Win32::System::Memory;

    impl PlatformMemory for Arena {
        unsafe fn request_memory(len: usize) -> Option<std::ptr::NonNull<u8>> {
            // Read-Write only.
            let protection = Memory::PAGE_READWRITE;

            let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

            unsafe {
                let addr = Memory::VirtualAlloc(None, len, flags, protection);

                NonNull::new(addr.cast())
            }
        }

        unsafe fn return_memory(addr: *mut u8, _len: usize) {
            unsafe { let _ = Memory::VirtualFree(addr as *mut c_void, 0, Memory::MEM_RELEASE); }
        }
    }
}
