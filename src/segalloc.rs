use std::alloc::{GlobalAlloc, Layout};
use std::ptr;

use spin::Mutex;

use crate::block::DSIZE;
use crate::heap::Heap;

/// Thread-safe façade over [`Heap`] implementing [`GlobalAlloc`], so the
/// allocator can back a whole program:
///
/// ```rust,ignore
/// #[global_allocator]
/// static ALLOCATOR: SegAlloc = SegAlloc::new();
/// ```
///
/// Every entry point takes one mutex around the heap; the internal
/// algorithms assume exclusive access throughout a call, so this single
/// lock is the whole concurrency story. The heap itself is built lazily on
/// the first allocation, which keeps `new` a `const fn`.
///
/// Payloads are 8-byte aligned, therefore layouts asking for a stricter
/// alignment are refused with a null pointer.
pub struct SegAlloc {
    heap: Mutex<Option<Heap>>,
}

impl SegAlloc {
    pub const fn new() -> Self {
        Self { heap: Mutex::new(None) }
    }

    fn with_heap(&self, f: impl FnOnce(&mut Heap) -> *mut u8) -> *mut u8 {
        let mut guard = self.heap.lock();

        if guard.is_none() {
            match Heap::new() {
                Ok(heap) => *guard = Some(heap),
                Err(_) => return ptr::null_mut(),
            }
        }

        let Some(heap) = guard.as_mut() else {
            return ptr::null_mut();
        };

        f(heap)
    }
}

impl Default for SegAlloc {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl GlobalAlloc for SegAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > DSIZE {
            return ptr::null_mut();
        }

        // Zero-size layouts still get a distinct live address.
        self.with_heap(|heap| heap.allocate(layout.size().max(1)))
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        if let Some(heap) = self.heap.lock().as_mut() {
            heap.free(ptr);
        }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > DSIZE {
            return ptr::null_mut();
        }

        self.with_heap(|heap| heap.reallocate(ptr, new_size.max(1)))
    }
}
