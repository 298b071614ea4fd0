use std::ptr::{self, NonNull};

use crate::arena::{Arena, MAX_ARENA_SIZE};
use crate::block::{pack, BlockPtr, CHUNKSIZE, DSIZE, MIN_BLOCK_SIZE, OVERHEAD, WSIZE};
use crate::classes::{class_of, ClassHeads, CLASS_COUNT};
use crate::freelist::FreeLists;
use crate::utils::align;


/// The allocator's heap: a single arena carved into boundary-tagged blocks,
/// indexed by seven segregated free lists.
///
/// Right after [`Heap::new`] the arena looks like this:
///
/// ```text
/// +------------+-----+-----------+-------------+-------------+-----------+
/// | list heads | pad | prologue  |   initial   |     ...     | epilogue  |
/// |  (7 x 8B)  | (4B)| hdr + ftr |    free     | user blocks |  header   |
/// |            |     |  (8B, a)  |    block    |             |  (0, a)   |
/// +------------+-----+-----------+-------------+-------------+-----------+
/// ```
///
/// The allocated prologue and the zero-size allocated epilogue guard both
/// ends of the arena: every real block always has a footer to its left and
/// a header to its right, so coalescing never needs a boundary check.
pub struct Heap {
    pub(crate) arena: Arena,
    pub(crate) lists: FreeLists,
    /// Payload of the prologue block, where heap walks start.
    pub(crate) first_block: BlockPtr,
}

// The heap owns every pointer into its arena exclusively; callers serialize
// access (SegAlloc wraps it in a mutex).
unsafe impl Send for Heap {}

impl Heap {
    /// Builds an empty heap: reserves the arena, claims the list-head region
    /// and the prologue / epilogue prefix, then grows the heap by one chunk.
    pub fn new() -> Result<Self, &'static str> {
        let mut arena = Arena::new()?;

        let head_region = arena
            .extend(ClassHeads::region_size())
            .ok_or("heap: provider refused the list-head region")?;
        let lists = unsafe { FreeLists::new(head_region) };

        let prefix = arena
            .extend(4 * WSIZE)
            .ok_or("heap: provider refused the prologue region")?;

        let first_block = unsafe {
            let words = prefix.as_ptr() as *mut u32;
            *words = 0;                                  // alignment padding
            *words.add(1) = pack(OVERHEAD, true);        // prologue header
            *words.add(2) = pack(OVERHEAD, true);        // prologue footer
            *words.add(3) = pack(0, true);               // epilogue header

            BlockPtr::from_payload(NonNull::new_unchecked(prefix.as_ptr().add(DSIZE)))
        };

        let mut heap = Self { arena, lists, first_block };

        unsafe {
            heap.extend_heap(CHUNKSIZE / WSIZE)
                .ok_or("heap: provider refused the initial chunk")?;
        }

        Ok(heap)
    }

    /// Allocates a block with at least `size` bytes of payload, returning a
    /// null pointer when `size` is 0 or the arena is exhausted.
    pub fn allocate(&mut self, size: usize) -> *mut u8 {
        if size == 0 {
            return ptr::null_mut();
        }

        let Some(asize) = adjust_size(size) else {
            return ptr::null_mut();
        };

        unsafe {
            if let Some(block) = self.find_fit(asize) {
                self.place(block, asize);
                return block.payload();
            }

            // No fit: grow the heap. Each extension coalesces with the free
            // block at the arena's tail, so repeating it accumulates one
            // block large enough for requests beyond a single chunk.
            let extend_size = asize.min(CHUNKSIZE);
            let mut block = match self.extend_heap(extend_size / WSIZE) {
                Some(block) => block,
                None => return ptr::null_mut(),
            };

            while block.size() < asize {
                block = match self.extend_heap(extend_size / WSIZE) {
                    Some(block) => block,
                    None => return ptr::null_mut(),
                };
            }

            self.place(block, asize);
            block.payload()
        }
    }

    /// Frees the block at `ptr`. Passing a null pointer is a no-op; passing
    /// anything that did not come from this heap is undefined behavior.
    pub fn free(&mut self, ptr: *mut u8) {
        let Some(payload) = NonNull::new(ptr) else {
            return;
        };

        unsafe {
            let block = BlockPtr::from_payload(payload);
            let size = block.size();

            block.write_tags(size, false);
            self.coalesce(block);
        }
    }

    /// Moves the allocation at `ptr` to a block with at least `size` payload
    /// bytes, copying the overlapping prefix of the contents.
    ///
    /// A null `ptr` behaves like [`Heap::allocate`]; a zero `size` behaves
    /// like [`Heap::free`] and returns null. When the inner allocation fails
    /// this returns null and leaves the original block untouched.
    pub fn reallocate(&mut self, ptr: *mut u8, size: usize) -> *mut u8 {
        if ptr.is_null() {
            return self.allocate(size);
        }

        if size == 0 {
            self.free(ptr);
            return ptr::null_mut();
        }

        let new_ptr = self.allocate(size);
        if new_ptr.is_null() {
            return ptr::null_mut();
        }

        unsafe {
            let old_block = BlockPtr::from_payload(NonNull::new_unchecked(ptr));
            let old_payload = old_block.size() - OVERHEAD;

            ptr::copy_nonoverlapping(ptr, new_ptr, old_payload.min(size));
        }

        self.free(ptr);
        new_ptr
    }

    /// Finds a free block of at least `asize` bytes: starting at the class
    /// of `asize`, each candidate class is probed at its head only. O(1) per
    /// class, at most seven probes.
    unsafe fn find_fit(&self, asize: usize) -> Option<BlockPtr> {
        unsafe {
            for class in class_of(asize)..CLASS_COUNT {
                if let Some(head) = self.lists.head(class) {
                    if head.size() >= asize {
                        return Some(head);
                    }
                }
            }

            None
        }
    }

    /// Carves an allocation of `asize` bytes out of the free block at
    /// `block`, splitting off the remainder when it can still hold a
    /// minimum-size block.
    unsafe fn place(&mut self, block: BlockPtr, asize: usize) {
        unsafe {
            let csize = block.size();

            self.lists.remove(block);

            if csize - asize >= MIN_BLOCK_SIZE {
                block.write_tags(asize, true);

                let remainder = block.next();
                remainder.write_tags(csize - asize, false);
                self.lists.insert(remainder);
            } else {
                block.write_tags(csize, true);
            }
        }
    }

    /// Merges the free block at `block` with whichever of its neighbours is
    /// free and returns the merged block, which always ends up in exactly
    /// one class list. Neighbours leave their lists before any tag is
    /// rewritten, since their current size is what locates them.
    unsafe fn coalesce(&mut self, block: BlockPtr) -> BlockPtr {
        unsafe {
            let prev = block.prev();
            let next = block.next();
            let mut size = block.size();

            let merged = match (prev.is_allocated(), next.is_allocated()) {
                (true, true) => block,
                (true, false) => {
                    self.lists.remove(next);
                    size += next.size();
                    block.write_tags(size, false);
                    block
                }
                (false, true) => {
                    self.lists.remove(prev);
                    size += prev.size();
                    prev.write_tags(size, false);
                    prev
                }
                (false, false) => {
                    self.lists.remove(prev);
                    self.lists.remove(next);
                    size += prev.size() + next.size();
                    prev.write_tags(size, false);
                    prev
                }
            };

            self.lists.insert(merged);
            merged
        }
    }

    /// Grows the arena by `words` words (rounded up to keep 8-byte
    /// alignment) and turns the new bytes into a free block: its header
    /// overwrites the old epilogue and a fresh epilogue is written after it.
    /// Returns the block after coalescing with a trailing free neighbour.
    unsafe fn extend_heap(&mut self, words: usize) -> Option<BlockPtr> {
        let size = align(words * WSIZE, DSIZE);

        let payload = self.arena.extend(size)?;

        unsafe {
            let block = BlockPtr::from_payload(payload);
            block.write_tags(size, false);

            *block.next().header() = pack(0, true);

            Some(self.coalesce(block))
        }
    }
}

/// Rounds a request up to a representable block size: payload aligned to 8
/// plus header and footer, never below the minimum block. Requests beyond
/// the arena reservation are rejected outright.
fn adjust_size(size: usize) -> Option<usize> {
    if size > MAX_ARENA_SIZE {
        return None;
    }

    if size <= DSIZE {
        Some(MIN_BLOCK_SIZE)
    } else {
        Some(align(size + OVERHEAD, DSIZE))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    unsafe fn block_of(ptr: *mut u8) -> BlockPtr {
        BlockPtr::from_payload(NonNull::new(ptr).unwrap())
    }

    #[test]
    fn new_heap_is_consistent() {
        let heap = Heap::new().unwrap();

        assert_eq!(heap.check(false), 0);
        // Head slots + pad + prologue + epilogue header + one chunk.
        assert_eq!(heap.arena.size(), ClassHeads::region_size() + 4 * WSIZE + CHUNKSIZE);
    }

    #[test]
    fn allocate_zero_returns_null() {
        let mut heap = Heap::new().unwrap();

        assert!(heap.allocate(0).is_null());
        assert_eq!(heap.check(false), 0);
    }

    #[test]
    fn tiny_requests_get_minimum_blocks() {
        let mut heap = Heap::new().unwrap();

        let ptr = heap.allocate(1);
        assert!(!ptr.is_null());
        assert_eq!(ptr as usize % DSIZE, 0);

        unsafe { assert_eq!(block_of(ptr).size(), MIN_BLOCK_SIZE) };
        assert_eq!(heap.check(false), 0);
    }

    #[test]
    fn request_sizes_round_up_to_doubleword() {
        let mut heap = Heap::new().unwrap();

        // 100 bytes of payload plus 8 of overhead, rounded to 112.
        let ptr = heap.allocate(100);
        unsafe { assert_eq!(block_of(ptr).size(), 112) };

        heap.free(ptr);
        let again = heap.allocate(100);
        assert!(!again.is_null());
        unsafe { assert_eq!(block_of(again).size(), 112) };
        assert_eq!(heap.check(false), 0);
    }

    #[test]
    fn allocations_do_not_overlap() {
        let mut heap = Heap::new().unwrap();

        let first = heap.allocate(64);
        let second = heap.allocate(64);

        unsafe {
            first.write_bytes(0x11, 64);
            second.write_bytes(0x22, 64);

            for i in 0..64 {
                assert_eq!(*first.add(i), 0x11);
                assert_eq!(*second.add(i), 0x22);
            }
        }

        assert_eq!(heap.check(false), 0);
    }

    #[test]
    fn freed_block_is_reused_without_splitting() {
        let mut heap = Heap::new().unwrap();

        let a = heap.allocate(64);
        let b = heap.allocate(64);
        let c = heap.allocate(64);
        assert!(!a.is_null() && !b.is_null() && !c.is_null());

        heap.free(b);

        // Same adjusted size, exact fit: the freed block comes straight back.
        let d = heap.allocate(64);
        assert_eq!(d, b);
        assert_eq!(heap.check(false), 0);
    }

    #[test]
    fn same_class_head_is_reused() {
        let mut heap = Heap::new().unwrap();

        let a = heap.allocate(600);
        let _b = heap.allocate(600);
        heap.free(a);

        let c = heap.allocate(600);
        assert_eq!(c, a);
        assert_eq!(heap.check(false), 0);
    }

    #[test]
    fn adjacent_frees_coalesce_into_one_block() {
        let mut heap = Heap::new().unwrap();

        let a = heap.allocate(200);
        let b = heap.allocate(200);

        heap.free(a);
        heap.free(b);
        assert_eq!(heap.check(false), 0);

        // Both 208-byte blocks merged: a 416-byte request fits at a's old
        // position without touching the rest of the heap.
        let merged = heap.allocate(408);
        assert_eq!(merged, a);
        assert_eq!(heap.check(false), 0);
    }

    #[test]
    fn free_null_is_a_no_op() {
        let mut heap = Heap::new().unwrap();

        heap.free(ptr::null_mut());
        assert_eq!(heap.check(false), 0);
    }

    #[test]
    fn free_then_allocate_leaves_heap_size_unchanged() {
        let mut heap = Heap::new().unwrap();

        let before = heap.arena.size();
        let ptr = heap.allocate(128);
        heap.free(ptr);

        assert_eq!(heap.arena.size(), before);
        assert_eq!(heap.check(false), 0);
    }

    #[test]
    fn chunk_sized_request_fits_initial_extension() {
        let mut heap = Heap::new().unwrap();
        let before = heap.arena.size();

        // CHUNKSIZE - 8 adjusts to exactly CHUNKSIZE: the whole initial
        // free block, no further extension.
        let ptr = heap.allocate(CHUNKSIZE - OVERHEAD);
        assert!(!ptr.is_null());
        assert_eq!(heap.arena.size(), before);
        assert_eq!(heap.check(false), 0);
    }

    #[test]
    fn oversized_requests_extend_repeatedly() {
        let mut heap = Heap::new().unwrap();
        let before = heap.arena.size();

        let ptr = heap.allocate(3 * CHUNKSIZE);
        assert!(!ptr.is_null());
        assert!(heap.arena.size() >= before + 2 * CHUNKSIZE);

        unsafe {
            ptr.write_bytes(0x5A, 3 * CHUNKSIZE);
            assert_eq!(*ptr.add(3 * CHUNKSIZE - 1), 0x5A);
        }

        assert_eq!(heap.check(false), 0);
    }

    #[test]
    fn exhaustion_returns_null_and_keeps_heap_valid() {
        let mut heap = Heap::new().unwrap();

        // Far beyond the reservation: rejected before touching the arena.
        assert!(heap.allocate(MAX_ARENA_SIZE + 1).is_null());

        // Drain the arena for real.
        let mut live = Vec::new();
        loop {
            let ptr = heap.allocate(1 << 20);
            if ptr.is_null() {
                break;
            }
            live.push(ptr);
        }

        assert!(live.len() >= 18, "only {} MiB-sized blocks fit", live.len());
        assert_eq!(heap.check(false), 0);

        for ptr in live {
            heap.free(ptr);
        }
        assert_eq!(heap.check(false), 0);
    }

    #[test]
    fn reallocate_preserves_contents() {
        let mut heap = Heap::new().unwrap();

        let small = heap.allocate(8);
        unsafe {
            for i in 0..8 {
                *small.add(i) = 0x11 * (i as u8 + 1);
            }
        }

        let big = heap.reallocate(small, 4096);
        assert!(!big.is_null());
        assert_ne!(big, small);

        unsafe {
            for i in 0..8 {
                assert_eq!(*big.add(i), 0x11 * (i as u8 + 1));
            }
        }

        assert_eq!(heap.check(false), 0);
    }

    #[test]
    fn reallocate_shrink_keeps_prefix() {
        let mut heap = Heap::new().unwrap();

        let big = heap.allocate(256);
        unsafe {
            for i in 0..256 {
                *big.add(i) = i as u8;
            }
        }

        let small = heap.reallocate(big, 16);
        assert!(!small.is_null());

        unsafe {
            for i in 0..16 {
                assert_eq!(*small.add(i), i as u8);
            }
        }

        assert_eq!(heap.check(false), 0);
    }

    #[test]
    fn reallocate_null_allocates() {
        let mut heap = Heap::new().unwrap();

        let ptr = heap.reallocate(ptr::null_mut(), 32);
        assert!(!ptr.is_null());
        assert_eq!(heap.check(false), 0);
    }

    #[test]
    fn reallocate_to_zero_frees() {
        let mut heap = Heap::new().unwrap();

        let ptr = heap.allocate(32);
        assert!(heap.reallocate(ptr, 0).is_null());

        // The freed block is available again.
        let again = heap.allocate(32);
        assert_eq!(again, ptr);
        assert_eq!(heap.check(false), 0);
    }

    #[test]
    fn failed_reallocate_leaves_original_alive() {
        let mut heap = Heap::new().unwrap();

        let ptr = heap.allocate(64);
        unsafe { ptr.write_bytes(0x77, 64) };

        let moved = heap.reallocate(ptr, MAX_ARENA_SIZE + 1);
        assert!(moved.is_null());

        unsafe {
            for i in 0..64 {
                assert_eq!(*ptr.add(i), 0x77);
            }
        }

        heap.free(ptr);
        assert_eq!(heap.check(false), 0);
    }

    #[test]
    fn mixed_workload_stays_consistent() {
        let mut heap = Heap::new().unwrap();
        let mut live: Vec<(*mut u8, usize)> = Vec::new();

        // Sizes straddling several classes, freed in an interleaved order.
        for round in 0..4usize {
            for &size in &[24usize, 600, 80, 3000, 16, 9000, 130] {
                let ptr = heap.allocate(size);
                assert!(!ptr.is_null());
                unsafe { ptr.write_bytes((round + 1) as u8, size) };
                live.push((ptr, size));
            }

            // Free every other allocation of this round.
            let start = round * 7;
            for i in (start..start + 7).step_by(2) {
                let (ptr, _) = live[i];
                heap.free(ptr);
                live[i].0 = ptr::null_mut();
            }

            assert_eq!(heap.check(false), 0);
        }

        for (ptr, _) in live {
            heap.free(ptr);
        }
        assert_eq!(heap.check(false), 0);
    }
}
