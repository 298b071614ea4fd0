use std::ptr::NonNull;

use crate::block::{BlockPtr, DSIZE};

/// Number of segregated size classes.
pub(crate) const CLASS_COUNT: usize = 7;

/// Upper bound in bytes of each class except the last, which is unbounded.
const CLASS_BOUNDS: [usize; CLASS_COUNT - 1] = [512, 1024, 2048, 4096, 8192, 16384];

/// Maps a total block size (header and footer included) to its size class.
pub(crate) fn class_of(size: usize) -> usize {
    CLASS_BOUNDS
        .iter()
        .position(|&bound| size <= bound)
        .unwrap_or(CLASS_COUNT - 1)
}

/// The head slots of the segregated free lists.
///
/// The slots live inside the arena itself, in a 7 x 8 byte region requested
/// from the provider before the prologue block. Each slot holds the payload
/// address of the first free block of its class, or 0 when the class is
/// empty:
///
/// ```text
///  arena base
///   |
///   v
///   +--------+--------+--------+--------+--------+--------+--------+----
///   | <=512  | <=1024 | <=2048 | <=4096 | <=8192 | <=16384|  rest  | ...
///   +--------+--------+--------+--------+--------+--------+--------+----
///       |                                                     |
///       v                                                     v
///    first free block of class 0                 first free block of class 6
/// ```
pub(crate) struct ClassHeads {
    slots: NonNull<usize>,
}

impl ClassHeads {
    /// Size in bytes of the head-slot region inside the arena.
    pub fn region_size() -> usize {
        CLASS_COUNT * DSIZE
    }

    /// Takes ownership of the slot region at `region` and clears every head.
    pub unsafe fn new(region: NonNull<u8>) -> Self {
        let slots = region.cast::<usize>();

        for class in 0..CLASS_COUNT {
            unsafe { *slots.as_ptr().add(class) = 0 };
        }

        Self { slots }
    }

    pub unsafe fn head(&self, class: usize) -> Option<BlockPtr> {
        unsafe {
            let addr = *self.slots.as_ptr().add(class);

            NonNull::new(addr as *mut u8).map(BlockPtr::from_payload)
        }
    }

    pub unsafe fn set_head(&mut self, class: usize, head: Option<BlockPtr>) {
        let addr = head.map_or(0, |block| block.payload() as usize);

        unsafe { *self.slots.as_ptr().add(class) = addr };
    }
}
