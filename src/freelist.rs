use std::ptr::NonNull;

use crate::block::BlockPtr;
use crate::classes::{class_of, ClassHeads};

/// The segregated free lists of the allocator.
///
/// Each size class keeps its free blocks in a doubly linked list threaded
/// through the blocks' own payloads. Instead of full pointers the links are
/// signed 32-bit *deltas* between payload addresses:
///
/// ```text
///              class head
///                  |
///                  v
///  +--------+-------------+------   ------+-------------+------
///  | header | pred: 0     |        header | pred: A - B |
///  |        | succ: B - A |  ...          | succ: 0     |  ...
///  +--------+-------------+------   ------+-------------+------
///   block A  ^                    block B  ^
///            |                             |
///            +--- payload doubles as the ---+
///                 list node while free
/// ```
///
/// Because the whole arena spans well under 2 GiB, the difference between
/// any two payload addresses fits a signed 32-bit word. Storing deltas
/// rather than native pointers halves the per-block link overhead on 64-bit
/// hosts, and it is what lets the minimum block stay at 16 bytes: the two
/// link words fit exactly in the 8 payload bytes every block is guaranteed
/// to have.
///
/// A delta of 0 marks the end of the list in either direction; the head of
/// each class always carries a 0 `pred` delta.
pub(crate) struct FreeLists {
    heads: ClassHeads,
}

impl FreeLists {
    /// Builds the lists over the head-slot region at `region`, clearing
    /// every class.
    pub unsafe fn new(region: NonNull<u8>) -> Self {
        Self { heads: unsafe { ClassHeads::new(region) } }
    }

    /// First free block of `class`, if the class has any.
    pub unsafe fn head(&self, class: usize) -> Option<BlockPtr> {
        unsafe { self.heads.head(class) }
    }

    /// Prepends `block` to the list of its size class. The block must
    /// already carry free tags with its final size.
    pub unsafe fn insert(&mut self, block: BlockPtr) {
        unsafe {
            let class = class_of(block.size());

            block.set_pred(None);

            match self.heads.head(class) {
                Some(old_head) => {
                    block.set_succ(Some(old_head));
                    old_head.set_pred(Some(block));
                }
                None => block.set_succ(None),
            }

            self.heads.set_head(class, Some(block));
        }
    }

    /// Unlinks `block` from the list of its size class. The class is derived
    /// from the size currently in the block's header, so callers must remove
    /// a block *before* rewriting its tags.
    pub unsafe fn remove(&mut self, block: BlockPtr) {
        unsafe {
            let class = class_of(block.size());

            if self.heads.head(class) == Some(block) {
                let new_head = block.succ();

                if let Some(head) = new_head {
                    head.set_pred(None);
                }

                self.heads.set_head(class, new_head);
                return;
            }

            // Not the head, so it has a predecessor unless the heap is
            // already corrupt.
            let Some(pred) = block.pred() else { return };

            match block.succ() {
                Some(succ) => {
                    pred.set_succ(Some(succ));
                    succ.set_pred(Some(pred));
                }
                None => pred.set_succ(None),
            }
        }
    }
}
