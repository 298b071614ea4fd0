use crate::block::{BlockPtr, DSIZE, OVERHEAD};
use crate::classes::{class_of, ClassHeads, CLASS_COUNT};
use crate::heap::Heap;

/// Heap-consistency checking. Diagnostics are printed human-readably and
/// counted; nothing is repaired and nothing aborts.
impl Heap {
    /// Walks the arena block by block and every class list link by link,
    /// verifying the allocator's invariants. Returns the number of
    /// inconsistencies found, so a clean heap yields 0. With `verbose` set,
    /// every block is printed along the way.
    pub fn check(&self, verbose: bool) -> usize {
        let mut errors = 0;

        unsafe {
            if verbose {
                println!(
                    "Heap [{:p}, {:p}], {} bytes:",
                    self.arena.lo(),
                    self.arena.hi(),
                    self.arena.size()
                );
            }

            if self.first_block.size() != OVERHEAD || !self.first_block.is_allocated() {
                eprintln!("Error: bad prologue header");
                errors += 1;
            }

            // Address-ordered walk from the prologue to the epilogue.
            let mut block = self.first_block;
            let mut block_bytes = 0;
            let mut free_blocks = 0;
            let mut prev_was_free = false;

            while block.size() > 0 {
                if verbose {
                    print_block(block);
                }

                errors += check_block(block);

                if !block.is_allocated() {
                    if prev_was_free {
                        eprintln!("Error: {:p}: two free blocks in a row", block.payload());
                        errors += 1;
                    }
                    free_blocks += 1;
                }

                prev_was_free = !block.is_allocated();
                block_bytes += block.size();
                block = block.next();
            }

            if verbose {
                print_block(block);
            }

            if block.size() != 0 || !block.is_allocated() {
                eprintln!("Error: bad epilogue header");
                errors += 1;
            }

            // All arena bytes must be accounted for: the head slots, the
            // padding word, every block, and the epilogue header.
            let fixed = ClassHeads::region_size() + DSIZE;
            if block_bytes + fixed != self.arena.size() {
                eprintln!(
                    "Error: blocks cover {} bytes, arena holds {}",
                    block_bytes + fixed,
                    self.arena.size()
                );
                errors += 1;
            }

            // Per-class list walk over the succ deltas.
            let mut listed_blocks = 0;

            'classes: for class in 0..CLASS_COUNT {
                if let Some(head) = self.lists.head(class) {
                    if head.pred().is_some() {
                        eprintln!("Error: class {class}: head has a predecessor");
                        errors += 1;
                    }
                }

                let mut node = self.lists.head(class);

                while let Some(current) = node {
                    listed_blocks += 1;

                    if listed_blocks > free_blocks {
                        eprintln!("Error: class {class}: more listed blocks than free blocks");
                        errors += 1;
                        break 'classes;
                    }

                    if current.is_allocated() {
                        eprintln!("Error: {:p}: allocated block in class {class}", current.payload());
                        errors += 1;
                    }

                    if class_of(current.size()) != class {
                        eprintln!(
                            "Error: {:p}: size {} outside class {class}",
                            current.payload(),
                            current.size()
                        );
                        errors += 1;
                    }

                    if let Some(succ) = current.succ() {
                        if succ.pred() != Some(current) {
                            eprintln!(
                                "Error: {:p}: successor's pred delta does not point back",
                                current.payload()
                            );
                            errors += 1;
                        }
                    }

                    node = current.succ();
                }
            }

            if listed_blocks != free_blocks {
                eprintln!(
                    "Error: {} free blocks in the arena, {} reachable through the lists",
                    free_blocks, listed_blocks
                );
                errors += 1;
            }
        }

        errors
    }
}

unsafe fn print_block(block: BlockPtr) {
    unsafe {
        if block.size() == 0 {
            println!("{:p}: EOL", block.payload());
            return;
        }

        let tag = |allocated: bool| if allocated { 'a' } else { 'f' };

        println!(
            "{:p}: header: [{}:{}] footer: [{}:{}]",
            block.payload(),
            block.size(),
            tag(block.is_allocated()),
            *block.footer() & !0x7,
            tag(*block.footer() & 0x1 != 0),
        );
    }
}

unsafe fn check_block(block: BlockPtr) -> usize {
    let mut errors = 0;

    unsafe {
        if block.payload() as usize % DSIZE != 0 {
            eprintln!("Error: {:p} is not doubleword aligned", block.payload());
            errors += 1;
        }

        if *block.header() != *block.footer() {
            eprintln!("Error: {:p}: header does not match footer", block.payload());
            errors += 1;
        }
    }

    errors
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::pack;

    #[test]
    fn clean_heap_reports_no_errors() {
        let mut heap = Heap::new().unwrap();

        let a = heap.allocate(48);
        let b = heap.allocate(1000);
        heap.free(a);

        assert_eq!(heap.check(false), 0);
        let _ = b;
    }

    #[test]
    fn verbose_walk_reports_no_errors() {
        let mut heap = Heap::new().unwrap();

        let ptr = heap.allocate(64);
        heap.free(ptr);

        assert_eq!(heap.check(true), 0);
    }

    #[test]
    fn clobbered_footer_is_detected() {
        let mut heap = Heap::new().unwrap();

        let ptr = heap.allocate(32);

        unsafe {
            let block = BlockPtr::from_payload(std::ptr::NonNull::new(ptr).unwrap());
            *block.footer() = pack(24, false);
        }

        assert!(heap.check(false) > 0);
    }
}
