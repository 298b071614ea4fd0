use segalloc::Heap;

fn log_alloc(addr: *mut u8, size: usize) {
    println!("Requested {size} bytes of memory");
    println!("Received this address: {addr:?}");
}

fn main() {
    let mut heap = Heap::new().expect("could not reserve the heap arena");

    let addr1 = heap.allocate(8);
    log_alloc(addr1, 8);

    let addr2 = heap.allocate(100);
    log_alloc(addr2, 100);

    let addr3 = heap.allocate(4096);
    log_alloc(addr3, 4096);

    unsafe {
        addr1.write_bytes(0x11, 8);
    }

    let moved = heap.reallocate(addr1, 256);
    println!("Reallocated the first block to 256 bytes at: {moved:?}");

    heap.free(addr2);
    heap.free(addr3);
    heap.free(moved);

    println!("\nHeap after freeing everything:");
    heap.check(true);
}
