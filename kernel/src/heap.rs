//! Fixed-size heap backing `alloc::*` for this kernel build. Real physical
//! memory management is an external collaborator
//! (`fenwick_kernel::external::Vmm`), so at boot we carve a static region out
//! of BSS rather than walking a bootloader-provided memory map.

use linked_list_allocator::LockedHeap;

const HEAP_SIZE: usize = 4 * 1024 * 1024;

#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

static mut HEAP: [u8; HEAP_SIZE] = [0; HEAP_SIZE];

/// Must run exactly once, before any `alloc`-backed code executes.
pub fn init() {
    unsafe {
        let heap_start = core::ptr::addr_of_mut!(HEAP).cast::<u8>();
        ALLOCATOR.lock().init(heap_start, HEAP_SIZE);
    }
}
