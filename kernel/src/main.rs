#![no_std]
#![no_main]

extern crate alloc;

use alloc::sync::Arc;

use fenwick_kernel::{external, fs};
use vga::println;

mod collaborators;
mod heap;
mod logger;
mod panic;
mod vga;

use collaborators::{BootThreadScheduler, StaticPoolVmm};

/// Number of 4K frames the fake physical pool in [`collaborators`] hands out.
/// Arbitrary; real frame accounting is the out-of-scope memory manager.
const PHYSICAL_FRAME_POOL: u64 = 4096;

/// The entrypoint into the kernel. Do NOT call this function directly. It gets
/// invoked automatically by the bootloader after setting up the stack and
/// performing necessary configuration.
#[unsafe(no_mangle)]
pub extern "C" fn _start() -> ! {
    heap::init();
    logger::init();

    external::set_vmm(Arc::new(StaticPoolVmm::new(PHYSICAL_FRAME_POOL)));
    external::set_scheduler(Arc::new(BootThreadScheduler::default()));

    fs::init();

    println!("Hello World!");
    log::info!("mounted /dev, /system");

    loop {
        x86_64::instructions::hlt();
    }
}
