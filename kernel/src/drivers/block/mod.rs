use alloc::sync::Arc;

use ramdisk::RamDisk;

use crate::device::block::{BlockDeviceRegistrationError, register_block_device};

pub mod floppy;
pub mod ramdisk;

/// Registers the block devices available on this machine. The real
/// [`floppy::FloppyDisk`] driver's sector I/O is not implemented yet, so a
/// RAM-backed disk stands in as `/dev/fd0` for now -- enough to mount and
/// exercise the FAT provider end to end.
pub fn init() -> Result<(), BlockDeviceRegistrationError> {
    register_block_device(Arc::new(RamDisk::new("fd0", 512, 2880)))?;

    Ok(())
}
