use alloc::sync::Arc;

use dev::DevFileSystemType;
use fat::FatFileSystemType;
use ram::RamFileSystemType;
use socket::SocketFileSystemType;
use sysinfo::SysinfoFileSystemType;

use crate::fs::registry::{FileSystemRegistrationError, register_file_system};

mod dev;
pub mod fat;
mod ram;
pub mod shm;
pub mod socket;
pub mod sysinfo;

pub fn init() -> Result<(), FileSystemRegistrationError> {
    register_file_system(Arc::new(RamFileSystemType))?;
    register_file_system(Arc::new(DevFileSystemType))?;
    register_file_system(Arc::new(FatFileSystemType))?;
    register_file_system(Arc::new(SysinfoFileSystemType))?;
    register_file_system(Arc::new(SocketFileSystemType))?;

    Ok(())
}
