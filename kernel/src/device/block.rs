use alloc::{collections::btree_map::BTreeMap, sync::Arc, vec::Vec};

use spin::Mutex;

/// Represents an abstract device which can read and write data to/from a
/// store in fixed-size sectors.
///
/// `initialize`/`status` default to success, matching how this provider's
/// underlying disk driver behaves in practice: both operations are no-ops on
/// the devices this kernel actually supports.
pub trait BlockDevice: Send + Sync {
    fn metadata(&self) -> BlockDeviceMetadata;

    fn initialize(&self) -> Result<(), BlockDeviceIoError> {
        Ok(())
    }

    fn status(&self) -> Result<(), BlockDeviceIoError> {
        Ok(())
    }

    /// Reads `count` sectors starting at `sector` into `buf`. `buf` must be
    /// exactly `count * metadata().block_size` bytes.
    fn read_block(&self, sector: u64, count: u32, buf: &mut [u8]) -> Result<(), BlockDeviceIoError> {
        let _ = (sector, count, buf);
        Err(BlockDeviceIoError::OperationNotSupported)
    }

    /// Writes `count` sectors starting at `sector` from `buf`. `buf` must be
    /// exactly `count * metadata().block_size` bytes.
    fn write_block(&self, sector: u64, count: u32, buf: &[u8]) -> Result<(), BlockDeviceIoError> {
        let _ = (sector, count, buf);
        Err(BlockDeviceIoError::OperationNotSupported)
    }

    /// Device control requests. The two requests every block device
    /// supports (sector count and sector size) have a default
    /// implementation derived from [`BlockDevice::metadata`]; device
    /// specific requests should be added by overriding this method.
    fn ioctl(&self, request: BlockIoctl) -> Result<u64, BlockDeviceIoError> {
        match request {
            BlockIoctl::GetSectorCount => Ok(self.metadata().total_blocks as u64),
            BlockIoctl::GetSectorSizeBytes => Ok(self.metadata().block_size as u64),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BlockDeviceMetadata {
    pub name: &'static str,
    pub block_size: usize,
    pub total_blocks: usize,
}

lazy_static::lazy_static! {
    static ref BLOCK_DEVICE_REGISTRY: Mutex<BTreeMap<&'static str, Arc<dyn BlockDevice>>>
        = Default::default();
}

#[derive(Debug)]
pub enum BlockDeviceRegistrationError {
    NameConflict,
}

pub fn register_block_device(device: Arc<dyn BlockDevice>) -> Result<(), BlockDeviceRegistrationError> {
    let mut registry = BLOCK_DEVICE_REGISTRY.lock();

    let name = device.metadata().name;

    if registry.contains_key(name) {
        return Err(BlockDeviceRegistrationError::NameConflict);
    }

    registry.insert(name, device);

    Ok(())
}

pub fn list_block_devices() -> Vec<Arc<dyn BlockDevice>> {
    BLOCK_DEVICE_REGISTRY.lock().values().cloned().collect()
}

pub fn get_block_device(name: &str) -> Option<Arc<dyn BlockDevice>> {
    BLOCK_DEVICE_REGISTRY.lock().get(name).cloned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockIoctl {
    GetSectorCount,
    GetSectorSizeBytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockDeviceIoError {
    /// Returned if this operation is not supported on this device
    OperationNotSupported,
    /// The provided offset was not aligned to the block size
    UnalignedOffset,
    /// The provided offset was out of range for the device
    OffsetOutOfBounds,
    /// The provided buffer was not a multiple of the block size
    MismatchedBlockSize,
    /// The underlying device reported a hardware or media error
    DeviceError,
}
