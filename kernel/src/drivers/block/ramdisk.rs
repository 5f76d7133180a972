//! An in-memory block device, primarily used to exercise the FAT provider
//! without a real disk controller.

use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use crate::device::block::{BlockDevice, BlockDeviceIoError, BlockDeviceMetadata};

pub struct RamDisk {
    name: &'static str,
    block_size: usize,
    data: Mutex<Vec<u8>>,
}

impl RamDisk {
    pub fn new(name: &'static str, block_size: usize, total_blocks: usize) -> Self {
        Self {
            name,
            block_size,
            data: Mutex::new(vec![0u8; block_size * total_blocks]),
        }
    }
}

impl BlockDevice for RamDisk {
    fn metadata(&self) -> BlockDeviceMetadata {
        BlockDeviceMetadata {
            name: self.name,
            block_size: self.block_size,
            total_blocks: self.data.lock().len() / self.block_size,
        }
    }

    fn read_block(&self, sector: u64, count: u32, buf: &mut [u8]) -> Result<(), BlockDeviceIoError> {
        let len = count as usize * self.block_size;
        if buf.len() != len {
            return Err(BlockDeviceIoError::MismatchedBlockSize);
        }

        let start = sector as usize * self.block_size;
        let data = self.data.lock();
        let end = start
            .checked_add(len)
            .ok_or(BlockDeviceIoError::OffsetOutOfBounds)?;
        if end > data.len() {
            return Err(BlockDeviceIoError::OffsetOutOfBounds);
        }

        buf.copy_from_slice(&data[start..end]);
        Ok(())
    }

    fn write_block(&self, sector: u64, count: u32, buf: &[u8]) -> Result<(), BlockDeviceIoError> {
        let len = count as usize * self.block_size;
        if buf.len() != len {
            return Err(BlockDeviceIoError::MismatchedBlockSize);
        }

        let start = sector as usize * self.block_size;
        let mut data = self.data.lock();
        let end = start
            .checked_add(len)
            .ok_or(BlockDeviceIoError::OffsetOutOfBounds)?;
        if end > data.len() {
            return Err(BlockDeviceIoError::OffsetOutOfBounds);
        }

        data[start..end].copy_from_slice(buf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_sector() {
        let disk = RamDisk::new("ramdisk0", 512, 16);

        let mut sector = [0xAAu8; 512];
        disk.write_block(3, 1, &sector).unwrap();

        sector.fill(0);
        disk.read_block(3, 1, &mut sector).unwrap();

        assert!(sector.iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn rejects_out_of_range_reads() {
        let disk = RamDisk::new("ramdisk0", 512, 4);
        let mut buf = [0u8; 512];

        assert_eq!(
            disk.read_block(10, 1, &mut buf),
            Err(BlockDeviceIoError::OffsetOutOfBounds)
        );
    }
}
