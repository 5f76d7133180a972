//! Adapts an `Arc<dyn BlockDevice>` to the `fatfs::{IoBase, Read, Write,
//! Seek}` traits the `fatfs` crate needs to mount a volume. Reads/writes
//! that straddle a sector boundary are clamped to the remainder of the
//! current sector; `fatfs` itself issues calls in a loop until satisfied, so
//! this mirrors the disk cursor idiom used to wire block devices into
//! `fatfs` elsewhere in the ecosystem.

use alloc::{sync::Arc, vec, vec::Vec};

use crate::device::block::{BlockDevice, BlockDeviceIoError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageError(pub BlockDeviceIoError);

impl fatfs::IoError for StorageError {
    fn is_interrupted(&self) -> bool {
        false
    }

    fn new_unexpected_eof_error() -> Self {
        StorageError(BlockDeviceIoError::OffsetOutOfBounds)
    }

    fn new_write_zero_error() -> Self {
        StorageError(BlockDeviceIoError::OffsetOutOfBounds)
    }
}

pub struct NodeStorage {
    device: Arc<dyn BlockDevice>,
    sector_size: usize,
    total_size: u64,
    position: u64,
}

impl NodeStorage {
    pub fn new(device: Arc<dyn BlockDevice>) -> Self {
        let meta = device.metadata();

        Self {
            total_size: (meta.block_size * meta.total_blocks) as u64,
            sector_size: meta.block_size,
            device,
            position: 0,
        }
    }

    fn read_sector(&self, sector: u64) -> Result<Vec<u8>, StorageError> {
        let mut buf = vec![0u8; self.sector_size];
        self.device
            .read_block(sector, 1, &mut buf)
            .map_err(StorageError)?;
        Ok(buf)
    }
}

impl fatfs::IoBase for NodeStorage {
    type Error = StorageError;
}

impl fatfs::Read for NodeStorage {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let sector = self.position / self.sector_size as u64;
        let offset_in_sector = (self.position % self.sector_size as u64) as usize;

        let sector_data = self.read_sector(sector)?;

        let available = self.sector_size - offset_in_sector;
        let n = buf.len().min(available);
        buf[..n].copy_from_slice(&sector_data[offset_in_sector..offset_in_sector + n]);

        self.position += n as u64;
        Ok(n)
    }
}

impl fatfs::Write for NodeStorage {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        let sector = self.position / self.sector_size as u64;
        let offset_in_sector = (self.position % self.sector_size as u64) as usize;

        let mut sector_data = self.read_sector(sector)?;

        let available = self.sector_size - offset_in_sector;
        let n = buf.len().min(available);
        sector_data[offset_in_sector..offset_in_sector + n].copy_from_slice(&buf[..n]);

        self.device
            .write_block(sector, 1, &sector_data)
            .map_err(StorageError)?;

        self.position += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl fatfs::Seek for NodeStorage {
    fn seek(&mut self, pos: fatfs::SeekFrom) -> Result<u64, Self::Error> {
        let new_pos = match pos {
            fatfs::SeekFrom::Start(p) => p as i64,
            fatfs::SeekFrom::Current(p) => self.position as i64 + p,
            fatfs::SeekFrom::End(p) => self.total_size as i64 + p,
        };

        if new_pos < 0 {
            return Err(StorageError(BlockDeviceIoError::OffsetOutOfBounds));
        }

        self.position = new_pos as u64;
        Ok(self.position)
    }
}
