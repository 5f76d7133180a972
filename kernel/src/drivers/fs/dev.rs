use alloc::{boxed::Box, sync::Arc, vec::Vec};

use crate::{
    device::{
        block::{BlockDevice, BlockIoctl, get_block_device, list_block_devices},
        char::{CharDevice, get_char_device, list_char_devices},
    },
    fs::{
        DirectoryOperations, File, FileOperations, FileSystem, FileSystemMetadata, FileSystemType,
        FileSystemTypeMetadata, FsNode, FsNodeId, FsNodeOperations, MountFlags, NodeKind,
        impl_fs_ops_for_self,
        vfs::{self, DirectoryEntry, IoError, MountId},
    },
    util::sync_cell::SynCell,
};

/// Reads `buffer.len()` bytes starting at byte `offset` from a block
/// device, one sector at a time, since [`BlockDevice::read_block`] only
/// deals in whole sectors.
fn read_through_block_device(
    device: &dyn BlockDevice,
    offset: usize,
    buffer: &mut [u8],
) -> Result<usize, IoError> {
    let block_size = device.metadata().block_size;
    let mut sector = alloc::vec![0u8; block_size];
    let mut read = 0;

    while read < buffer.len() {
        let pos = offset + read;
        let sector_index = (pos / block_size) as u64;
        let offset_in_sector = pos % block_size;

        device
            .read_block(sector_index, 1, &mut sector)
            .map_err(|_| IoError::Io)?;

        let n = (buffer.len() - read).min(block_size - offset_in_sector);
        buffer[read..read + n].copy_from_slice(&sector[offset_in_sector..offset_in_sector + n]);
        read += n;
    }

    Ok(read)
}

/// Writes `buffer` to byte `offset` on a block device, read-modify-writing
/// whichever sectors are only partially covered by `buffer`.
fn write_through_block_device(
    device: &dyn BlockDevice,
    offset: usize,
    buffer: &[u8],
) -> Result<usize, IoError> {
    let block_size = device.metadata().block_size;
    let mut sector = alloc::vec![0u8; block_size];
    let mut written = 0;

    while written < buffer.len() {
        let pos = offset + written;
        let sector_index = (pos / block_size) as u64;
        let offset_in_sector = pos % block_size;

        device
            .read_block(sector_index, 1, &mut sector)
            .map_err(|_| IoError::Io)?;

        let n = (buffer.len() - written).min(block_size - offset_in_sector);
        sector[offset_in_sector..offset_in_sector + n].copy_from_slice(&buffer[written..written + n]);

        device
            .write_block(sector_index, 1, &sector)
            .map_err(|_| IoError::Io)?;
        written += n;
    }

    Ok(written)
}

/// `ioctl` request codes `DevFileSystem` forwards to a block device's
/// [`BlockDevice::ioctl`].
pub const DISK_IOCTL_GET_SECTOR_COUNT: u32 = 0;
pub const DISK_IOCTL_GET_SECTOR_SIZE_BYTES: u32 = 1;

pub struct DevFileSystemType;

impl FileSystemType for DevFileSystemType {
    fn metadata(&self) -> &FileSystemTypeMetadata {
        &FileSystemTypeMetadata {
            name: "devfs",
            magic: &[],
        }
    }

    fn mount(
        self: Arc<Self>,
        mount_id: MountId,
        source: &str,
        flags: MountFlags,
    ) -> Result<Arc<dyn FileSystem>, IoError> {
        assert_eq!(source, "", "dev does not take a source argument");

        Ok(Arc::new(DevFileSystem {
            metadata: FileSystemMetadata {
                device: None,
                mount_flags: flags,
                block_size: 512,
                max_file_size: usize::MAX,
                file_system_type: self.clone(),
            },
            root: Arc::new(FsNode {
                mount_id,
                id: FsNodeId::ZERO,
                kind: NodeKind::DIRECTORY,
                dirty: false,
                size: 0,
                accessed_at: 0,
                created_at: 0,
                modified_at: 0,
                private_data: None,
            }),
            next_node_id: SynCell::new(FsNodeId::new(1)),
        }))
    }

    fn unmount(self: Arc<Self>, _instance: Arc<dyn FileSystem>) {
        todo!("unmount dev file system")
    }
}

pub struct DevFileSystem {
    metadata: FileSystemMetadata,
    next_node_id: SynCell<FsNodeId>,
    root: Arc<FsNode>,
}

impl DevFileSystem {
    fn next_node_id(&self) -> FsNodeId {
        self.next_node_id
            .replace(|id| FsNodeId::new(id.as_u64() + 1))
    }
}

impl FileSystem for DevFileSystem {
    fn metadata(&self) -> &FileSystemMetadata {
        &self.metadata
    }

    fn root_directory(&self) -> Arc<FsNode> {
        self.root.clone()
    }

    impl_fs_ops_for_self!();
}

impl FsNodeOperations for DevFileSystem {
    fn write_node(&self, _node: &FsNode) -> Result<(), ()> {
        // no-op because we dont persist files
        Ok(())
    }

    fn evict_node(&self, _node: &FsNode) -> Result<(), ()> {
        // no-op because we dont persist files
        Ok(())
    }
}

impl FileOperations for DevFileSystem {
    fn read(&self, file: &File, offset: usize, buffer: &mut [u8]) -> Result<usize, IoError> {
        if file.node.kind.contains(NodeKind::CHARACTER_DEVICE) {
            let c_dev = file.node.data_as::<Arc<dyn CharDevice>>();
            c_dev.file_operations().read(file, offset, buffer)
        } else {
            let b_dev = file.node.data_as::<Arc<dyn BlockDevice>>();
            read_through_block_device(b_dev.as_ref(), offset, buffer)
        }
    }

    fn write(&self, file: &File, offset: usize, buffer: &[u8]) -> Result<usize, IoError> {
        if file.node.kind.contains(NodeKind::CHARACTER_DEVICE) {
            let c_dev = file.node.data_as::<Arc<dyn CharDevice>>();
            c_dev.file_operations().write(file, offset, buffer)
        } else {
            let b_dev = file.node.data_as::<Arc<dyn BlockDevice>>();
            write_through_block_device(b_dev.as_ref(), offset, buffer)
        }
    }

    fn ioctl(&self, file: &File, request: u32, _arg: usize) -> Result<usize, IoError> {
        if !file.node.kind.contains(NodeKind::BLOCK_DEVICE) {
            return Err(IoError::OperationNotSupported);
        }

        let b_dev = file.node.data_as::<Arc<dyn BlockDevice>>();
        let request = match request {
            DISK_IOCTL_GET_SECTOR_COUNT => BlockIoctl::GetSectorCount,
            DISK_IOCTL_GET_SECTOR_SIZE_BYTES => BlockIoctl::GetSectorSizeBytes,
            _ => return Err(IoError::Invalid),
        };

        b_dev
            .ioctl(request)
            .map(|v| v as usize)
            .map_err(|_| IoError::Io)
    }
}

impl DirectoryOperations for DevFileSystem {
    fn lookup(
        &self,
        entry: Arc<DirectoryEntry>,
        name: &str,
    ) -> Result<Option<Arc<DirectoryEntry>>, IoError> {
        assert!(entry.node.is_directory());

        // We only support a single directory right now, so just lookup the name
        // in the device tables

        if let Some(d) = get_char_device(name) {
            return Ok(Some(Arc::new(DirectoryEntry {
                name: d.metadata().name.into(),
                node: Arc::new(FsNode {
                    id: self.next_node_id(),
                    mount_id: self.root.mount_id,
                    kind: NodeKind::CHARACTER_DEVICE,
                    dirty: false,
                    size: 0,
                    accessed_at: 0,
                    created_at: 0,
                    modified_at: 0,
                    private_data: Some(Box::new(d)),
                }),
                parent: Some(vfs::get().get_mount_root(self.root.mount_id).unwrap()),
            })));
        }

        Ok(get_block_device(name).map(|d| {
            let size = (d.metadata().block_size * d.metadata().total_blocks) as u64;

            Arc::new(DirectoryEntry {
                name: d.metadata().name.into(),
                node: Arc::new(FsNode {
                    id: self.next_node_id(),
                    mount_id: self.root.mount_id,
                    kind: NodeKind::BLOCK_DEVICE,
                    dirty: false,
                    size: size as usize,
                    accessed_at: 0,
                    created_at: 0,
                    modified_at: 0,
                    private_data: Some(Box::new(d)),
                }),
                parent: Some(vfs::get().get_mount_root(self.root.mount_id).unwrap()),
            })
        }))
    }

    fn read_directory(
        &self,
        entry: Arc<DirectoryEntry>,
    ) -> Result<Vec<Arc<DirectoryEntry>>, IoError> {
        assert!(entry.node.is_directory());

        // We only support a single directory right now, so just list all
        // devices currently registered in the device table

        // FIXME: we should always be returning the same fsnode ids for any
        // given device but for now this is ok

        let char_devices = list_char_devices().into_iter().map(|d| {
            Arc::new(DirectoryEntry {
                name: d.metadata().name.into(),
                node: Arc::new(FsNode {
                    id: self.next_node_id(),
                    mount_id: self.root.mount_id,
                    kind: NodeKind::CHARACTER_DEVICE,
                    dirty: false,
                    size: 0,
                    accessed_at: 0,
                    created_at: 0,
                    modified_at: 0,
                    private_data: Some(Box::new(d)),
                }),
                parent: Some(vfs::get().get_mount_root(self.root.mount_id).unwrap()),
            })
        });

        let block_devices = list_block_devices().into_iter().map(|d| {
            let size = (d.metadata().block_size * d.metadata().total_blocks) as u64;

            Arc::new(DirectoryEntry {
                name: d.metadata().name.into(),
                node: Arc::new(FsNode {
                    id: self.next_node_id(),
                    mount_id: self.root.mount_id,
                    kind: NodeKind::BLOCK_DEVICE,
                    dirty: false,
                    size: size as usize,
                    accessed_at: 0,
                    created_at: 0,
                    modified_at: 0,
                    private_data: Some(Box::new(d)),
                }),
                parent: Some(vfs::get().get_mount_root(self.root.mount_id).unwrap()),
            })
        });

        Ok(char_devices.chain(block_devices).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{drivers::block::ramdisk::RamDisk, fs::FileMode};

    fn block_node(fs: &DevFileSystem, device: Arc<dyn BlockDevice>) -> Arc<FsNode> {
        Arc::new(FsNode {
            id: fs.next_node_id(),
            mount_id: fs.root.mount_id,
            kind: NodeKind::BLOCK_DEVICE,
            dirty: false,
            size: 0,
            accessed_at: 0,
            created_at: 0,
            modified_at: 0,
            private_data: Some(Box::new(device)),
        })
    }

    fn fs() -> DevFileSystem {
        DevFileSystem {
            metadata: FileSystemMetadata {
                device: None,
                mount_flags: MountFlags::READ | MountFlags::WRITE,
                block_size: 512,
                max_file_size: usize::MAX,
                file_system_type: Arc::new(DevFileSystemType),
            },
            root: Arc::new(FsNode {
                mount_id: MountId::new(),
                id: FsNodeId::ZERO,
                kind: NodeKind::DIRECTORY,
                dirty: false,
                size: 0,
                accessed_at: 0,
                created_at: 0,
                modified_at: 0,
                private_data: None,
            }),
            next_node_id: SynCell::new(FsNodeId::new(1)),
        }
    }

    #[test]
    fn ioctl_get_sector_count_round_trips_through_the_block_device() {
        let fs = fs();
        let device: Arc<dyn BlockDevice> = Arc::new(RamDisk::new("fd0", 512, 2880));
        let node = block_node(&fs, device);
        let file = fs.open(node, FileMode::Read).unwrap();

        let sectors = fs.ioctl(&file, DISK_IOCTL_GET_SECTOR_COUNT, 0).unwrap();
        assert_eq!(sectors, 2880);

        let size = fs
            .ioctl(&file, DISK_IOCTL_GET_SECTOR_SIZE_BYTES, 0)
            .unwrap();
        assert_eq!(size, 512);
    }

    #[test]
    fn ioctl_rejects_character_devices_and_unknown_requests() {
        let fs = fs();
        let device: Arc<dyn BlockDevice> = Arc::new(RamDisk::new("fd0", 512, 2880));
        let node = block_node(&fs, device);
        let file = fs.open(node, FileMode::Read).unwrap();

        assert_eq!(fs.ioctl(&file, 99, 0), Err(IoError::Invalid));
    }
}
