//! FAT12/16/32 provider backed by the `fatfs` crate. A volume is mounted by
//! pointing at a `/dev/*` block device node; the VFS-facing surface
//! (`FatFileSystem`) keeps a small per-directory name-to-node cache and
//! otherwise re-derives everything from `fatfs` on demand.

use alloc::{boxed::Box, sync::Arc, vec::Vec};

use spin::{Mutex, RwLock};

use self::path::MAX_PATH_LEN;
use crate::{
    device::block::BlockDevice,
    fs::{
        DirectoryOperations, File, FileMode, FileOperations, FileSystem, FileSystemMetadata,
        FileSystemType, FileSystemTypeMetadata, FsNode, FsNodeId, FsNodeOperations, MountFlags,
        NodeKind, SeekFrom, impl_fs_ops_for_self,
        vfs::{self, DirectoryEntry, IoError, MountId},
    },
    util::{defer::defer_handle, sync_cell::SynCell},
};

pub mod path;
mod storage;

use storage::NodeStorage;

/// Number of FAT volumes that can be mounted at once. Mirrors the teacher's
/// taste for a small, fixed-size table over a growable one.
const MAX_VOLUMES: usize = 4;

type FatFs = fatfs::FileSystem<NodeStorage>;
type FatDir = fatfs::Dir<'static, NodeStorage>;
type FatFile = fatfs::File<'static, NodeStorage>;
type FatDirEntry = fatfs::DirEntry<'static, NodeStorage>;

/// One mounted FAT volume: the block device it was opened on, and the
/// `'static` (leaked) `fatfs::FileSystem` instance borrowing it.
struct FatVolume {
    #[allow(dead_code)]
    device: Arc<dyn BlockDevice>,
    fs: &'static FatFs,
}

impl FatVolume {
    fn root_dir(&self) -> FatDir {
        self.fs.root_dir()
    }
}

struct VolumeTable {
    slots: [Option<Arc<FatVolume>>; MAX_VOLUMES],
}

impl VolumeTable {
    const fn new() -> Self {
        Self {
            slots: [const { None }; MAX_VOLUMES],
        }
    }

    fn reserve(&mut self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    fn install(&mut self, index: usize, volume: Arc<FatVolume>) {
        self.slots[index] = Some(volume);
    }

    fn release(&mut self, index: usize) {
        self.slots[index] = None;
    }

    fn get(&self, index: usize) -> Option<Arc<FatVolume>> {
        self.slots[index].clone()
    }
}

lazy_static::lazy_static! {
    static ref VOLUME_TABLE: Mutex<VolumeTable> = Mutex::new(VolumeTable::new());
}

pub struct FatFileSystemType;

impl FileSystemType for FatFileSystemType {
    fn metadata(&self) -> &FileSystemTypeMetadata {
        &FileSystemTypeMetadata {
            name: "fat",
            magic: &[0x55, 0xAA],
        }
    }

    fn mount(
        self: Arc<Self>,
        mount_id: MountId,
        source: &str,
        flags: MountFlags,
    ) -> Result<Arc<dyn FileSystem>, IoError> {
        let device_node = vfs::get().get_node(source)?;
        if !device_node.kind.contains(NodeKind::BLOCK_DEVICE) {
            return Err(IoError::NotReady);
        }
        let device = device_node.data_as::<Arc<dyn BlockDevice>>().clone();
        let block_size = device.metadata().block_size;

        let slot = VOLUME_TABLE.lock().reserve().ok_or(IoError::OutOfMemory)?;
        let release_slot = defer_handle!({
            VOLUME_TABLE.lock().release(slot);
        });

        let storage = NodeStorage::new(device.clone());
        let filesystem =
            FatFs::new(storage, fatfs::FsOptions::new()).map_err(|_| IoError::Io)?;
        let filesystem: &'static FatFs = Box::leak(Box::new(filesystem));

        let free_filesystem = defer_handle!({
            // SAFETY: `filesystem` was obtained from `Box::leak` immediately
            // above and nothing has cloned the reference outside this
            // function on this failure path.
            unsafe {
                drop(Box::from_raw(
                    filesystem as *const FatFs as *mut FatFs,
                ));
            }
        });

        let volume = Arc::new(FatVolume { device, fs: filesystem });
        VOLUME_TABLE.lock().install(slot, volume);

        let root = Arc::new(FsNode {
            mount_id,
            id: FsNodeId::ZERO,
            kind: NodeKind::DIRECTORY,
            dirty: false,
            size: 0,
            accessed_at: 0,
            created_at: 0,
            modified_at: 0,
            private_data: Some(Box::new(FatDirectoryNode::default())),
        });

        release_slot.cancel();
        free_filesystem.cancel();

        Ok(Arc::new(FatFileSystem {
            metadata: FileSystemMetadata {
                device: None,
                mount_flags: flags,
                block_size,
                max_file_size: u32::MAX as usize,
                file_system_type: self.clone(),
            },
            root,
            volume_index: slot,
            next_node_id: SynCell::new(FsNodeId::new(1)),
        }))
    }

    fn unmount(self: Arc<Self>, _instance: Arc<dyn FileSystem>) {
        todo!("unmount fat file system and free its leaked FileSystem instance")
    }
}

pub struct FatFileSystem {
    metadata: FileSystemMetadata,
    root: Arc<FsNode>,
    volume_index: usize,
    next_node_id: SynCell<FsNodeId>,
}

impl FatFileSystem {
    fn next_node_id(&self) -> FsNodeId {
        self.next_node_id
            .replace(|id| FsNodeId::new(id.as_u64() + 1))
    }

    fn volume(&self) -> Arc<FatVolume> {
        VOLUME_TABLE
            .lock()
            .get(self.volume_index)
            .expect("mounted fat file system should always have a volume table entry")
    }

    fn build_entry(
        &self,
        parent: &Arc<DirectoryEntry>,
        name: &str,
        node: Arc<FsNode>,
    ) -> Arc<DirectoryEntry> {
        Arc::new(DirectoryEntry {
            name: name.into(),
            node,
            parent: Some(parent.clone()),
        })
    }

    /// Resolves the directory entry currently behind `entry` to a live
    /// `fatfs::Dir`, re-deriving its path from the parent chain.
    fn open_dir(&self, entry: &Arc<DirectoryEntry>) -> Result<(FatDir, heapless::String<MAX_PATH_LEN>), IoError> {
        let full_path = path::assemble(self.volume_index, entry)?;
        let rel = path::without_volume_prefix(&full_path);
        let trimmed = rel.trim_start_matches('/');

        let volume = self.volume();
        let dir = if trimmed.is_empty() {
            volume.root_dir()
        } else {
            volume.root_dir().open_dir(trimmed).map_err(|_| IoError::Io)?
        };

        let mut rel_owned = heapless::String::<MAX_PATH_LEN>::new();
        rel_owned.push_str(rel).map_err(|_| IoError::NameTooLong)?;

        Ok((dir, rel_owned))
    }

    fn build_child_node(
        &self,
        parent_rel_path: &str,
        name: &str,
        found: &FatDirEntry,
    ) -> Result<Arc<FsNode>, IoError> {
        if found.is_dir() {
            Ok(Arc::new(FsNode {
                id: self.next_node_id(),
                mount_id: self.root.mount_id,
                kind: NodeKind::DIRECTORY,
                dirty: false,
                size: 0,
                accessed_at: 0,
                created_at: 0,
                modified_at: 0,
                private_data: Some(Box::new(FatDirectoryNode::default())),
            }))
        } else {
            let rel_path = path::join(parent_rel_path, name)?;

            Ok(Arc::new(FsNode {
                id: self.next_node_id(),
                mount_id: self.root.mount_id,
                kind: NodeKind::FILE,
                dirty: false,
                size: found.len() as usize,
                accessed_at: 0,
                created_at: 0,
                modified_at: 0,
                private_data: Some(Box::new(FatFileNode { path: rel_path })),
            }))
        }
    }
}

impl FileSystem for FatFileSystem {
    fn metadata(&self) -> &FileSystemMetadata {
        &self.metadata
    }

    fn root_directory(&self) -> Arc<FsNode> {
        self.root.clone()
    }

    impl_fs_ops_for_self!();
}

impl FsNodeOperations for FatFileSystem {
    fn write_node(&self, _node: &FsNode) -> Result<(), ()> {
        // fatfs flushes on file close; metadata has nowhere else to go
        Ok(())
    }

    fn evict_node(&self, _node: &FsNode) -> Result<(), ()> {
        Ok(())
    }
}

/// Cached directory listing, same role as `ram::RamDirectoryNode`: avoids
/// re-walking `fatfs` for names this provider has already resolved.
#[derive(Default)]
struct FatDirectoryNode {
    children: RwLock<alloc::collections::btree_map::BTreeMap<Arc<str>, Arc<FsNode>>>,
}

/// The fatfs-relative path of a file node (no volume prefix), kept around so
/// `FileOperations::open` can re-open it without knowing its own
/// `DirectoryEntry` parent chain.
struct FatFileNode {
    path: heapless::String<MAX_PATH_LEN>,
}

struct FatOpenFile {
    file: Mutex<FatFile>,
}

fn opened_file(file: &File) -> Result<&FatOpenFile, IoError> {
    file.private_data
        .as_ref()
        .and_then(|d| d.downcast_ref::<FatOpenFile>())
        .ok_or(IoError::NotAFile)
}

impl FileOperations for FatFileSystem {
    fn open(&self, node: Arc<FsNode>, mode: FileMode) -> Result<File, IoError> {
        if node.kind.contains(NodeKind::DIRECTORY) {
            return Err(IoError::NotAFile);
        }

        let file_node = node.data_as::<FatFileNode>();
        let rel = file_node.path.trim_start_matches('/');
        let volume = self.volume();

        let file = match mode {
            FileMode::Read => volume.root_dir().open_file(rel).map_err(|_| IoError::Io)?,
            FileMode::Write | FileMode::Append => {
                volume.root_dir().create_file(rel).map_err(|_| IoError::Io)?
            }
        };

        // File::new_with_data starts the cursor at node.size for Append, so
        // the first write() call's own seek to that offset lands at EOF.
        Ok(File::new_with_data(
            node,
            mode,
            Box::new(FatOpenFile { file: Mutex::new(file) }),
        ))
    }

    fn flush(&self, file: &File) -> Result<(), IoError> {
        if file.node.kind.contains(NodeKind::DIRECTORY) {
            return Ok(());
        }

        use fatfs::Write as _;
        opened_file(file)?.file.lock().flush().map_err(|_| IoError::Io)
    }

    fn seek(&self, file: &File, position: SeekFrom) -> Result<usize, IoError> {
        use fatfs::Seek as _;

        let pos = match position {
            SeekFrom::Start(p) => fatfs::SeekFrom::Start(p as u64),
            SeekFrom::Current(p) => fatfs::SeekFrom::Current(p as i64),
            SeekFrom::End(p) => fatfs::SeekFrom::End(p as i64),
        };

        let new_pos = opened_file(file)?
            .file
            .lock()
            .seek(pos)
            .map_err(|_| IoError::Io)?;

        Ok(new_pos as usize)
    }

    fn read(&self, file: &File, offset: usize, buffer: &mut [u8]) -> Result<usize, IoError> {
        use fatfs::{Read as _, Seek as _};

        let opened = opened_file(file)?;
        let mut locked = opened.file.lock();
        locked
            .seek(fatfs::SeekFrom::Start(offset as u64))
            .map_err(|_| IoError::Io)?;

        locked.read(buffer).map_err(|_| IoError::Io)
    }

    fn write(&self, file: &File, offset: usize, buffer: &[u8]) -> Result<usize, IoError> {
        use fatfs::{Seek as _, Write as _};

        let opened = opened_file(file)?;
        let mut locked = opened.file.lock();

        // Append always targets the current end of file, not the
        // VFS-tracked cursor, so concurrent appenders can't clobber each
        // other's writes the way a fixed offset would.
        let seek_to = if file.mode == FileMode::Append {
            fatfs::SeekFrom::End(0)
        } else {
            fatfs::SeekFrom::Start(offset as u64)
        };
        locked.seek(seek_to).map_err(|_| IoError::Io)?;

        locked.write(buffer).map_err(|_| IoError::Io)
    }

    fn ftruncate(&self, file: &File, length: usize) -> Result<(), IoError> {
        use fatfs::Seek as _;

        let opened = opened_file(file)?;
        let mut locked = opened.file.lock();
        locked
            .seek(fatfs::SeekFrom::Start(length as u64))
            .map_err(|_| IoError::Io)?;

        locked.truncate().map_err(|_| IoError::Io)
    }
}

impl DirectoryOperations for FatFileSystem {
    fn create_file(
        &self,
        directory: Arc<DirectoryEntry>,
        name: &str,
    ) -> Result<Arc<DirectoryEntry>, IoError> {
        let (dir, rel) = self.open_dir(&directory)?;
        dir.create_file(name).map_err(|_| IoError::Io)?;

        let rel_path = path::join(&rel, name)?;
        let node = Arc::new(FsNode {
            id: self.next_node_id(),
            mount_id: self.root.mount_id,
            kind: NodeKind::FILE,
            dirty: false,
            size: 0,
            accessed_at: 0,
            created_at: 0,
            modified_at: 0,
            private_data: Some(Box::new(FatFileNode { path: rel_path })),
        });

        let dir_node = directory.node.data_as::<FatDirectoryNode>();
        dir_node.children.write().insert(name.into(), node.clone());

        Ok(self.build_entry(&directory, name, node))
    }

    fn create_directory(
        &self,
        directory: Arc<DirectoryEntry>,
        name: &str,
    ) -> Result<Arc<DirectoryEntry>, IoError> {
        let (dir, _rel) = self.open_dir(&directory)?;
        dir.create_dir(name).map_err(|_| IoError::Io)?;

        let node = Arc::new(FsNode {
            id: self.next_node_id(),
            mount_id: self.root.mount_id,
            kind: NodeKind::DIRECTORY,
            dirty: false,
            size: 0,
            accessed_at: 0,
            created_at: 0,
            modified_at: 0,
            private_data: Some(Box::new(FatDirectoryNode::default())),
        });

        let dir_node = directory.node.data_as::<FatDirectoryNode>();
        dir_node.children.write().insert(name.into(), node.clone());

        Ok(self.build_entry(&directory, name, node))
    }

    fn remove_file(&self, directory: Arc<DirectoryEntry>, name: &str) -> Result<(), IoError> {
        let (dir, _rel) = self.open_dir(&directory)?;
        dir.remove(name).map_err(|_| IoError::Io)?;

        let dir_node = directory.node.data_as::<FatDirectoryNode>();
        dir_node.children.write().remove(name);

        Ok(())
    }

    fn remove_directory(&self, directory: Arc<DirectoryEntry>, name: &str) -> Result<(), IoError> {
        let (dir, _rel) = self.open_dir(&directory)?;
        dir.remove(name).map_err(|_| IoError::Io)?;

        let dir_node = directory.node.data_as::<FatDirectoryNode>();
        dir_node.children.write().remove(name);

        Ok(())
    }

    fn lookup(
        &self,
        entry: Arc<DirectoryEntry>,
        name: &str,
    ) -> Result<Option<Arc<DirectoryEntry>>, IoError> {
        let dir_node = entry.node.data_as::<FatDirectoryNode>();

        if let Some(cached) = dir_node.children.read().get(name).cloned() {
            return Ok(Some(self.build_entry(&entry, name, cached)));
        }

        let (dir, rel) = self.open_dir(&entry)?;

        let found = dir.iter().find_map(|res| {
            let candidate = res.ok()?;
            (candidate.file_name() == name).then_some(candidate)
        });

        let Some(found) = found else {
            return Ok(None);
        };

        let node = self.build_child_node(&rel, name, &found)?;
        dir_node.children.write().insert(name.into(), node.clone());

        Ok(Some(self.build_entry(&entry, name, node)))
    }

    fn read_directory(
        &self,
        entry: Arc<DirectoryEntry>,
    ) -> Result<Vec<Arc<DirectoryEntry>>, IoError> {
        let dir_node = entry.node.data_as::<FatDirectoryNode>();
        let (dir, rel) = self.open_dir(&entry)?;

        let mut out = Vec::new();
        for result in dir.iter() {
            let found = result.map_err(|_| IoError::Io)?;
            let name = found.file_name();

            let node = if let Some(cached) = dir_node.children.read().get(name.as_str()).cloned() {
                cached
            } else {
                let node = self.build_child_node(&rel, &name, &found)?;
                dir_node.children.write().insert(name.as_str().into(), node.clone());
                node
            };

            out.push(self.build_entry(&entry, &name, node));
        }

        Ok(out)
    }
}
