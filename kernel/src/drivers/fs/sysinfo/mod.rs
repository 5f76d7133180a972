//! Synthetic `/system` tree: live memory and thread accounting, plus the
//! `shm` directory the shared-memory provider in [`super::shm`] installs
//! itself onto. Every node's behavior is dispatched from a single tagged
//! union stashed in `FsNode::private_data`, the same way `DevFileSystem`
//! centralizes its read/write dispatch on `node.kind`.

use alloc::{boxed::Box, collections::btree_map::BTreeMap, sync::Arc, vec::Vec};

use spin::RwLock;

use crate::{
    drivers::fs::shm::{self, ShmRegistry},
    external::{self, ProcessId, ThreadInfo},
    fs::{
        DirectoryOperations, File, FileMode, FileOperations, FileSystem, FileSystemMetadata,
        FileSystemType, FileSystemTypeMetadata, FsNode, FsNodeId, FsNodeOperations, MountFlags,
        NodeKind, impl_fs_ops_for_self,
        vfs::{DirectoryEntry, IoError, MountId},
    },
    util::sync_cell::SynCell,
};

mod threads;

/// Minimum read buffer accepted by `meminfo/*`: large enough for a decimal
/// page count plus headroom, not a hard encoding of the value's width.
const MIN_MEMINFO_BUFFER: usize = 4;
/// Minimum read buffer accepted by `threads/<tid>`: the formatted key-value
/// block comfortably fits in this many bytes.
const MIN_THREAD_BUFFER: usize = 128;

pub struct SysinfoFileSystemType;

impl FileSystemType for SysinfoFileSystemType {
    fn metadata(&self) -> &FileSystemTypeMetadata {
        &FileSystemTypeMetadata {
            name: "sysinfofs",
            magic: &[],
        }
    }

    fn mount(
        self: Arc<Self>,
        mount_id: MountId,
        source: &str,
        flags: MountFlags,
    ) -> Result<Arc<dyn FileSystem>, IoError> {
        assert_eq!(source, "", "sysinfofs does not take a source argument");

        Ok(Arc::new(SysinfoFileSystem::build(
            self.clone(),
            mount_id,
            flags,
        )))
    }

    fn unmount(self: Arc<Self>, _instance: Arc<dyn FileSystem>) {
        todo!("unmount sysinfo file system")
    }
}

#[derive(Clone, Copy)]
enum MeminfoField {
    Total,
    Used,
}

/// Tagged union of every node kind this provider can hand out. Centralizing
/// dispatch here (one `data_as::<SysinfoNode>()` per operation) means
/// `SysinfoFileSystem`'s `FileOperations`/`DirectoryOperations` impls don't
/// need a different concrete type per path.
enum SysinfoNode {
    /// A directory whose children never change after mount (`/system`,
    /// `meminfo`, `pipes`).
    Dir(BTreeMap<Arc<str>, Arc<FsNode>>),
    /// `threads`: its child map is replaced wholesale every time it is
    /// opened.
    ThreadsDir(RwLock<BTreeMap<Arc<str>, Arc<FsNode>>>),
    /// A snapshot of one thread's accounting, taken when `threads/` was last
    /// opened.
    ThreadFile(ThreadInfo),
    Meminfo(MeminfoField),
    /// `shm`: its children are derived from `shm_registry`, not a stored map.
    ShmDir,
    ShmObject(Arc<shm::SharedMemoryObject>),
}

pub struct SysinfoFileSystem {
    metadata: FileSystemMetadata,
    root: Arc<FsNode>,
    next_node_id: SynCell<FsNodeId>,
    shm_registry: ShmRegistry,
}

impl SysinfoFileSystem {
    fn build(
        file_system_type: Arc<SysinfoFileSystemType>,
        mount_id: MountId,
        flags: MountFlags,
    ) -> Self {
        let build_node = |id: u64, kind: NodeKind, data: SysinfoNode| {
            Arc::new(FsNode {
                id: FsNodeId::new(id),
                mount_id,
                kind,
                dirty: false,
                size: 0,
                accessed_at: 0,
                created_at: 0,
                modified_at: 0,
                private_data: Some(Box::new(data)),
            })
        };

        let totalpages = build_node(2, NodeKind::FILE, SysinfoNode::Meminfo(MeminfoField::Total));
        let usedpages = build_node(3, NodeKind::FILE, SysinfoNode::Meminfo(MeminfoField::Used));

        let mut meminfo_children = BTreeMap::new();
        meminfo_children.insert(Arc::<str>::from("totalpages"), totalpages);
        meminfo_children.insert(Arc::<str>::from("usedpages"), usedpages);
        let meminfo = build_node(1, NodeKind::DIRECTORY, SysinfoNode::Dir(meminfo_children));

        let threads = build_node(
            4,
            NodeKind::DIRECTORY,
            SysinfoNode::ThreadsDir(RwLock::new(BTreeMap::new())),
        );
        let pipes = build_node(5, NodeKind::DIRECTORY, SysinfoNode::Dir(BTreeMap::new()));
        let shm_dir = build_node(6, NodeKind::DIRECTORY, SysinfoNode::ShmDir);

        let mut root_children = BTreeMap::new();
        root_children.insert(Arc::<str>::from("meminfo"), meminfo);
        root_children.insert(Arc::<str>::from("threads"), threads);
        root_children.insert(Arc::<str>::from("pipes"), pipes);
        root_children.insert(Arc::<str>::from("shm"), shm_dir);

        let root = Arc::new(FsNode {
            mount_id,
            id: FsNodeId::ZERO,
            kind: NodeKind::DIRECTORY,
            dirty: false,
            size: 0,
            accessed_at: 0,
            created_at: 0,
            modified_at: 0,
            private_data: Some(Box::new(SysinfoNode::Dir(root_children))),
        });

        Self {
            metadata: FileSystemMetadata {
                device: None,
                mount_flags: flags,
                block_size: 512,
                max_file_size: usize::MAX,
                file_system_type,
            },
            root,
            next_node_id: SynCell::new(FsNodeId::new(7)),
            shm_registry: ShmRegistry::default(),
        }
    }

    fn next_node_id(&self) -> FsNodeId {
        self.next_node_id
            .replace(|id| FsNodeId::new(id.as_u64() + 1))
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

    fn shm_object_node(&self, object: Arc<shm::SharedMemoryObject>) -> Arc<FsNode> {
        Arc::new(FsNode {
            id: self.next_node_id(),
            mount_id: self.root.mount_id,
            kind: NodeKind::CHARACTER_DEVICE,
            dirty: false,
            size: object.size(),
            accessed_at: 0,
            created_at: 0,
            modified_at: 0,
            private_data: Some(Box::new(SysinfoNode::ShmObject(object))),
        })
    }
}

impl FileSystem for SysinfoFileSystem {
    fn metadata(&self) -> &FileSystemMetadata {
        &self.metadata
    }

    fn root_directory(&self) -> Arc<FsNode> {
        self.root.clone()
    }

    impl_fs_ops_for_self!();
}

impl FsNodeOperations for SysinfoFileSystem {
    fn write_node(&self, _node: &FsNode) -> Result<(), ()> {
        Ok(())
    }

    fn evict_node(&self, _node: &FsNode) -> Result<(), ()> {
        Ok(())
    }
}

impl FileOperations for SysinfoFileSystem {
    fn open(&self, node: Arc<FsNode>, mode: FileMode) -> Result<File, IoError> {
        if let SysinfoNode::ThreadsDir(children) = node.data_as::<SysinfoNode>() {
            let mut fresh = BTreeMap::new();

            for info in external::scheduler().threads() {
                let name: Arc<str> = alloc::format!("{}", info.tid).into();
                let child = Arc::new(FsNode {
                    id: self.next_node_id(),
                    mount_id: self.root.mount_id,
                    kind: NodeKind::FILE,
                    dirty: false,
                    size: 0,
                    accessed_at: 0,
                    created_at: 0,
                    modified_at: 0,
                    private_data: Some(Box::new(SysinfoNode::ThreadFile(info))),
                });
                fresh.insert(name, child);
            }

            // Dropping the old map here frees the stale thread nodes; no
            // manual teardown loop needed.
            *children.write() = fresh;
        }

        Ok(File::new(node, mode))
    }

    fn read(&self, file: &File, offset: usize, buffer: &mut [u8]) -> Result<usize, IoError> {
        match file.node.data_as::<SysinfoNode>() {
            SysinfoNode::Meminfo(field) => {
                if buffer.len() < MIN_MEMINFO_BUFFER {
                    return Err(IoError::Io);
                }
                if offset != 0 {
                    return Ok(0);
                }

                let value = match field {
                    MeminfoField::Total => external::vmm().total_page_count(),
                    MeminfoField::Used => external::vmm().used_page_count(),
                };

                let text = alloc::format!("{value}");
                let bytes = text.as_bytes();
                let n = bytes.len().min(buffer.len());
                buffer[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            }
            SysinfoNode::ThreadFile(info) => {
                if buffer.len() < MIN_THREAD_BUFFER {
                    return Err(IoError::Io);
                }
                if offset != 0 {
                    return Ok(0);
                }

                let text = threads::format_thread_info(info);
                let bytes = text.as_bytes();
                let n = bytes.len().min(buffer.len());
                buffer[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            }
            _ => Err(IoError::OperationNotSupported),
        }
    }

    fn ftruncate(&self, file: &File, length: usize) -> Result<(), IoError> {
        match file.node.data_as::<SysinfoNode>() {
            SysinfoNode::ShmObject(object) => object.ftruncate(external::vmm().as_ref(), length),
            _ => Err(IoError::OperationNotSupported),
        }
    }

    fn mmap(&self, file: &File, _size: usize, _offset: usize) -> Result<Option<usize>, IoError> {
        match file.node.data_as::<SysinfoNode>() {
            SysinfoNode::ShmObject(object) => {
                let process = ProcessId(external::scheduler().current_thread().0);
                Ok(object.mmap(external::vmm().as_ref(), process))
            }
            _ => Err(IoError::OperationNotSupported),
        }
    }
}

impl DirectoryOperations for SysinfoFileSystem {
    fn create_file(
        &self,
        directory: Arc<DirectoryEntry>,
        name: &str,
    ) -> Result<Arc<DirectoryEntry>, IoError> {
        match directory.node.data_as::<SysinfoNode>() {
            SysinfoNode::ShmDir => {
                let object = self.shm_registry.create(name.into());
                Ok(self.build_entry(&directory, name, self.shm_object_node(object)))
            }
            _ => Err(IoError::OperationNotSupported),
        }
    }

    fn remove_file(&self, directory: Arc<DirectoryEntry>, name: &str) -> Result<(), IoError> {
        match directory.node.data_as::<SysinfoNode>() {
            SysinfoNode::ShmDir => {
                self.shm_registry.unlink(external::vmm().as_ref(), name);
                Ok(())
            }
            _ => Err(IoError::OperationNotSupported),
        }
    }

    fn lookup(
        &self,
        entry: Arc<DirectoryEntry>,
        name: &str,
    ) -> Result<Option<Arc<DirectoryEntry>>, IoError> {
        match entry.node.data_as::<SysinfoNode>() {
            SysinfoNode::Dir(children) => Ok(children
                .get(name)
                .cloned()
                .map(|node| self.build_entry(&entry, name, node))),
            SysinfoNode::ThreadsDir(children) => Ok(children
                .read()
                .get(name)
                .cloned()
                .map(|node| self.build_entry(&entry, name, node))),
            SysinfoNode::ShmDir => Ok(self
                .shm_registry
                .find(name)
                .map(|object| self.build_entry(&entry, name, self.shm_object_node(object)))),
            _ => Err(IoError::NotADirectory),
        }
    }

    fn read_directory(
        &self,
        entry: Arc<DirectoryEntry>,
    ) -> Result<Vec<Arc<DirectoryEntry>>, IoError> {
        match entry.node.data_as::<SysinfoNode>() {
            SysinfoNode::Dir(children) => Ok(children
                .iter()
                .map(|(name, node)| self.build_entry(&entry, name, node.clone()))
                .collect()),
            SysinfoNode::ThreadsDir(children) => Ok(children
                .read()
                .iter()
                .map(|(name, node)| self.build_entry(&entry, name, node.clone()))
                .collect()),
            SysinfoNode::ShmDir => Ok(self
                .shm_registry
                .list()
                .into_iter()
                .map(|object| {
                    let name = object.name.clone();
                    self.build_entry(&entry, &name, self.shm_object_node(object))
                })
                .collect()),
            _ => Err(IoError::NotADirectory),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::testkit;

    fn mount() -> SysinfoFileSystem {
        testkit::ensure_installed();
        SysinfoFileSystem::build(
            Arc::new(SysinfoFileSystemType),
            MountId::new(),
            MountFlags::READ | MountFlags::WRITE,
        )
    }

    fn root_entry(fs: &SysinfoFileSystem) -> Arc<DirectoryEntry> {
        Arc::new(DirectoryEntry {
            name: "/".into(),
            node: fs.root_directory(),
            parent: None,
        })
    }

    #[test]
    fn meminfo_reports_total_page_count() {
        let fs = mount();
        let meminfo = fs.lookup(root_entry(&fs), "meminfo").unwrap().unwrap();
        let totalpages = fs.lookup(meminfo, "totalpages").unwrap().unwrap();

        let file = fs.open(totalpages.node.clone(), FileMode::Read).unwrap();
        let mut buffer = [0u8; 16];
        let n = fs.read(&file, 0, &mut buffer).unwrap();
        assert_eq!(&buffer[..n], b"1024");

        // Second read at the advanced offset hits EOF.
        let n = fs.read(&file, n, &mut buffer).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn meminfo_rejects_small_buffer() {
        let fs = mount();
        let meminfo = fs.lookup(root_entry(&fs), "meminfo").unwrap().unwrap();
        let totalpages = fs.lookup(meminfo, "totalpages").unwrap().unwrap();
        let file = fs.open(totalpages.node.clone(), FileMode::Read).unwrap();

        let mut buffer = [0u8; 3];
        assert_eq!(fs.read(&file, 0, &mut buffer), Err(IoError::Io));
    }

    #[test]
    fn threads_directory_is_empty_before_any_thread_is_recorded() {
        let fs = mount();
        let threads_entry = fs.lookup(root_entry(&fs), "threads").unwrap().unwrap();

        // `open` rebuilds the child map from `Scheduler::threads()`, which
        // the test collaborator starts out reporting as empty.
        let _ = fs.open(threads_entry.node.clone(), FileMode::Read).unwrap();
        let dir_listing = fs.read_directory(threads_entry).unwrap();
        assert!(dir_listing.is_empty());
    }

    #[test]
    fn shm_object_created_via_create_file_then_found_via_lookup() {
        let fs = mount();
        let shm_entry = fs.lookup(root_entry(&fs), "shm").unwrap().unwrap();

        fs.create_file(shm_entry.clone(), "X").unwrap();
        let found = fs.lookup(shm_entry.clone(), "X").unwrap();
        assert!(found.is_some());

        let listing = fs.read_directory(shm_entry).unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].name.as_ref(), "X");
    }
}
