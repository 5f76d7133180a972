//! Exposes Unix-domain sockets as VFS file nodes (`NodeKind::SOCKET`).
//! Creating a file in this directory binds and listens a new socket under
//! that name; `open`ing the resulting node either accepts a pending
//! connection (`FileMode::Read`) or dials out as a client
//! (`FileMode::Write`/`Append`), stashing the connected endpoint in the
//! returned `File`'s private data for `read`/`write` to dispatch against —
//! the listening socket itself never sends or receives data, matching
//! `unixsocket.c`'s split between the bound listener and the per-connection
//! socket objects `accept`/`connect` hand back.

use alloc::{boxed::Box, sync::Arc, vec::Vec};

use crate::{
    external,
    fs::{
        DirectoryOperations, File, FileMode, FileOperations, FileSystem, FileSystemMetadata,
        FileSystemType, FileSystemTypeMetadata, FsNode, FsNodeId, FsNodeOperations, MountFlags,
        NodeKind, impl_fs_ops_for_self,
        vfs::{DirectoryEntry, IoError, MountId},
    },
    net::unixsocket::{SocketRegistry, UnixSocket},
    util::sync_cell::SynCell,
};

pub struct SocketFileSystemType;

impl FileSystemType for SocketFileSystemType {
    fn metadata(&self) -> &FileSystemTypeMetadata {
        &FileSystemTypeMetadata {
            name: "socketfs",
            magic: &[],
        }
    }

    fn mount(
        self: Arc<Self>,
        mount_id: MountId,
        source: &str,
        flags: MountFlags,
    ) -> Result<Arc<dyn FileSystem>, IoError> {
        assert_eq!(source, "", "socketfs does not take a source argument");

        Ok(Arc::new(SocketFileSystem::build(self.clone(), mount_id, flags)))
    }

    fn unmount(self: Arc<Self>, _instance: Arc<dyn FileSystem>) {
        todo!("unmount socket file system")
    }
}

pub struct SocketFileSystem {
    metadata: FileSystemMetadata,
    root: Arc<FsNode>,
    next_node_id: SynCell<FsNodeId>,
    registry: SocketRegistry,
}

impl SocketFileSystem {
    fn build(
        file_system_type: Arc<SocketFileSystemType>,
        mount_id: MountId,
        flags: MountFlags,
    ) -> Self {
        Self {
            metadata: FileSystemMetadata {
                device: None,
                mount_flags: flags,
                block_size: 512,
                max_file_size: 0,
                file_system_type,
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
            registry: SocketRegistry::new(),
        }
    }

    fn next_node_id(&self) -> FsNodeId {
        self.next_node_id
            .replace(|id| FsNodeId::new(id.as_u64() + 1))
    }

    fn socket_entry(
        &self,
        parent: &Arc<DirectoryEntry>,
        name: &str,
        socket: Arc<UnixSocket>,
    ) -> Arc<DirectoryEntry> {
        Arc::new(DirectoryEntry {
            name: name.into(),
            node: Arc::new(FsNode {
                id: self.next_node_id(),
                mount_id: self.root.mount_id,
                kind: NodeKind::SOCKET,
                dirty: false,
                size: 0,
                accessed_at: 0,
                created_at: 0,
                modified_at: 0,
                private_data: Some(Box::new(socket)),
            }),
            parent: Some(parent.clone()),
        })
    }
}

impl FileSystem for SocketFileSystem {
    fn metadata(&self) -> &FileSystemMetadata {
        &self.metadata
    }

    fn root_directory(&self) -> Arc<FsNode> {
        self.root.clone()
    }

    impl_fs_ops_for_self!();
}

impl FsNodeOperations for SocketFileSystem {
    fn write_node(&self, _node: &FsNode) -> Result<(), ()> {
        Ok(())
    }

    fn evict_node(&self, _node: &FsNode) -> Result<(), ()> {
        Ok(())
    }
}

/// The per-open connected endpoint a `File` on this provider carries,
/// distinct from the listening socket named by `file.node`.
fn endpoint(file: &File) -> Result<&Arc<UnixSocket>, IoError> {
    file.private_data
        .as_ref()
        .and_then(|d| d.downcast_ref::<Arc<UnixSocket>>())
        .ok_or(IoError::NotConnected)
}

impl FileOperations for SocketFileSystem {
    fn open(&self, node: Arc<FsNode>, mode: FileMode) -> Result<File, IoError> {
        let listener = node.data_as::<Arc<UnixSocket>>().clone();
        let scheduler = external::scheduler().as_ref();

        let connected = match mode {
            FileMode::Read => listener.accept(scheduler, &self.registry)?,
            FileMode::Write | FileMode::Append => {
                let name = listener.bound_name().ok_or(IoError::NotConnected)?;
                let client = self.registry.create();
                client.connect(scheduler, &self.registry, &name)?;
                client
            }
        };

        Ok(File::new_with_data(node, mode, Box::new(connected)))
    }

    fn flush(&self, file: &File) -> Result<(), IoError> {
        let connected = endpoint(file)?;
        connected.close(external::scheduler().as_ref());
        self.registry.remove(connected);
        Ok(())
    }

    fn read(&self, file: &File, _offset: usize, buffer: &mut [u8]) -> Result<usize, IoError> {
        endpoint(file)?.recv(external::scheduler().as_ref(), buffer)
    }

    fn write(&self, file: &File, _offset: usize, buffer: &[u8]) -> Result<usize, IoError> {
        endpoint(file)?.send(external::scheduler().as_ref(), buffer)
    }

    fn read_test_ready(&self, file: &File) -> bool {
        match endpoint(file) {
            Ok(connected) => connected.read_test_ready(),
            Err(_) => true,
        }
    }
}

impl DirectoryOperations for SocketFileSystem {
    fn create_file(
        &self,
        directory: Arc<DirectoryEntry>,
        name: &str,
    ) -> Result<Arc<DirectoryEntry>, IoError> {
        let socket = self.registry.create();
        socket.bind(&self.registry, name)?;
        socket.listen(16);
        Ok(self.socket_entry(&directory, name, socket))
    }

    fn lookup(
        &self,
        entry: Arc<DirectoryEntry>,
        name: &str,
    ) -> Result<Option<Arc<DirectoryEntry>>, IoError> {
        Ok(self
            .registry
            .find_listening(name)
            .map(|s| self.socket_entry(&entry, name, s)))
    }

    fn read_directory(
        &self,
        entry: Arc<DirectoryEntry>,
    ) -> Result<Vec<Arc<DirectoryEntry>>, IoError> {
        Ok(self
            .registry
            .list_listening()
            .into_iter()
            .map(|(name, s)| self.socket_entry(&entry, &name, s))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc as StdArc, thread};

    use super::*;
    use crate::external::testkit;

    fn mount() -> StdArc<SocketFileSystem> {
        testkit::ensure_installed();
        StdArc::new(SocketFileSystem::build(
            Arc::new(SocketFileSystemType),
            MountId::new(),
            MountFlags::READ | MountFlags::WRITE,
        ))
    }

    fn root_entry(fs: &SocketFileSystem) -> Arc<DirectoryEntry> {
        Arc::new(DirectoryEntry {
            name: "/".into(),
            node: fs.root_directory(),
            parent: None,
        })
    }

    #[test]
    fn bound_socket_appears_as_node_in_the_directory() {
        let fs = mount();
        let entry = fs.create_file(root_entry(&fs), "echo").unwrap();
        assert!(entry.node.kind.contains(NodeKind::SOCKET));

        let listing = fs.read_directory(root_entry(&fs)).unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].name.as_ref(), "echo");

        let found = fs.lookup(root_entry(&fs), "echo").unwrap();
        assert!(found.is_some());
    }

    #[test]
    fn open_for_read_accepts_and_open_for_write_connects_then_echoes() {
        let fs = mount();
        let listener_entry = fs.create_file(root_entry(&fs), "echo").unwrap();

        let fs_for_accept = fs.clone();
        let node_for_accept = listener_entry.node.clone();
        let accept_thread = thread::spawn(move || {
            let server_file = fs_for_accept.open(node_for_accept, FileMode::Read).unwrap();

            let mut buf = [0u8; 5];
            let n = fs_for_accept.read(&server_file, 0, &mut buf).unwrap();
            assert_eq!(&buf[..n], b"hello");

            fs_for_accept.flush(&server_file).unwrap();
        });

        let client_file = fs
            .open(listener_entry.node.clone(), FileMode::Write)
            .unwrap();
        let n = fs.write(&client_file, 0, b"hello").unwrap();
        assert_eq!(n, 5);

        accept_thread.join().unwrap();
        fs.flush(&client_file).unwrap();
    }
}
