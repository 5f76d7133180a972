//! Assembles the `"<volume>:/a/b/c"`-style path `fatfs` needs from a
//! `DirectoryEntry`'s parent chain, stopping at the volume's mount root
//! rather than walking into whatever directory the volume happens to be
//! mounted under. The assembled path lives in a bounded
//! `heapless::String<128>` so a pathologically deep tree surfaces
//! `IoError::NameTooLong` instead of silently truncating.

use alloc::sync::Arc;

use crate::fs::vfs::{DirectoryEntry, IoError};

pub const MAX_PATH_LEN: usize = 128;

pub fn assemble(
    volume_index: usize,
    entry: &Arc<DirectoryEntry>,
) -> Result<heapless::String<MAX_PATH_LEN>, IoError> {
    let mount_id = entry.node.mount_id;

    // Walk from `entry` up to (but not including) the node whose parent
    // belongs to a different mount -- that parent is outside this FAT
    // volume, so `entry`'s mount root is the last node we collect.
    let mut names = alloc::vec::Vec::new();
    let mut cur = entry.clone();
    loop {
        let Some(parent) = cur.parent.clone() else {
            break;
        };

        if parent.node.mount_id != mount_id {
            break;
        }

        names.push(cur.name.clone());
        cur = parent;
    }
    names.reverse();

    let mut path = heapless::String::<MAX_PATH_LEN>::new();
    write_volume_prefix(&mut path, volume_index)?;

    for name in names {
        path.push('/').map_err(|_| IoError::NameTooLong)?;
        path.push_str(&name).map_err(|_| IoError::NameTooLong)?;
    }

    Ok(path)
}

fn write_volume_prefix(
    path: &mut heapless::String<MAX_PATH_LEN>,
    volume_index: usize,
) -> Result<(), IoError> {
    use core::fmt::Write;

    write!(path, "{volume_index}:").map_err(|_| IoError::NameTooLong)
}

/// Joins a directory's already-assembled, prefix-stripped path with a child
/// name, the way [`assemble`] would if called on that child directly.
pub fn join(parent_rel_path: &str, name: &str) -> Result<heapless::String<MAX_PATH_LEN>, IoError> {
    let mut out = heapless::String::<MAX_PATH_LEN>::new();

    if parent_rel_path != "/" {
        out.push_str(parent_rel_path).map_err(|_| IoError::NameTooLong)?;
    }
    out.push('/').map_err(|_| IoError::NameTooLong)?;
    out.push_str(name).map_err(|_| IoError::NameTooLong)?;

    Ok(out)
}

/// Strips the `"<volume>:"` prefix `assemble` adds, returning the path
/// `fatfs`'s own `open_dir`/`open_file` expect (it has no notion of a
/// volume letter itself -- the volume table already selected the
/// `fatfs::FileSystem` instance).
pub fn without_volume_prefix(path: &str) -> &str {
    match path.split_once(':') {
        Some((_, rest)) if rest.is_empty() => "/",
        Some((_, rest)) => rest,
        None => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{FsNode, FsNodeId, MountFlags, NodeKind, vfs::MountId};

    fn node(mount_id: MountId, id: u64, kind: NodeKind) -> Arc<FsNode> {
        let _ = MountFlags::READ;
        Arc::new(FsNode {
            id: FsNodeId::new(id),
            mount_id,
            kind,
            dirty: false,
            size: 0,
            accessed_at: 0,
            created_at: 0,
            modified_at: 0,
            private_data: None,
        })
    }

    fn chain(mount_id: MountId, names: &[&str]) -> Arc<DirectoryEntry> {
        let outside = Arc::new(DirectoryEntry {
            name: "mnt".into(),
            node: node(MountId::NULL, 0, NodeKind::DIRECTORY),
            parent: None,
        });

        let mut entry = Arc::new(DirectoryEntry {
            name: "/".into(),
            node: node(mount_id, 1, NodeKind::DIRECTORY | NodeKind::MOUNT_POINT),
            parent: Some(outside),
        });

        for (i, name) in names.iter().enumerate() {
            entry = Arc::new(DirectoryEntry {
                name: (*name).into(),
                node: node(mount_id, 2 + i as u64, NodeKind::DIRECTORY),
                parent: Some(entry),
            });
        }

        entry
    }

    #[test]
    fn assembles_nested_path_with_volume_prefix() {
        let mount_id = MountId::new();
        let entry = chain(mount_id, &["a", "b", "c.txt"]);

        let path = assemble(0, &entry).unwrap();
        assert!(path.starts_with("0:/a/b/c.txt"));
        assert_eq!(without_volume_prefix(&path), "/a/b/c.txt");
    }

    #[test]
    fn root_has_no_trailing_segments() {
        let mount_id = MountId::new();
        let entry = chain(mount_id, &[]);

        let path = assemble(2, &entry).unwrap();
        assert_eq!(path.as_str(), "2:");
        assert_eq!(without_volume_prefix(&path), "/");
    }

    #[test]
    fn overflow_surfaces_name_too_long() {
        let mount_id = MountId::new();
        // "0:" (2) + "/" (1) + a 126-byte name = 129 bytes, one over the
        // 128-byte buffer.
        let long_name = "a".repeat(126);
        let entry = chain(mount_id, &[&long_name]);

        assert_eq!(assemble(0, &entry), Err(IoError::NameTooLong));
    }

    #[test]
    fn largest_name_that_fits_succeeds() {
        let mount_id = MountId::new();
        // "0:" (2) + "/" (1) + a 125-byte name = 128 bytes, exactly full.
        let name = "a".repeat(125);
        let entry = chain(mount_id, &[&name]);

        assert!(assemble(0, &entry).is_ok());
    }
}
