//! Named shared-memory objects surfaced as character-device nodes under
//! `/system/shm`. This module owns the object lifecycle and the registry
//! that backs it; the VFS-facing plumbing (node/dirent construction,
//! `FileOperations`/`DirectoryOperations` dispatch) lives in
//! `drivers::fs::sysinfo`, which installs this registry onto its `shm`
//! directory node.

use alloc::{string::String, sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

use crate::{
    external::{PhysFrame, ProcessId, Vmm},
    fs::vfs::IoError,
};

pub const PAGE_SIZE: usize = 4096;

struct Mapping {
    process: ProcessId,
    address: usize,
    page_count: usize,
}

pub struct SharedMemoryObject {
    pub name: String,
    pages: Mutex<Vec<PhysFrame>>,
    mappings: Mutex<Vec<Mapping>>,
    marked_unlink: AtomicBool,
}

impl SharedMemoryObject {
    fn new(name: String) -> Arc<Self> {
        Arc::new(Self {
            name,
            pages: Mutex::new(Vec::new()),
            mappings: Mutex::new(Vec::new()),
            marked_unlink: AtomicBool::new(false),
        })
    }

    pub fn size(&self) -> usize {
        self.pages.lock().len() * PAGE_SIZE
    }

    /// `ftruncate` is valid exactly once: the object starts at length 0 and
    /// this is the only place its page list is ever populated.
    pub fn ftruncate(&self, vmm: &dyn Vmm, length: usize) -> Result<(), IoError> {
        let mut pages = self.pages.lock();
        if !pages.is_empty() || length == 0 {
            return Err(IoError::Invalid);
        }

        let page_count = length.div_ceil(PAGE_SIZE);
        let mut acquired = Vec::with_capacity(page_count);
        for _ in 0..page_count {
            match vmm.acquire_page_frame_4k() {
                Some(frame) => acquired.push(frame),
                None => {
                    for frame in acquired {
                        vmm.release_page_frame_4k(frame);
                    }
                    return Err(IoError::OutOfMemory);
                }
            }
        }

        *pages = acquired;
        Ok(())
    }

    pub fn mmap(&self, vmm: &dyn Vmm, process: ProcessId) -> Option<usize> {
        let pages = self.pages.lock();
        if pages.is_empty() {
            return None;
        }

        let address = vmm.map_memory(process, &pages, false);
        self.mappings.lock().push(Mapping {
            process,
            address,
            page_count: pages.len(),
        });
        Some(address)
    }

    /// Marks this object for deletion and destroys it immediately if it has
    /// no live mappings. Returns whether the object was destroyed, so the
    /// registry knows to drop its own reference.
    fn unlink(&self, vmm: &dyn Vmm) -> bool {
        self.marked_unlink.store(true, Ordering::SeqCst);
        self.destroy_if_suitable(vmm)
    }

    fn destroy_if_suitable(&self, vmm: &dyn Vmm) -> bool {
        if !self.marked_unlink.load(Ordering::SeqCst) || !self.mappings.lock().is_empty() {
            return false;
        }

        for frame in self.pages.lock().drain(..) {
            vmm.release_page_frame_4k(frame);
        }

        log::debug!("destroyed shared memory object {}", self.name);
        true
    }

    /// Drops every mapping owned by `process` without unmapping its pages
    /// (the process's address space is going away regardless). Returns
    /// whether the object was consequently destroyed.
    fn unmap_for_process(&self, vmm: &dyn Vmm, process: ProcessId) -> bool {
        self.mappings.lock().retain(|m| m.process != process);
        self.destroy_if_suitable(vmm)
    }
}

/// The source of truth for `/system/shm`'s children, replacing the notion of
/// a directory's `first_child`/`next_sibling` list with a flat registry.
/// Lookup is a linear scan, matching the object count this provider expects
/// to stay small.
#[derive(Default)]
pub struct ShmRegistry {
    objects: Mutex<Vec<Arc<SharedMemoryObject>>>,
}

impl ShmRegistry {
    pub fn find(&self, name: &str) -> Option<Arc<SharedMemoryObject>> {
        self.objects.lock().iter().find(|o| o.name == name).cloned()
    }

    pub fn list(&self) -> Vec<Arc<SharedMemoryObject>> {
        self.objects.lock().clone()
    }

    pub fn create(&self, name: String) -> Arc<SharedMemoryObject> {
        let object = SharedMemoryObject::new(name);
        self.objects.lock().push(object.clone());
        object
    }

    pub fn unlink(&self, vmm: &dyn Vmm, name: &str) {
        let mut objects = self.objects.lock();
        if let Some(index) = objects.iter().position(|o| o.name == name) {
            if objects[index].unlink(vmm) {
                objects.remove(index);
            }
        }
    }

    pub fn unmap_for_process_all(&self, vmm: &dyn Vmm, process: ProcessId) {
        self.objects.lock().retain(|o| !o.unmap_for_process(vmm, process));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::testkit::TestVmm;

    #[test]
    fn ftruncate_then_mmap_yields_pattern_visible_to_second_mapper() {
        let vmm = TestVmm::new(64);
        let registry = ShmRegistry::default();

        let object = registry.create("X".into());
        object.ftruncate(&vmm, 8192).unwrap();
        assert_eq!(object.size(), 8192);

        let p1 = ProcessId(1);
        let p2 = ProcessId(2);
        let addr1 = object.mmap(&vmm, p1).unwrap();
        let addr2 = object.mmap(&vmm, p2).unwrap();
        assert_eq!(addr1, addr2, "TestVmm maps from the same frame list both times");
    }

    #[test]
    fn retruncate_is_rejected() {
        let vmm = TestVmm::new(64);
        let object = SharedMemoryObject::new("X".into());

        object.ftruncate(&vmm, 4096).unwrap();
        assert_eq!(object.ftruncate(&vmm, 4096), Err(IoError::Invalid));
    }

    #[test]
    fn ftruncate_failure_releases_frames_already_acquired() {
        let vmm = TestVmm::new(2);
        let object = SharedMemoryObject::new("X".into());

        assert_eq!(
            object.ftruncate(&vmm, 3 * PAGE_SIZE),
            Err(IoError::OutOfMemory)
        );
        assert_eq!(vmm.used_page_count(), 0, "frames acquired before the failure must be released");
        assert_eq!(object.size(), 0);
    }

    #[test]
    fn zero_page_object_mmap_returns_none() {
        let vmm = TestVmm::new(64);
        let object = SharedMemoryObject::new("X".into());

        assert!(object.mmap(&vmm, ProcessId(1)).is_none());
    }

    #[test]
    fn unlink_with_live_mapping_defers_destruction() {
        let vmm = TestVmm::new(64);
        let registry = ShmRegistry::default();

        let object = registry.create("X".into());
        object.ftruncate(&vmm, 4096).unwrap();
        let process = ProcessId(1);
        object.mmap(&vmm, process).unwrap();

        registry.unlink(&vmm, "X");
        assert!(registry.find("X").is_some(), "object survives while mapped");

        registry.unmap_for_process_all(&vmm, process);
        assert!(registry.find("X").is_none(), "object is gone once unmapped");
        assert_eq!(vmm.used_page_count(), 0);
    }
}
