//! Minimal concrete collaborators satisfying `fenwick_kernel`'s
//! [`external::Vmm`]/[`external::Scheduler`] contracts for this binary.
//! Physical memory management and preemptive scheduling are out of scope
//! here (see `fenwick_kernel::external`'s module docs); these just give the
//! sysinfo, shared-memory, and socket providers something to call into so
//! they work at boot instead of panicking on an uninitialized collaborator.

use alloc::{sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicU64, Ordering};

use fenwick_kernel::external::{
    InterruptGuard, PhysFrame, ProcessId, Scheduler, ThreadHandle, ThreadInfo, Vmm, WaitReason,
};
use spin::Mutex;

/// Hands out sequential frame numbers from a fixed-size count, with no
/// backing physical memory of its own to track or reclaim in any real sense.
pub struct StaticPoolVmm {
    total_frames: u64,
    used_frames: AtomicU64,
    next_frame: AtomicU64,
}

impl StaticPoolVmm {
    pub fn new(total_frames: u64) -> Self {
        Self {
            total_frames,
            used_frames: AtomicU64::new(0),
            next_frame: AtomicU64::new(0),
        }
    }
}

impl Vmm for StaticPoolVmm {
    fn acquire_page_frame_4k(&self) -> Option<PhysFrame> {
        let used = self.used_frames.fetch_add(1, Ordering::SeqCst);
        if used >= self.total_frames {
            self.used_frames.fetch_sub(1, Ordering::SeqCst);
            return None;
        }

        let frame = self.next_frame.fetch_add(1, Ordering::SeqCst);
        Some(PhysFrame(frame))
    }

    fn release_page_frame_4k(&self, _frame: PhysFrame) {
        self.used_frames.fetch_sub(1, Ordering::SeqCst);
    }

    fn map_memory(&self, _process: ProcessId, frames: &[PhysFrame], _writable: bool) -> usize {
        frames.first().map(|f| f.0 as usize * 0x1000).unwrap_or(0)
    }

    fn total_page_count(&self) -> u64 {
        self.total_frames
    }

    fn used_page_count(&self) -> u64 {
        self.used_frames.load(Ordering::SeqCst)
    }
}

struct NoopGuard;
impl InterruptGuard for NoopGuard {}

/// Reports only the boot thread; `wait_io` returns immediately rather than
/// actually parking, since there is no timer interrupt or second thread here
/// to ever call [`Scheduler::resume`].
#[derive(Default)]
pub struct BootThreadScheduler {
    threads: Mutex<Vec<ThreadInfo>>,
}

impl Scheduler for BootThreadScheduler {
    fn current_thread(&self) -> ThreadHandle {
        ThreadHandle(0)
    }

    fn threads(&self) -> Vec<ThreadInfo> {
        self.threads.lock().clone()
    }

    fn wait_io(&self, _thread: ThreadHandle, _reason: WaitReason) {}

    fn resume(&self, _thread: ThreadHandle) {}

    fn disable_interrupts(&self) -> Arc<dyn InterruptGuard> {
        Arc::new(NoopGuard)
    }
}
