//! `std`-backed fakes for the [`super::Vmm`] and [`super::Scheduler`]
//! contracts, used only by `cargo test` so provider logic (shared memory
//! lifecycle, socket rendezvous) can be exercised without the real kernel.

use alloc::{sync::Arc, vec::Vec};
use std::{
    collections::BTreeMap,
    sync::{Condvar, Mutex},
};

use super::{InterruptGuard, PhysFrame, ProcessId, Scheduler, ThreadHandle, ThreadInfo, Vmm, WaitReason};

pub struct TestVmm {
    next_frame: Mutex<u64>,
    total_pages: u64,
    used_pages: Mutex<u64>,
}

impl TestVmm {
    pub fn new(total_pages: u64) -> Self {
        Self {
            next_frame: Mutex::new(0),
            total_pages,
            used_pages: Mutex::new(0),
        }
    }
}

impl Vmm for TestVmm {
    fn acquire_page_frame_4k(&self) -> Option<PhysFrame> {
        let mut used = self.used_pages.lock().unwrap();
        if *used >= self.total_pages {
            return None;
        }

        let mut next = self.next_frame.lock().unwrap();
        let frame = PhysFrame(*next);
        *next += 1;
        *used += 1;

        Some(frame)
    }

    fn release_page_frame_4k(&self, _frame: PhysFrame) {
        let mut used = self.used_pages.lock().unwrap();
        *used = used.saturating_sub(1);
    }

    fn map_memory(&self, _process: ProcessId, frames: &[PhysFrame], _writable: bool) -> usize {
        // Tests only care that a mapping was recorded with the right frame
        // count, not about a real virtual address, so we synthesize one
        // from the first frame.
        frames.first().map(|f| f.0 as usize * 0x1000).unwrap_or(0)
    }

    fn total_page_count(&self) -> u64 {
        self.total_pages
    }

    fn used_page_count(&self) -> u64 {
        *self.used_pages.lock().unwrap()
    }
}

/// Stands in for disabling interrupts on a single real CPU: only one thread
/// may hold the section at a time, so the check-then-register sequences in
/// `net::unixsocket` that rely on `disable_interrupts()` for atomicity are
/// actually serialized here, instead of the no-op a real single-core guard
/// would be mistaken for under `std::thread`-backed concurrency.
struct CriticalSection {
    held: Mutex<bool>,
    released: Condvar,
}

impl CriticalSection {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            held: Mutex::new(false),
            released: Condvar::new(),
        })
    }

    fn acquire(self: &Arc<Self>) -> Arc<dyn InterruptGuard> {
        let mut held = self.held.lock().unwrap();
        while *held {
            held = self.released.wait(held).unwrap();
        }
        *held = true;
        Arc::new(CriticalSectionGuard(self.clone()))
    }
}

struct CriticalSectionGuard(Arc<CriticalSection>);
impl InterruptGuard for CriticalSectionGuard {}

impl Drop for CriticalSectionGuard {
    fn drop(&mut self) {
        *self.0.held.lock().unwrap() = false;
        self.0.released.notify_all();
    }
}

/// A single `TestScheduler` is meant to be shared (via `std::sync::Arc`)
/// across every `std::thread` a test spawns, the same way the real kernel
/// has exactly one scheduler shared by every kernel thread. `current_thread`
/// assigns each distinct OS thread a stable [`ThreadHandle`] on first call so
/// tests don't have to hand out handles themselves.
pub struct TestScheduler {
    parked: Mutex<BTreeMap<ThreadHandle, Option<WaitReason>>>,
    woken: Condvar,
    thread_ids: Mutex<BTreeMap<std::thread::ThreadId, u64>>,
    next_thread_id: Mutex<u64>,
    threads: Mutex<Vec<ThreadInfo>>,
    critical_section: Arc<CriticalSection>,
}

impl TestScheduler {
    pub fn new() -> Self {
        Self {
            parked: Mutex::new(BTreeMap::new()),
            woken: Condvar::new(),
            thread_ids: Mutex::new(BTreeMap::new()),
            next_thread_id: Mutex::new(1),
            threads: Mutex::new(Vec::new()),
            critical_section: CriticalSection::new(),
        }
    }

    pub fn set_threads(&self, threads: Vec<ThreadInfo>) {
        *self.threads.lock().unwrap() = threads;
    }
}

impl Default for TestScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs a [`TestVmm`]/[`TestScheduler`] pair as the crate-wide
/// `external::vmm()`/`external::scheduler()` singletons the first time it is
/// called in this test binary; later calls are no-ops so every test that
/// needs a collaborator can call this unconditionally instead of racing to
/// initialize it once.
pub fn ensure_installed() {
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| {
        let _ = env_logger::try_init();
        super::set_vmm(Arc::new(TestVmm::new(1024)));
        super::set_scheduler(Arc::new(TestScheduler::new()));
    });
}

impl Scheduler for TestScheduler {
    fn current_thread(&self) -> ThreadHandle {
        let os_id = std::thread::current().id();

        let mut ids = self.thread_ids.lock().unwrap();
        if let Some(&id) = ids.get(&os_id) {
            return ThreadHandle(id);
        }

        let mut next = self.next_thread_id.lock().unwrap();
        let id = *next;
        *next += 1;
        ids.insert(os_id, id);

        ThreadHandle(id)
    }

    fn threads(&self) -> Vec<ThreadInfo> {
        self.threads.lock().unwrap().clone()
    }

    fn wait_io(&self, thread: ThreadHandle, reason: WaitReason) {
        let mut parked = self.parked.lock().unwrap();
        // A resume() racing ahead of this call already left `None` behind;
        // don't clobber it back to parked, or the wakeup is lost.
        parked.entry(thread).or_insert(Some(reason));

        while parked.get(&thread).copied().flatten().is_some() {
            parked = self.woken.wait(parked).unwrap();
        }
    }

    fn resume(&self, thread: ThreadHandle) {
        let mut parked = self.parked.lock().unwrap();
        parked.insert(thread, None);
        self.woken.notify_all();
    }

    fn disable_interrupts(&self) -> Arc<dyn InterruptGuard> {
        self.critical_section.acquire()
    }
}
