//! Trait contracts for subsystems this crate depends on but does not own:
//! the physical/virtual memory manager, the scheduler, and the per-thread
//! accounting the sysinfo provider reports on. The real kernel binary wires
//! these to its own globals; `cfg(test)` code wires them to the fakes in
//! [`testkit`].

use alloc::{string::String, sync::Arc};

use conquer_once::spin::OnceCell;

#[cfg(test)]
pub mod testkit;

/// A physical page-frame number, as handed out by the memory manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PhysFrame(pub u64);

/// Identifies a process address space a shared-memory object can be mapped
/// into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProcessId(pub u64);

/// Identifies a schedulable thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadHandle(pub u64);

/// The memory manager's surface area needed by the shared-memory provider:
/// acquiring/releasing physical frames and mapping them into a process.
pub trait Vmm: Send + Sync {
    fn acquire_page_frame_4k(&self) -> Option<PhysFrame>;
    fn release_page_frame_4k(&self, frame: PhysFrame);

    /// Maps `frames` contiguously into `process`'s address space, returning
    /// the base virtual address of the mapping.
    fn map_memory(&self, process: ProcessId, frames: &[PhysFrame], writable: bool) -> usize;

    fn total_page_count(&self) -> u64;
    fn used_page_count(&self) -> u64;
}

/// Why a thread is blocked. Used by the socket provider to park/resume
/// threads instead of the "set state then halt" pattern the provider was
/// originally written against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    Accept,
    Send,
    Recv,
}

/// A read-only snapshot of a thread's accounting, formatted verbatim by the
/// sysinfo provider's `threads/<tid>` files.
#[derive(Debug, Clone)]
pub struct ThreadInfo {
    pub tid: u64,
    pub birth_time: u64,
    pub user_mode: bool,
    pub state: String,
    pub syscalls: u64,
    pub context_switches: u64,
    pub cpu_time_ms: u64,
    pub cpu_usage: u32,
    pub process: String,
}

/// RAII guard returned by [`Scheduler::disable_interrupts`]. Interrupts (or
/// whatever serializes access to scheduler-owned state on the real kernel)
/// are re-enabled when this is dropped.
pub trait InterruptGuard {}

/// The scheduler's surface area needed by the socket provider (thread
/// parking/waking) and the sysinfo provider (thread enumeration).
pub trait Scheduler: Send + Sync {
    fn current_thread(&self) -> ThreadHandle;
    fn threads(&self) -> alloc::vec::Vec<ThreadInfo>;

    /// Parks the given thread until [`Scheduler::resume`] is called for it
    /// with a matching reason, or spuriously — callers must re-check their
    /// condition in a loop.
    fn wait_io(&self, thread: ThreadHandle, reason: WaitReason);

    /// Wakes a thread previously parked with [`Scheduler::wait_io`].
    fn resume(&self, thread: ThreadHandle);

    /// Acquires whatever serializes scheduler-owned state for the duration
    /// of the returned guard.
    fn disable_interrupts(&self) -> Arc<dyn InterruptGuard>;
}

static VMM: OnceCell<Arc<dyn Vmm>> = OnceCell::uninit();
static SCHEDULER: OnceCell<Arc<dyn Scheduler>> = OnceCell::uninit();

/// Called once during boot to inject the real memory manager. The sysinfo
/// and shared-memory providers reach it through [`vmm`] since the VFS
/// dispatch traits don't carry it as a parameter.
pub fn set_vmm(vmm: Arc<dyn Vmm>) {
    VMM.try_init_once(|| vmm).expect("vmm already initialized");
}

pub fn vmm() -> &'static Arc<dyn Vmm> {
    VMM.get().expect("vmm not yet initialized")
}

/// Called once during boot to inject the real scheduler. The sysinfo and
/// socket providers reach it through [`scheduler`].
pub fn set_scheduler(scheduler: Arc<dyn Scheduler>) {
    SCHEDULER
        .try_init_once(|| scheduler)
        .expect("scheduler already initialized");
}

pub fn scheduler() -> &'static Arc<dyn Scheduler> {
    SCHEDULER.get().expect("scheduler not yet initialized")
}
