//! Unix-domain sockets: bind/listen/accept/connect/send/recv for local,
//! path-named sockets. Blocking is expressed through the
//! [`crate::external::Scheduler`] collaborator's wait/resume pair rather
//! than disabling interrupts and halting.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use spin::Mutex;

use crate::{
    external::{Scheduler, ThreadHandle, WaitReason},
    fs::vfs::IoError,
    util::list::Fifo,
};

/// Capacity of a socket's inbound byte buffer. Sends block once the peer's
/// buffer is this full.
const BUFFER_CAPACITY: usize = 4096;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SocketOpts: u32 {
        const SO_ACCEPTCONN = 1 << 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SocketId(u64);

impl SocketId {
    fn new() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

pub struct UnixSocket {
    pub id: SocketId,
    name: Mutex<Option<heapless::String<108>>>,
    opts: Mutex<SocketOpts>,
    accept_queue: Mutex<Fifo<Arc<UnixSocket>>>,
    connection: Mutex<Option<Arc<UnixSocket>>>,
    buffer_in: Mutex<Fifo<u8>>,
    disconnected: AtomicBool,
    /// The thread currently parked on an operation involving this socket
    /// (accept/connect/send/recv), if any.
    waiting_thread: Mutex<Option<ThreadHandle>>,
}

impl UnixSocket {
    fn new() -> Self {
        Self {
            id: SocketId::new(),
            name: Mutex::new(None),
            opts: Mutex::new(SocketOpts::empty()),
            accept_queue: Mutex::new(Fifo::new()),
            connection: Mutex::new(None),
            buffer_in: Mutex::new(Fifo::new()),
            disconnected: AtomicBool::new(false),
            waiting_thread: Mutex::new(None),
        }
    }

    /// Binds this socket to a path-like name. The name is not resolved
    /// against the VFS; it is simply a unique key other sockets `connect`
    /// against.
    pub fn bind(&self, registry: &SocketRegistry, addr: &str) -> Result<(), IoError> {
        if self.name.lock().is_some() {
            return Err(IoError::AlreadyBound);
        }

        if addr.is_empty() {
            return Err(IoError::Invalid);
        }

        let mut bounded = heapless::String::<108>::new();
        bounded.push_str(addr).map_err(|_| IoError::NameTooLong)?;

        if registry.is_bound(addr) {
            return Err(IoError::AddressInUse);
        }

        *self.name.lock() = Some(bounded);

        Ok(())
    }

    /// Marks this socket as able to accept incoming connections. `backlog`
    /// is accepted but not enforced: the accept queue is unbounded, which
    /// matches the original provider's behavior.
    pub fn listen(&self, backlog: usize) {
        let _ = backlog;
        *self.opts.lock() |= SocketOpts::SO_ACCEPTCONN;
    }

    pub fn accept(
        self: &Arc<Self>,
        scheduler: &dyn Scheduler,
        registry: &SocketRegistry,
    ) -> Result<Arc<UnixSocket>, IoError> {
        if !self.opts.lock().contains(SocketOpts::SO_ACCEPTCONN) {
            return Err(IoError::Invalid);
        }

        loop {
            let guard = scheduler.disable_interrupts();

            if let Some(peer) = self.accept_queue.lock().pop() {
                drop(guard);

                let child = registry.create();
                *child.connection.lock() = Some(peer.clone());
                *peer.connection.lock() = Some(child.clone());

                if let Some(t) = peer.waiting_thread.lock().take() {
                    scheduler.resume(t);
                }

                return Ok(child);
            }

            let me = scheduler.current_thread();
            *self.waiting_thread.lock() = Some(me);
            drop(guard);
            scheduler.wait_io(me, WaitReason::Accept);
        }
    }

    pub fn connect(
        self: &Arc<Self>,
        scheduler: &dyn Scheduler,
        registry: &SocketRegistry,
        addr: &str,
    ) -> Result<(), IoError> {
        if self.connection.lock().is_some() {
            return Err(IoError::AlreadyConnected);
        }

        if addr.is_empty() {
            return Err(IoError::Invalid);
        }

        let listener = registry.find_listening(addr).ok_or(IoError::NotConnected)?;

        {
            let guard = scheduler.disable_interrupts();
            listener.accept_queue.lock().push(self.clone());
            if let Some(t) = listener.waiting_thread.lock().take() {
                scheduler.resume(t);
            }
            drop(guard);
        }

        loop {
            let guard = scheduler.disable_interrupts();

            if self.connection.lock().is_some() {
                return Ok(());
            }

            let me = scheduler.current_thread();
            *self.waiting_thread.lock() = Some(me);
            drop(guard);
            scheduler.wait_io(me, WaitReason::Accept);
        }
    }

    /// Writes as much of `buf` as fits in the peer's inbound buffer,
    /// blocking and retrying if none fits. Returns the number of bytes
    /// actually written, which may be less than `buf.len()` — callers loop.
    pub fn send(&self, scheduler: &dyn Scheduler, buf: &[u8]) -> Result<usize, IoError> {
        let peer = self.connection.lock().clone().ok_or(IoError::NotConnected)?;

        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            let guard = scheduler.disable_interrupts();

            if peer.disconnected.load(Ordering::Acquire) {
                return Err(IoError::NotConnected);
            }

            let mut written = 0;
            {
                let mut fifo = peer.buffer_in.lock();
                while written < buf.len() && fifo.len() < BUFFER_CAPACITY {
                    fifo.push(buf[written]);
                    written += 1;
                }
            }

            if written > 0 {
                drop(guard);

                if let Some(t) = peer.waiting_thread.lock().take() {
                    scheduler.resume(t);
                }
                return Ok(written);
            }

            let me = scheduler.current_thread();
            *self.waiting_thread.lock() = Some(me);
            drop(guard);
            scheduler.wait_io(me, WaitReason::Send);
        }
    }

    /// Reads up to `buf.len()` bytes, blocking and retrying while the
    /// buffer is empty and the peer hasn't disconnected. Returns `Ok(0)`
    /// once disconnected and drained, matching EOF semantics.
    pub fn recv(&self, scheduler: &dyn Scheduler, buf: &mut [u8]) -> Result<usize, IoError> {
        loop {
            let guard = scheduler.disable_interrupts();

            let mut read = 0;
            {
                let mut fifo = self.buffer_in.lock();
                while read < buf.len() {
                    match fifo.pop() {
                        Some(b) => {
                            buf[read] = b;
                            read += 1;
                        }
                        None => break,
                    }
                }
            }

            if read > 0 {
                drop(guard);

                if let Some(peer) = self.connection.lock().clone() {
                    if let Some(t) = peer.waiting_thread.lock().take() {
                        scheduler.resume(t);
                    }
                }
                return Ok(read);
            }

            if self.disconnected.load(Ordering::Acquire) {
                return Ok(0);
            }

            let me = scheduler.current_thread();
            *self.waiting_thread.lock() = Some(me);
            drop(guard);
            scheduler.wait_io(me, WaitReason::Recv);
        }
    }

    pub fn close(&self, scheduler: &dyn Scheduler) {
        let guard = scheduler.disable_interrupts();

        self.disconnected.store(true, Ordering::Release);

        if let Some(peer) = self.connection.lock().take() {
            peer.disconnected.store(true, Ordering::Release);
            *peer.connection.lock() = None;

            let waiter = peer.waiting_thread.lock().take();
            drop(guard);

            if let Some(t) = waiter {
                scheduler.resume(t);
            }
        }
    }

    /// The name this socket is bound to, if any.
    pub fn bound_name(&self) -> Option<heapless::String<108>> {
        self.name.lock().clone()
    }

    /// Whether a read on this socket (as a listening, connected, or
    /// half-closed socket) would currently return without blocking.
    pub fn read_test_ready(&self) -> bool {
        !self.accept_queue.lock().is_empty()
            || !self.buffer_in.lock().is_empty()
            || self.disconnected.load(Ordering::Acquire)
    }
}

/// Process-wide table of live sockets, replacing the original provider's
/// global socket list.
#[derive(Default)]
pub struct SocketRegistry {
    sockets: Mutex<alloc::vec::Vec<Arc<UnixSocket>>>,
}

impl SocketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self) -> Arc<UnixSocket> {
        let socket = Arc::new(UnixSocket::new());
        self.sockets.lock().push(socket.clone());
        socket
    }

    pub fn remove(&self, socket: &Arc<UnixSocket>) {
        self.sockets.lock().retain(|s| !Arc::ptr_eq(s, socket));
    }

    fn is_bound(&self, addr: &str) -> bool {
        self.sockets
            .lock()
            .iter()
            .any(|s| s.name.lock().as_deref() == Some(addr))
    }

    pub(crate) fn find_listening(&self, addr: &str) -> Option<Arc<UnixSocket>> {
        self.sockets
            .lock()
            .iter()
            .find(|s| {
                s.opts.lock().contains(SocketOpts::SO_ACCEPTCONN) && s.name.lock().as_deref() == Some(addr)
            })
            .cloned()
    }

    /// All sockets currently listening, alongside the name each is bound to.
    /// Backs the socket provider's directory listing.
    pub(crate) fn list_listening(&self) -> alloc::vec::Vec<(heapless::String<108>, Arc<UnixSocket>)> {
        self.sockets
            .lock()
            .iter()
            .filter(|s| s.opts.lock().contains(SocketOpts::SO_ACCEPTCONN))
            .filter_map(|s| s.bound_name().map(|name| (name, s.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc as StdArc, thread};

    use super::*;
    use crate::external::testkit::TestScheduler;

    #[test]
    fn bind_rejects_duplicate_and_empty_names() {
        let registry = SocketRegistry::new();
        let a = registry.create();
        let b = registry.create();

        a.bind(&registry, "/tmp/srv").unwrap();
        assert_eq!(b.bind(&registry, "/tmp/srv"), Err(IoError::AddressInUse));
        assert_eq!(a.bind(&registry, "/tmp/other"), Err(IoError::AlreadyBound));
        assert_eq!(b.bind(&registry, ""), Err(IoError::Invalid));
    }

    #[test]
    fn connect_blocks_until_accept_then_echoes_in_order() {
        // One scheduler shared by both threads, matching the real kernel's
        // single scheduler shared across all kernel threads.
        let scheduler = StdArc::new(TestScheduler::new());
        let registry = StdArc::new(SocketRegistry::new());

        let server = registry.create();
        server.bind(&registry, "/tmp/echo").unwrap();
        server.listen(1);

        let server_for_thread = server.clone();
        let scheduler_for_thread = scheduler.clone();
        let registry_for_thread = registry.clone();

        let accept_thread = thread::spawn(move || {
            let conn = server_for_thread
                .accept(scheduler_for_thread.as_ref(), &registry_for_thread)
                .unwrap();

            let mut buf = [0u8; 5];
            let n = conn.recv(scheduler_for_thread.as_ref(), &mut buf).unwrap();
            assert_eq!(&buf[..n], b"hello");

            conn.close(scheduler_for_thread.as_ref());
        });

        let client = registry.create();
        client
            .connect(scheduler.as_ref(), &registry, "/tmp/echo")
            .unwrap();

        let n = client.send(scheduler.as_ref(), b"hello").unwrap();
        assert_eq!(n, 5);

        accept_thread.join().unwrap();

        let mut buf = [0u8; 5];
        let n = client.recv(scheduler.as_ref(), &mut buf).unwrap();
        assert_eq!(n, 0, "peer closed, recv should report EOF");
    }

    #[test]
    fn read_test_ready_reflects_pending_connections_and_data() {
        let registry = SocketRegistry::new();
        let server = registry.create();
        server.bind(&registry, "/tmp/poll").unwrap();
        server.listen(1);

        assert!(!server.read_test_ready());

        let client = registry.create();
        server.accept_queue.lock().push(client.clone());
        assert!(server.read_test_ready());
    }
}
