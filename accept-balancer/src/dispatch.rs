use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, warn};

use crate::error::Error;
use crate::metrics;
use crate::sys::{self, Syscalls};

/// A worker that takes ownership of accepted connections.
///
/// `enqueue` is called from the accept thread while the worker runs on
/// its own thread. It must only schedule the handoff: never block waiting
/// for the worker to make progress.
pub trait Worker: Send + Sync {
    /// Hand `fd` to this worker. The worker now owns it and must process
    /// it exactly once on its own execution context.
    ///
    /// Returns `Err(fd)`, giving ownership back, if the worker has shut
    /// down. The balancer then stops routing to it.
    fn enqueue(&self, fd: RawFd) -> Result<(), RawFd>;
}

/// Worker handle backed by an unbounded crossbeam channel, optionally
/// paired with an eventfd (or pipe) that wakes the worker's event loop
/// after every enqueue.
#[derive(Debug)]
pub struct ChannelWorker {
    tx: Sender<RawFd>,
    waker: Option<RawFd>,
}

impl ChannelWorker {
    /// Create a worker handle and the receiver the worker thread drains.
    pub fn channel() -> (Self, Receiver<RawFd>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { tx, waker: None }, rx)
    }

    /// Write an 8-byte `1` to `fd` after each enqueue. `fd` stays owned
    /// by the caller and must outlive this handle.
    ///
    /// `fd` is switched to non-blocking mode so a worker that stops
    /// draining it can't stall the accept thread.
    pub fn with_waker(mut self, fd: RawFd) -> io::Result<Self> {
        sys::set_nonblocking(fd)?;
        self.waker = Some(fd);
        Ok(self)
    }

    fn wake(&self, efd: RawFd) {
        let val: u64 = 1;
        loop {
            let n = unsafe { libc::write(efd, &val as *const u64 as *const libc::c_void, 8) };
            if n >= 0 {
                return;
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                // Saturated eventfd or full pipe: the worker is already awake.
                io::ErrorKind::WouldBlock => return,
                _ => {
                    debug!(waker = efd, error = %err, "cannot wake worker");
                    return;
                }
            }
        }
    }
}

impl Worker for ChannelWorker {
    fn enqueue(&self, fd: RawFd) -> Result<(), RawFd> {
        self.tx.send(fd).map_err(|e| e.into_inner())?;
        if let Some(efd) = self.waker {
            self.wake(efd);
        }
        Ok(())
    }
}

/// Round-robin placement over a fixed worker set.
///
/// The cursor persists across batches and endpoints, so consecutive
/// connections land on consecutive workers no matter where they came from.
pub(crate) struct Distributor {
    workers: Vec<Arc<dyn Worker>>,
    alive: Vec<bool>,
    alive_count: usize,
    cursor: usize,
}

impl Distributor {
    pub(crate) fn new(workers: Vec<Arc<dyn Worker>>) -> Self {
        assert!(!workers.is_empty(), "distributor needs at least one worker");
        let n = workers.len();
        metrics::WORKERS_LIVE.add(n as i64);
        Self {
            workers,
            alive: vec![true; n],
            alive_count: n,
            cursor: 0,
        }
    }

    #[cfg(test)]
    pub(crate) fn cursor(&self) -> usize {
        self.cursor
    }

    pub(crate) fn live_workers(&self) -> usize {
        self.alive_count
    }

    /// Hand every fd in `batch` to the next worker in rotation, in order,
    /// and clear `batch`.
    ///
    /// If every worker has gone away, the undeliverable fds are closed and
    /// `Error::NoWorkers` is returned.
    pub(crate) fn distribute<S: Syscalls>(
        &mut self,
        batch: &mut Vec<RawFd>,
        sys: &S,
    ) -> Result<(), Error> {
        let mut pending = batch.drain(..);
        while let Some(fd) = pending.next() {
            if let Err(fd) = self.dispatch_one(fd) {
                for orphan in std::iter::once(fd).chain(pending.by_ref()) {
                    sys.close(orphan);
                    metrics::CONNECTIONS_DROPPED.increment();
                }
                return Err(Error::NoWorkers);
            }
        }
        Ok(())
    }

    fn dispatch_one(&mut self, mut fd: RawFd) -> Result<(), RawFd> {
        while self.alive_count > 0 {
            let idx = self.cursor;
            self.cursor = (self.cursor + 1) % self.workers.len();
            if !self.alive[idx] {
                continue;
            }
            match self.workers[idx].enqueue(fd) {
                Ok(()) => {
                    metrics::CONNECTIONS_DISPATCHED.increment();
                    return Ok(());
                }
                Err(returned) => {
                    fd = returned;
                    self.alive[idx] = false;
                    self.alive_count -= 1;
                    metrics::WORKERS_LIVE.decrement();
                    warn!(worker = idx, "worker stopped taking connections, removed from rotation");
                }
            }
        }
        Err(fd)
    }
}

impl Drop for Distributor {
    fn drop(&mut self) {
        metrics::WORKERS_LIVE.sub(self.alive_count as i64);
    }
}
