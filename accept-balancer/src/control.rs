//! Self-pipe used to wake the accept thread for shutdown.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use tracing::warn;

use crate::sys;

/// A non-blocking pipe pair. The read end is polled next to the listening
/// endpoints; a byte written to the write end requests shutdown.
///
/// The byte is never drained, so the read end stays readable once
/// signaled and a late `poll` can't miss it.
#[derive(Debug)]
pub(crate) struct ControlChannel {
    read: OwnedFd,
    write: OwnedFd,
}

impl ControlChannel {
    pub(crate) fn new() -> io::Result<Self> {
        let mut fds: [libc::c_int; 2] = [-1; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
            return Err(io::Error::last_os_error());
        }
        // Safety: pipe(2) just handed us two fresh descriptors.
        let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        for fd in [read.as_raw_fd(), write.as_raw_fd()] {
            sys::set_nonblocking(fd)?;
            sys::set_cloexec(fd)?;
        }
        Ok(Self { read, write })
    }

    /// Descriptor to include in the poll set.
    pub(crate) fn read_fd(&self) -> RawFd {
        self.read.as_raw_fd()
    }

    /// Write one wake-up byte. A full pipe already holds a wake-up, so
    /// `EAGAIN` counts as success.
    pub(crate) fn signal(&self) -> io::Result<()> {
        loop {
            let n = unsafe {
                libc::write(
                    self.write.as_raw_fd(),
                    b"x".as_ptr() as *const libc::c_void,
                    1,
                )
            };
            if n >= 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                io::ErrorKind::WouldBlock => return Ok(()),
                _ => return Err(err),
            }
        }
    }

    /// Block for at most `timeout` waiting for a shutdown request.
    ///
    /// Returns `Ok(true)` if the channel was signaled.
    pub(crate) fn wait(&self, timeout: Duration) -> io::Result<bool> {
        let mut pfd = libc::pollfd {
            fd: self.read_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let millis = timeout.as_millis().clamp(1, libc::c_int::MAX as u128) as libc::c_int;
        let ret = unsafe { libc::poll(&mut pfd, 1, millis) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(ret == 1 && pfd.revents & libc::POLLIN != 0)
    }
}

/// Cloneable handle that requests shutdown without joining the accept
/// thread.
///
/// Useful from signal-handling threads. The balancer's owner still joins
/// the thread via [`AcceptBalancer::shutdown`](crate::AcceptBalancer::shutdown)
/// or by dropping it.
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    pub(crate) control: std::sync::Arc<ControlChannel>,
}

impl ShutdownHandle {
    /// Ask the accept loop to exit at its next wake-up.
    pub fn shutdown(&self) {
        if let Err(e) = self.control.signal() {
            warn!(error = %e, "cannot write to the accept balancer's control pipe");
        }
    }
}
