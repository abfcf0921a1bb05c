//! Thin wrappers over the accept-path syscalls.
//!
//! The burst acceptor talks to the kernel through [`Syscalls`] so the
//! `accept4` capability fallback can be driven without a kernel that
//! actually lacks it.

use std::io;
use std::os::fd::RawFd;

/// The accept-path primitives used by the burst acceptor.
pub(crate) trait Syscalls {
    /// Accept one connection with `O_NONBLOCK` and `FD_CLOEXEC` set atomically.
    fn accept4_nonblock(&self, listener: RawFd) -> io::Result<RawFd>;
    /// Plain `accept(2)`. Flags must be set separately.
    fn accept(&self, listener: RawFd) -> io::Result<RawFd>;
    /// Put an accepted connection into non-blocking, close-on-exec mode.
    fn prepare_accepted(&self, fd: RawFd) -> io::Result<()>;
    /// Close a descriptor the balancer still owns.
    fn close(&self, fd: RawFd);
}

/// The real kernel.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Libc;

impl Syscalls for Libc {
    #[cfg(any(
        target_os = "linux",
        target_os = "android",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "dragonfly",
    ))]
    fn accept4_nonblock(&self, listener: RawFd) -> io::Result<RawFd> {
        let fd = unsafe {
            libc::accept4(
                listener,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(fd)
    }

    #[cfg(not(any(
        target_os = "linux",
        target_os = "android",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "dragonfly",
    )))]
    fn accept4_nonblock(&self, _listener: RawFd) -> io::Result<RawFd> {
        Err(io::Error::from_raw_os_error(libc::ENOSYS))
    }

    fn accept(&self, listener: RawFd) -> io::Result<RawFd> {
        let fd = unsafe { libc::accept(listener, std::ptr::null_mut(), std::ptr::null_mut()) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(fd)
    }

    fn prepare_accepted(&self, fd: RawFd) -> io::Result<()> {
        set_nonblocking(fd)?;
        set_cloexec(fd)
    }

    fn close(&self, fd: RawFd) {
        unsafe {
            libc::close(fd);
        }
    }
}

/// Set `O_NONBLOCK` on `fd`, preserving its other status flags.
pub(crate) fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if flags & libc::O_NONBLOCK != 0 {
        return Ok(());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Set `FD_CLOEXEC` on `fd`.
pub(crate) fn set_cloexec(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Whether `err` means "nothing pending right now".
pub(crate) fn is_would_block(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
}

/// Whether `err` says the fast accept primitive is unavailable.
///
/// FreeBSD reports `EINVAL` for flags it does not understand.
pub(crate) fn is_unsupported(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::ENOSYS) | Some(libc::EINVAL))
}
