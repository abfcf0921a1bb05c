use std::io;
use std::os::fd::RawFd;

use crate::endpoint::MAX_ENDPOINTS;

/// Which sources were readable after a [`Poller::wait`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Readiness {
    pub(crate) control: bool,
    endpoints: [bool; MAX_ENDPOINTS],
}

impl Readiness {
    pub(crate) fn endpoint(&self, index: usize) -> bool {
        self.endpoints.get(index).copied().unwrap_or(false)
    }
}

/// One blocking `poll(2)` over the control channel and every endpoint.
///
/// Slot 0 is always the control channel; endpoint `i` lives in slot `i + 1`.
pub(crate) struct Poller {
    fds: Vec<libc::pollfd>,
}

impl Poller {
    pub(crate) fn new(control: RawFd, endpoints: &[RawFd]) -> Self {
        debug_assert!(endpoints.len() <= MAX_ENDPOINTS);
        let fds = std::iter::once(control)
            .chain(endpoints.iter().copied())
            .map(|fd| libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            })
            .collect();
        Self { fds }
    }

    /// Block until the control channel or an endpoint is readable.
    ///
    /// `EINTR` is retried. Any other failure is returned and is fatal to
    /// the accept loop.
    pub(crate) fn wait(&mut self) -> io::Result<Readiness> {
        loop {
            for pfd in &mut self.fds {
                pfd.revents = 0;
            }
            let ret = unsafe {
                libc::poll(
                    self.fds.as_mut_ptr(),
                    self.fds.len() as libc::nfds_t,
                    -1,
                )
            };
            if ret >= 0 {
                break;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }

        let mut ready = Readiness {
            control: self.fds[0].revents & libc::POLLIN != 0,
            ..Readiness::default()
        };
        // POLLERR/POLLHUP on a listener: let accept() report it.
        let mask = libc::POLLIN | libc::POLLERR | libc::POLLHUP;
        for (slot, pfd) in self.fds[1..].iter().enumerate() {
            ready.endpoints[slot] = pfd.revents & mask != 0;
        }
        // An invalid fd is a broken poll set, not a readable endpoint.
        if let Some(pfd) = self.fds.iter().find(|p| p.revents & libc::POLLNVAL != 0) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("fd {} is not open", pfd.fd),
            ));
        }
        Ok(ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ControlChannel;

    fn pipe() -> (RawFd, RawFd) {
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        (fds[0], fds[1])
    }

    fn write_byte(fd: RawFd) {
        assert_eq!(
            unsafe { libc::write(fd, b"x".as_ptr() as *const libc::c_void, 1) },
            1
        );
    }

    fn close(fds: &[RawFd]) {
        for &fd in fds {
            unsafe {
                libc::close(fd);
            }
        }
    }

    #[test]
    fn reports_only_readable_endpoints() {
        let control = ControlChannel::new().unwrap();
        let (r0, w0) = pipe();
        let (r1, w1) = pipe();
        let (r2, w2) = pipe();
        let mut poller = Poller::new(control.read_fd(), &[r0, r1, r2]);

        write_byte(w0);
        write_byte(w2);
        let ready = poller.wait().unwrap();
        assert!(!ready.control);
        assert!(ready.endpoint(0));
        assert!(!ready.endpoint(1));
        assert!(ready.endpoint(2));
        assert!(!ready.endpoint(3));
        assert!(!ready.endpoint(MAX_ENDPOINTS + 10));

        close(&[r0, w0, r1, w1, r2, w2]);
    }

    #[test]
    fn control_wakes_blocked_wait() {
        let control = std::sync::Arc::new(ControlChannel::new().unwrap());
        let (r, w) = pipe();
        let mut poller = Poller::new(control.read_fd(), &[r]);

        let signaler = control.clone();
        let t = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            signaler.signal().unwrap();
        });
        let ready = poller.wait().unwrap();
        assert!(ready.control);
        assert!(!ready.endpoint(0));
        t.join().unwrap();

        close(&[r, w]);
    }

    #[test]
    fn closed_endpoint_is_an_error() {
        let control = ControlChannel::new().unwrap();
        // Far above anything the test process has open.
        let mut poller = Poller::new(control.read_fd(), &[1 << 20]);
        assert!(poller.wait().is_err());
    }
}
