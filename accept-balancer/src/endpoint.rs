use std::io;
use std::os::fd::RawFd;

use crate::sys;

/// Maximum number of listening endpoints one balancer can poll.
pub const MAX_ENDPOINTS: usize = 4;

/// Fixed-capacity set of listening descriptors.
///
/// The registry never closes what it holds; the caller owns each listener
/// and must keep it open until the balancer has shut down.
#[derive(Debug, Default)]
pub(crate) struct EndpointRegistry {
    fds: Vec<RawFd>,
}

impl EndpointRegistry {
    pub(crate) fn new() -> Self {
        Self {
            fds: Vec::with_capacity(MAX_ENDPOINTS),
        }
    }

    /// Switch `fd` to non-blocking mode and append it.
    ///
    /// # Panics
    ///
    /// Panics if [`MAX_ENDPOINTS`] endpoints are already registered.
    pub(crate) fn register(&mut self, fd: RawFd) -> io::Result<()> {
        assert!(
            self.fds.len() < MAX_ENDPOINTS,
            "cannot register more than {MAX_ENDPOINTS} endpoints"
        );
        sys::set_nonblocking(fd)?;
        self.fds.push(fd);
        Ok(())
    }

    pub(crate) fn fds(&self) -> &[RawFd] {
        &self.fds
    }

    pub(crate) fn len(&self) -> usize {
        self.fds.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }
}
