use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::control::ControlChannel;
use crate::metrics;
use crate::sys::{self, Syscalls};

/// Upper bound on connections accepted from one endpoint per wake-up.
pub const ACCEPT_BURST: usize = 16;

/// How a burst ended, as far as the accept loop cares.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BurstOutcome {
    /// Hit the burst limit or `EAGAIN`. Keep scanning endpoints.
    Drained,
    /// An accept failed and the cooldown ran out. Stop scanning this
    /// iteration but keep running.
    Cooldown,
    /// Shutdown was requested during the cooldown.
    Quit,
}

/// Accepts bursts of connections and remembers whether `accept4` works.
pub(crate) struct BurstAcceptor<S: Syscalls> {
    sys: S,
    accept4_available: bool,
    burst_limit: usize,
    cooldown: Duration,
}

impl<S: Syscalls> BurstAcceptor<S> {
    pub(crate) fn new(sys: S, config: &Config) -> Self {
        Self {
            sys,
            accept4_available: config.use_accept4,
            burst_limit: config.burst_limit.clamp(1, ACCEPT_BURST),
            cooldown: config.cooldown,
        }
    }

    pub(crate) fn sys(&self) -> &S {
        &self.sys
    }

    #[cfg(test)]
    pub(crate) fn accept4_available(&self) -> bool {
        self.accept4_available
    }

    /// Accept up to `burst_limit` connections from `endpoint` into `batch`,
    /// stopping at the first failure.
    ///
    /// Connections accepted before a failure stay in `batch`. A failure
    /// other than `EAGAIN` is logged and followed by one bounded wait on
    /// `control`.
    pub(crate) fn accept_burst(
        &mut self,
        endpoint: RawFd,
        batch: &mut Vec<RawFd>,
        control: &ControlChannel,
    ) -> BurstOutcome {
        let mut accepted = 0;
        let mut failure = None;
        while accepted < self.burst_limit {
            match self.accept_nonblocking(endpoint) {
                Ok(fd) => {
                    batch.push(fd);
                    accepted += 1;
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        metrics::CONNECTIONS_ACCEPTED.add(accepted as u64);

        match failure {
            Some(e) if !sys::is_would_block(&e) => self.cool_down(endpoint, &e, control),
            _ => BurstOutcome::Drained,
        }
    }

    fn accept_nonblocking(&mut self, listener: RawFd) -> io::Result<RawFd> {
        loop {
            match self.accept_once(listener) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }

    fn accept_once(&mut self, listener: RawFd) -> io::Result<RawFd> {
        if self.accept4_available {
            match self.sys.accept4_nonblock(listener) {
                Err(e) if sys::is_unsupported(&e) => {
                    self.accept4_available = false;
                    metrics::ACCEPT4_FALLBACKS.increment();
                    debug!(endpoint = listener, error = %e, "accept4 unsupported, using accept + fcntl");
                }
                other => return other,
            }
        }

        let fd = self.sys.accept(listener)?;
        if let Err(e) = self.sys.prepare_accepted(fd) {
            debug!(fd, error = %e, "unable to set non-blocking flag on accepted client socket");
            self.sys.close(fd);
            metrics::CONNECTIONS_DROPPED.increment();
            return Err(e);
        }
        Ok(fd)
    }

    fn cool_down(&self, endpoint: RawFd, err: &io::Error, control: &ControlChannel) -> BurstOutcome {
        metrics::ACCEPT_ERRORS.increment();
        error!(
            endpoint,
            errno = err.raw_os_error().unwrap_or(0),
            "cannot accept client: {err}. Stop accepting clients for {:?}",
            self.cooldown
        );
        after_cooldown(control.wait(self.cooldown))
    }
}

fn after_cooldown(waited: io::Result<bool>) -> BurstOutcome {
    match waited {
        Ok(true) => BurstOutcome::Quit,
        Ok(false) => {
            info!("resuming accepting new clients");
            BurstOutcome::Cooldown
        }
        Err(e) => {
            warn!(error = %e, "cooldown wait failed, resuming accepting new clients early");
            BurstOutcome::Cooldown
        }
    }
}
