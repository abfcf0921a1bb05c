use std::fmt;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, warn};

use crate::acceptor::{ACCEPT_BURST, BurstAcceptor, BurstOutcome};
use crate::config::Config;
use crate::control::{ControlChannel, ShutdownHandle};
use crate::dispatch::{Distributor, Worker};
use crate::endpoint::{EndpointRegistry, MAX_ENDPOINTS};
use crate::error::{Error, Result};
use crate::metrics;
use crate::poller::Poller;
use crate::sys::{Libc, Syscalls};

/// Lifecycle of an [`AcceptBalancer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// Endpoints and workers may still be added.
    Idle,
    /// The accept thread is running.
    Running,
    /// Shut down. Terminal.
    Quit,
}

/// Accepts connections on a dedicated thread and deals them out to a
/// fixed set of workers round-robin.
///
/// Register listening endpoints and workers, then [`start`](Self::start).
/// Dropping the balancer shuts the thread down and joins it.
///
/// The balancer never closes registered endpoints. They must stay open
/// until the balancer has shut down.
pub struct AcceptBalancer {
    config: Config,
    endpoints: EndpointRegistry,
    workers: Vec<Arc<dyn Worker>>,
    control: Arc<ControlChannel>,
    state: State,
    thread: Option<JoinHandle<Result<()>>>,
}

impl AcceptBalancer {
    /// Create an idle balancer and its control pipe.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            endpoints: EndpointRegistry::new(),
            workers: Vec::new(),
            control: Arc::new(ControlChannel::new()?),
            state: State::Idle,
            thread: None,
        })
    }

    /// Register a bound, listening socket. Puts it into non-blocking mode.
    ///
    /// # Panics
    ///
    /// Panics after [`start`](Self::start), or if [`MAX_ENDPOINTS`]
    /// endpoints are already registered.
    pub fn register(&mut self, endpoint: &impl AsRawFd) -> Result<()> {
        assert_eq!(
            self.state,
            State::Idle,
            "endpoints must be registered before start()"
        );
        self.endpoints.register(endpoint.as_raw_fd())?;
        Ok(())
    }

    /// Append a worker to the rotation.
    ///
    /// # Panics
    ///
    /// Panics after [`start`](Self::start).
    pub fn add_worker(&mut self, worker: Arc<dyn Worker>) {
        assert_eq!(
            self.state,
            State::Idle,
            "workers must be added before start()"
        );
        self.workers.push(worker);
    }

    /// Number of registered endpoints.
    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    /// Number of workers in the rotation.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Current lifecycle state.
    ///
    /// Reports [`State::Quit`] as soon as the accept thread has exited,
    /// including when it ended on its own after a fatal error and
    /// [`shutdown`](Self::shutdown) has not been called yet.
    pub fn state(&self) -> State {
        if self.state == State::Running && self.is_finished() {
            return State::Quit;
        }
        self.state
    }

    /// Whether the accept thread has exited, either after a shutdown or on
    /// its own after a fatal error.
    pub fn is_finished(&self) -> bool {
        match &self.thread {
            Some(handle) => handle.is_finished(),
            None => self.state == State::Quit,
        }
    }

    /// A handle that can request shutdown from another thread without
    /// joining.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            control: self.control.clone(),
        }
    }

    /// Spawn the accept thread.
    ///
    /// # Panics
    ///
    /// Panics if called twice, or with no endpoints or no workers.
    pub fn start(&mut self) -> Result<()> {
        assert_eq!(self.state, State::Idle, "start() called more than once");
        assert!(!self.workers.is_empty(), "start() needs at least one worker");
        assert!(
            !self.endpoints.is_empty(),
            "start() needs at least one endpoint"
        );

        let accept_loop = AcceptLoop::new(
            Libc,
            &self.config,
            self.endpoints.fds(),
            self.workers.clone(),
            self.control.clone(),
        );
        let handle = thread::Builder::new()
            .name(self.config.thread_name.clone())
            .spawn(move || accept_loop.run())
            .map_err(Error::Io)?;

        self.thread = Some(handle);
        self.state = State::Running;
        Ok(())
    }

    /// Signal the accept thread and wait for it to exit.
    ///
    /// Returns the loop's terminal result: `Ok(())` after a normal
    /// shutdown, or the error that ended it early. A no-op returning
    /// `Ok(())` when the balancer was never started or is already shut down.
    pub fn shutdown(&mut self) -> Result<()> {
        let Some(handle) = self.thread.take() else {
            return Ok(());
        };
        self.state = State::Quit;
        self.shutdown_handle().shutdown();
        handle.join().map_err(|_| Error::ThreadPanicked)?
    }
}

impl fmt::Debug for AcceptBalancer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcceptBalancer")
            .field("state", &self.state)
            .field("endpoints", &self.endpoints.fds())
            .field("workers", &self.workers.len())
            .finish()
    }
}

impl Drop for AcceptBalancer {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "accept loop ended with an error");
        }
    }
}

/// State owned by the accept thread.
pub(crate) struct AcceptLoop<S: Syscalls> {
    poller: Poller,
    endpoints: Vec<RawFd>,
    acceptor: BurstAcceptor<S>,
    distributor: Distributor,
    control: Arc<ControlChannel>,
    batch: Vec<RawFd>,
}

impl<S: Syscalls> AcceptLoop<S> {
    pub(crate) fn new(
        sys: S,
        config: &Config,
        endpoints: &[RawFd],
        workers: Vec<Arc<dyn Worker>>,
        control: Arc<ControlChannel>,
    ) -> Self {
        Self {
            poller: Poller::new(control.read_fd(), endpoints),
            endpoints: endpoints.to_vec(),
            acceptor: BurstAcceptor::new(sys, config),
            distributor: Distributor::new(workers),
            control,
            batch: Vec::with_capacity(ACCEPT_BURST * MAX_ENDPOINTS),
        }
    }

    pub(crate) fn run(mut self) -> Result<()> {
        debug!(
            endpoints = self.endpoints.len(),
            workers = self.distributor.live_workers(),
            "accept loop started"
        );
        let result = self.run_inner();
        debug!("accept loop exited");
        result
    }

    fn run_inner(&mut self) -> Result<()> {
        loop {
            let ready = match self.poller.wait() {
                Ok(ready) => ready,
                Err(e) => {
                    error!(error = %e, "poll() failed, accept loop exiting");
                    return Err(Error::Poll(e));
                }
            };
            metrics::POLL_WAKEUPS.increment();
            if ready.control {
                return Ok(());
            }

            let mut quit = false;
            for (i, &endpoint) in self.endpoints.iter().enumerate() {
                if !ready.endpoint(i) {
                    continue;
                }
                match self
                    .acceptor
                    .accept_burst(endpoint, &mut self.batch, &self.control)
                {
                    BurstOutcome::Drained => {}
                    BurstOutcome::Cooldown => break,
                    BurstOutcome::Quit => {
                        quit = true;
                        break;
                    }
                }
            }

            self.distributor
                .distribute(&mut self.batch, self.acceptor.sys())?;
            if quit {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;
    use crate::dispatch::ChannelWorker;
    use crate::sys::fake::{Call, FakeSys};
    use crossbeam_channel::Receiver;
    use std::time::{Duration, Instant};

    /// A pipe whose read end poll()s readable once written, standing in
    /// for a listener with a pending connection.
    struct FakeEndpoint {
        read: RawFd,
        write: RawFd,
    }

    impl FakeEndpoint {
        fn new() -> Self {
            let mut fds = [0; 2];
            assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
            Self {
                read: fds[0],
                write: fds[1],
            }
        }

        fn make_readable(&self) {
            let n = unsafe { libc::write(self.write, b"x".as_ptr() as *const libc::c_void, 1) };
            assert_eq!(n, 1);
        }
    }

    impl Drop for FakeEndpoint {
        fn drop(&mut self) {
            unsafe {
                libc::close(self.read);
                libc::close(self.write);
            }
        }
    }

    fn channel_workers(n: usize) -> (Vec<Arc<dyn Worker>>, Vec<Receiver<RawFd>>) {
        (0..n)
            .map(|_| {
                let (w, rx) = ChannelWorker::channel();
                (Arc::new(w) as Arc<dyn Worker>, rx)
            })
            .unzip()
    }

    fn recv_n(rx: &Receiver<RawFd>, n: usize) -> Vec<RawFd> {
        (0..n)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect()
    }

    #[test]
    fn control_takes_priority_over_ready_endpoint() {
        let sys = FakeSys::new();
        let ep = FakeEndpoint::new();
        sys.pending(ep.read, [100]);
        ep.make_readable();
        let control = Arc::new(ControlChannel::new().unwrap());
        control.signal().unwrap();
        let (workers, rxs) = channel_workers(1);

        let lp = AcceptLoop::new(sys.clone(), &Config::default(), &[ep.read], workers, control);
        lp.run().unwrap();

        assert!(sys.calls().is_empty());
        assert!(rxs[0].try_recv().is_err());
    }

    #[test]
    fn rotation_spans_endpoints() {
        let sys = FakeSys::new();
        let a = FakeEndpoint::new();
        let b = FakeEndpoint::new();
        sys.pending(a.read, [10, 11, 12]);
        sys.pending(b.read, [20, 21]);
        a.make_readable();
        b.make_readable();
        let control = Arc::new(ControlChannel::new().unwrap());
        let (workers, rxs) = channel_workers(2);

        let lp = AcceptLoop::new(
            sys.clone(),
            &Config::default(),
            &[a.read, b.read],
            workers,
            control.clone(),
        );
        let t = thread::spawn(move || lp.run());

        // First iteration: a's burst then b's burst, one distribution pass.
        assert_eq!(recv_n(&rxs[0], 3), vec![10, 12, 21]);
        assert_eq!(recv_n(&rxs[1], 2), vec![11, 20]);

        control.signal().unwrap();
        t.join().unwrap().unwrap();
    }

    #[test]
    fn cooldown_skips_rest_of_scan_then_recovers() {
        let sys = FakeSys::new();
        let a = FakeEndpoint::new();
        let b = FakeEndpoint::new();
        sys.push(a.read, Err(libc::EMFILE));
        sys.pending(b.read, [7]);
        a.make_readable();
        b.make_readable();
        let control = Arc::new(ControlChannel::new().unwrap());
        let cooldown = Duration::from_millis(20);
        let config = ConfigBuilder::new().cooldown(cooldown).build().unwrap();
        let (workers, rxs) = channel_workers(1);

        let lp = AcceptLoop::new(
            sys.clone(),
            &config,
            &[a.read, b.read],
            workers,
            control.clone(),
        );
        let start = Instant::now();
        let t = thread::spawn(move || lp.run());

        assert_eq!(recv_n(&rxs[0], 1), vec![7]);
        assert!(start.elapsed() >= Duration::from_millis(15));

        control.signal().unwrap();
        t.join().unwrap().unwrap();

        // b was not touched until a's endpoint was scanned again.
        let calls = sys.calls();
        assert_eq!(calls[0], (Call::Accept4, a.read));
        assert_eq!(calls[1], (Call::Accept4, a.read));
    }

    #[test]
    fn later_arrivals_survive_cooldown() {
        let sys = FakeSys::new();
        let ep = FakeEndpoint::new();
        sys.pending(ep.read, [1]);
        sys.push(ep.read, Err(libc::ENFILE));
        sys.pending(ep.read, [2, 3]);
        ep.make_readable();
        let control = Arc::new(ControlChannel::new().unwrap());
        let (workers, rxs) = channel_workers(2);

        let lp = AcceptLoop::new(sys.clone(), &Config::default(), &[ep.read], workers, control.clone());
        let t = thread::spawn(move || lp.run());

        assert_eq!(recv_n(&rxs[0], 2), vec![1, 3]);
        assert_eq!(recv_n(&rxs[1], 1), vec![2]);

        control.signal().unwrap();
        t.join().unwrap().unwrap();
    }

    #[test]
    fn shutdown_during_cooldown_distributes_then_exits() {
        let sys = FakeSys::new();
        let a = FakeEndpoint::new();
        let b = FakeEndpoint::new();
        sys.push(a.read, Ok(1));
        sys.push(a.read, Err(libc::EMFILE));
        sys.push(b.read, Ok(2));
        a.make_readable();
        b.make_readable();
        let control = Arc::new(ControlChannel::new().unwrap());
        let config = ConfigBuilder::new()
            .cooldown(Duration::from_secs(30))
            .build()
            .unwrap();
        let (workers, rxs) = channel_workers(1);

        let lp = AcceptLoop::new(
            sys.clone(),
            &config,
            &[a.read, b.read],
            workers,
            control.clone(),
        );
        let start = Instant::now();
        let t = thread::spawn(move || lp.run());

        // Wait until the failing accept has happened, i.e. the loop is
        // sitting in its cooldown.
        let deadline = Instant::now() + Duration::from_secs(5);
        while sys.count(Call::Accept4) < 2 {
            assert!(Instant::now() < deadline, "loop never reached cooldown");
            thread::sleep(Duration::from_millis(1));
        }
        control.signal().unwrap();

        t.join().unwrap().unwrap();
        assert!(start.elapsed() < Duration::from_secs(10));
        assert_eq!(rxs[0].try_recv(), Ok(1));
        assert!(rxs[0].try_recv().is_err());
        assert!(sys.calls().iter().all(|&(_, fd)| fd == a.read));
        assert!(sys.closed().is_empty());
    }

    #[test]
    fn poll_failure_is_fatal() {
        let control = Arc::new(ControlChannel::new().unwrap());
        let (workers, _rxs) = channel_workers(1);
        let lp = AcceptLoop::new(
            FakeSys::new(),
            &Config::default(),
            &[1 << 20],
            workers,
            control,
        );
        assert!(matches!(lp.run(), Err(Error::Poll(_))));
    }

    #[test]
    fn all_workers_gone_ends_loop() {
        let sys = FakeSys::new();
        let ep = FakeEndpoint::new();
        sys.pending(ep.read, [5, 6]);
        ep.make_readable();
        let control = Arc::new(ControlChannel::new().unwrap());
        let (workers, rxs) = channel_workers(1);
        drop(rxs);

        let lp = AcceptLoop::new(sys.clone(), &Config::default(), &[ep.read], workers, control);
        assert!(matches!(lp.run(), Err(Error::NoWorkers)));
        assert_eq!(sys.closed(), vec![5, 6]);
    }
}
