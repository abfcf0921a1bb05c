//! Echo server: one accept thread, N echo worker threads.
//!
//! Usage: cargo run --example echo_pool -- [ADDR] [WORKERS]
//!
//! Each worker owns a crossbeam receiver and serves its connections one
//! at a time with blocking I/O. Close stdin (Ctrl-D) to shut down.

use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::fd::FromRawFd;
use std::sync::Arc;
use std::thread;

use accept_balancer::{AcceptBalancer, ChannelWorker, ConfigBuilder};
use tracing::{info, warn};

fn serve(worker_id: usize, mut stream: TcpStream) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    let mut buf = [0u8; 4096];
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Ok(());
        }
        stream.write_all(&buf[..n])?;
        tracing::trace!(worker_id, bytes = n, "echoed");
    }
}

fn main() -> Result<(), accept_balancer::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let addr = args.next().unwrap_or_else(|| "127.0.0.1:7878".to_string());
    let workers: usize = args.next().and_then(|s| s.parse().ok()).unwrap_or(4);

    let listener = TcpListener::bind(&addr)?;
    let config = ConfigBuilder::new().thread_name("echo-accept").build()?;
    let mut balancer = AcceptBalancer::new(config)?;
    balancer.register(&listener)?;

    let mut handles = Vec::with_capacity(workers);
    for worker_id in 0..workers {
        let (worker, rx) = ChannelWorker::channel();
        balancer.add_worker(Arc::new(worker));
        let handle = thread::Builder::new()
            .name(format!("echo-worker-{worker_id}"))
            .spawn(move || {
                for fd in rx {
                    let stream = unsafe { TcpStream::from_raw_fd(fd) };
                    if let Err(e) = serve(worker_id, stream) {
                        warn!(worker_id, error = %e, "connection ended with error");
                    }
                }
            })?;
        handles.push(handle);
    }

    balancer.start()?;
    info!(%addr, workers, "echo server listening");

    // Block until stdin closes.
    let _ = io::copy(&mut io::stdin(), &mut io::sink());

    info!("shutting down");
    let result = balancer.shutdown();
    // Dropping the balancer drops the senders, ending each worker's loop.
    drop(balancer);
    for h in handles {
        let _ = h.join();
    }
    result
}
