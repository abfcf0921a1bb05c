use std::io;

use thiserror::Error;

/// Errors returned by the accept balancer.
#[derive(Debug, Error)]
pub enum Error {
    /// Setup failed (control pipe creation, fcntl on a registered endpoint,
    /// thread spawn).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// `poll(2)` on the endpoints failed. The accept loop cannot make
    /// progress and has exited.
    #[error("poll failed: {0}")]
    Poll(io::Error),
    /// Every worker refused new connections. The accept loop has exited.
    #[error("no live workers left to receive connections")]
    NoWorkers,
    /// The accept thread panicked.
    #[error("accept thread panicked")]
    ThreadPanicked,
    /// A configuration value is out of range.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
