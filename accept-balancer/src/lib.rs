//! accept-balancer — a dedicated accept thread that spreads connections
//! over a pool of worker event loops.
//!
//! The balancer polls up to [`MAX_ENDPOINTS`] listening sockets plus a
//! private control pipe. When a listener becomes readable it accepts a
//! burst of up to [`ACCEPT_BURST`] connections, marks each non-blocking,
//! and hands them to workers in strict round-robin order. Workers only
//! need to implement [`Worker::enqueue`]; [`ChannelWorker`] covers the
//! common crossbeam-channel + eventfd setup.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::net::TcpListener;
//! use std::sync::Arc;
//!
//! use accept_balancer::{AcceptBalancer, ChannelWorker, Config};
//!
//! fn main() -> Result<(), accept_balancer::Error> {
//!     let listener = TcpListener::bind("127.0.0.1:7878")?;
//!     let mut balancer = AcceptBalancer::new(Config::default())?;
//!     balancer.register(&listener)?;
//!
//!     let mut receivers = Vec::new();
//!     for _ in 0..4 {
//!         let (worker, rx) = ChannelWorker::channel();
//!         balancer.add_worker(Arc::new(worker));
//!         receivers.push(rx);
//!     }
//!     balancer.start()?;
//!
//!     // ... each worker thread drains its receiver ...
//!
//!     balancer.shutdown()
//! }
//! ```
//!
//! # Errors and diagnostics
//!
//! Accept-time failures never leave the accept thread. `EAGAIN` ends a
//! burst quietly; other accept errors (usually `EMFILE`/`ENFILE`) are
//! logged through `tracing` and pause accepting for
//! [`Config::cooldown`]. Only a failed `poll(2)` or the loss of every
//! worker ends the loop early; [`AcceptBalancer::shutdown`] reports it.
//!
//! # Platform
//!
//! Unix. `accept4` is used where the platform has it and dropped for the
//! rest of the process the first time the kernel rejects it.

// ── Internal modules ────────────────────────────────────────────────────
pub(crate) mod acceptor;
pub(crate) mod balancer;
pub(crate) mod control;
pub(crate) mod dispatch;
pub(crate) mod endpoint;
pub(crate) mod poller;
pub(crate) mod sys;

// ── Public modules ──────────────────────────────────────────────────────
pub mod config;
pub mod error;
pub mod metrics;

// ── Re-exports ──────────────────────────────────────────────────────────

/// Per-endpoint burst ceiling.
pub use acceptor::ACCEPT_BURST;
/// The balancer and its lifecycle state.
pub use balancer::{AcceptBalancer, State};
/// Configuration and its validating builder.
pub use config::{Config, ConfigBuilder};
/// Cross-thread shutdown trigger.
pub use control::ShutdownHandle;
/// Worker contract and the channel-backed implementation.
pub use dispatch::{ChannelWorker, Worker};
/// Maximum number of listening endpoints.
pub use endpoint::MAX_ENDPOINTS;
/// Error type.
pub use error::{Error, Result};
